//! Reference peer: a minimal protocol-compliant device responder.
//!
//! The peer reads one datagram at a time from its socket, answers it, and
//! loops. Hello requests get a bare reply carrying the device id, the current
//! timestamp and (optionally) the token. Commands are decrypted, routed
//! through a [`Dispatcher`] and answered with the same correlation id.
//! Frames that fail the checksum are dropped without a reply.

use crate::config::PeerConfig;
use crate::core::codec::FrameCodec;
use crate::core::packet::{Frame, FrameHeader};
use crate::core::token::Token;
use crate::error::{MiioError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::hello_reply;
use crate::protocol::message::{Command, INFO_METHOD};
use crate::utils::metrics::global_metrics;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::udp::UdpFramed;
use tracing::{debug, info, instrument, warn};

/// A device simulator bound to a UDP socket.
pub struct ReferencePeer {
    socket: UdpSocket,
    token: Token,
    device_id: u32,
    base_timestamp: u32,
    started: Instant,
    reveal_token: bool,
    dispatcher: Dispatcher,
    drops: Arc<AtomicUsize>,
}

impl ReferencePeer {
    /// Bind the peer's socket and register the default `miIO.info` handler.
    pub async fn bind(config: &PeerConfig) -> Result<Self> {
        let token = Token::from_hex(&config.token)?;
        let addr: SocketAddr = config.address.parse().map_err(|e| {
            MiioError::ConfigError(format!("Invalid peer address '{}': {e}", config.address))
        })?;
        let socket = UdpSocket::bind(addr).await?;
        info!(address = ?socket.local_addr().ok(), device_id = config.device_id, "Reference peer bound");

        let dispatcher = Dispatcher::new();
        let info = device_info(config, &token);
        dispatcher.register(INFO_METHOD, move |_| Some(info.clone()))?;

        Ok(Self {
            socket,
            token,
            device_id: config.device_id,
            base_timestamp: config.timestamp,
            started: Instant::now(),
            reveal_token: config.reveal_token,
            dispatcher,
            drops: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Register a method handler. Returning `None` answers `"unknown_method"`.
    pub fn register<F>(&self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(&Command) -> Option<Value> + Send + Sync + 'static,
    {
        self.dispatcher.register(method, handler)
    }

    /// Silently ignore the next `count` command frames.
    pub fn drop_next(&self, count: usize) {
        self.drops.store(count, Ordering::SeqCst);
    }

    /// Run the responder loop on a background task.
    pub fn spawn(self) -> Result<PeerHandle> {
        let addr = self.local_addr()?;
        let drops = Arc::clone(&self.drops);
        let dispatcher = self.dispatcher.clone();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(self.run(shutdown_rx));
        Ok(PeerHandle {
            addr,
            shutdown_tx,
            task,
            drops,
            dispatcher,
        })
    }

    /// Serve until a shutdown message arrives or the socket closes.
    #[instrument(skip_all, fields(device_id = self.device_id))]
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let mut codec = FrameCodec::new(Some(self.token.clone()));
        if !self.reveal_token {
            codec = codec.concealing();
        }
        let Self {
            socket,
            device_id,
            base_timestamp,
            started,
            dispatcher,
            drops,
            token,
            reveal_token,
        } = self;
        let responder = Responder {
            token,
            device_id,
            base_timestamp,
            started,
            reveal_token,
            dispatcher,
            drops,
        };
        let mut framed = UdpFramed::new(socket, codec);
        let metrics = global_metrics();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Reference peer shutting down");
                    return Ok(());
                }

                next = framed.next() => {
                    match next {
                        None => return Ok(()),
                        Some(Err(e)) => {
                            if matches!(e, MiioError::ChecksumMismatch) {
                                metrics.checksum_failure();
                            }
                            warn!(error = %e, "Dropping undecodable frame");
                        }
                        Some(Ok((frame, from))) => {
                            if let Some(reply) = responder.answer(frame, from) {
                                if let Err(e) = framed.send((reply, from)).await {
                                    warn!(%from, error = %e, "Failed to send reply");
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Peer state used while serving, split from the socket.
struct Responder {
    token: Token,
    device_id: u32,
    base_timestamp: u32,
    started: Instant,
    reveal_token: bool,
    dispatcher: Dispatcher,
    drops: Arc<AtomicUsize>,
}

impl Responder {
    fn timestamp(&self) -> u32 {
        let elapsed = u32::try_from(self.started.elapsed().as_secs()).unwrap_or(u32::MAX);
        self.base_timestamp.wrapping_add(elapsed)
    }

    fn answer(&self, frame: Frame, from: SocketAddr) -> Option<Frame> {
        let Some(text) = frame.payload else {
            if frame.header.is_hello() {
                debug!(%from, reveal = self.reveal_token, "Answering hello");
                return Some(hello_reply(self.device_id, self.timestamp()));
            }
            debug!(%from, "Ignoring bare frame");
            return None;
        };

        let cmd = match Command::from_json(&text) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(%from, error = %e, "Ignoring malformed command");
                return None;
            }
        };

        let dropped = self
            .drops
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            debug!(%from, id = cmd.id, method = %cmd.method, "Simulating loss");
            return None;
        }

        let response = match self.dispatcher.dispatch(&cmd) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Dispatch failed");
                return None;
            }
        };
        let json = match response.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize response");
                return None;
            }
        };

        global_metrics().command_served();
        debug!(%from, id = cmd.id, method = %cmd.method, "Answered command");
        Some(Frame::new(
            FrameHeader::normal(self.device_id, self.timestamp()),
            Some(json),
        ))
    }
}

fn device_info(config: &PeerConfig, token: &Token) -> Value {
    let id = config.device_id.to_be_bytes();
    let mut info = json!({
        "model": config.model,
        "fw_ver": env!("CARGO_PKG_VERSION"),
        "hw_ver": "reference",
        "mac": format!("02:00:{:02X}:{:02X}:{:02X}:{:02X}", id[0], id[1], id[2], id[3]),
    });
    if config.reveal_token {
        info["token"] = Value::String(token.to_hex());
    }
    info
}

/// Control handle for a spawned [`ReferencePeer`].
pub struct PeerHandle {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<Result<()>>,
    drops: Arc<AtomicUsize>,
    dispatcher: Dispatcher,
}

impl PeerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn drop_next(&self, count: usize) {
        self.drops.store(count, Ordering::SeqCst);
    }

    pub fn register<F>(&self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(&Command) -> Option<Value> + Send + Sync + 'static,
    {
        self.dispatcher.register(method, handler)
    }

    /// Stop the responder loop and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| MiioError::Io(std::io::Error::other(e)))?
    }
}
