//! Client session against a single miIO device.
//!
//! A [`DeviceSession`] owns one UDP socket and the logical state learned from
//! the device: address, token, device id, timestamp counter and request
//! counter. Every call takes `&mut self`; one session is driven by one task
//! at a time and needs no locking.
//!
//! ## Request flow
//! 1. Bind lazily: run discovery if address, token or identity is missing.
//! 2. Advance the timestamp counter and the request counter.
//! 3. Encode the command frame once.
//! 4. Drop datagrams already queued on the socket, such as duplicate hello
//!    replies.
//! 5. Send it, listen for `timeout` for a reply, and retransmit the *same
//!    bytes* up to `retries` more times until a reply validates. Rejected or
//!    bare frames do not end an attempt early.
//!
//! A reply validates only if its checksum matches under the session token,
//! its device id and timestamp are not the unknown sentinel, and its JSON
//! `id` equals the request id.

use crate::config::SessionConfig;
use crate::core::packet::{Frame, FrameHeader, MAX_FRAME_SIZE, UNKNOWN_FIELD};
use crate::core::token::Token;
use crate::error::{constants, MiioError, Result};
use crate::protocol::handshake::{broadcast_targets, hello_request, HelloReply};
use crate::protocol::message::{
    reply_id, Command, DeviceInfo, Params, Response, ResponseResult, INFO_METHOD,
};
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::timeout::{operation_budget, with_timeout_error};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Request ids stay below this bound and wrap to 1.
pub const SEQUENCE_WRAP: u32 = 10_000;

/// Per-session request counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceCounter(u32);

impl SequenceCounter {
    pub fn starting_at(value: u32) -> Self {
        Self(value % SEQUENCE_WRAP)
    }

    /// The id handed out last
    pub fn current(&self) -> u32 {
        self.0
    }

    /// Advance and return the next id, wrapping to 1 at [`SEQUENCE_WRAP`].
    ///
    /// Values restored from disk may lie outside the range; they are reduced first.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u32 {
        self.0 = self.0 % SEQUENCE_WRAP + 1;
        if self.0 >= SEQUENCE_WRAP {
            self.0 = 1;
        }
        self.0
    }
}

/// The logical, persistable part of a session. The socket is not included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub ip: Option<IpAddr>,
    pub token: Option<Token>,
    pub device_id: Option<u32>,
    pub timestamp: Option<u32>,
    pub sequence: SequenceCounter,
}

impl SessionState {
    /// Address, token, device id and timestamp are all known.
    pub fn is_bound(&self) -> bool {
        self.ip.is_some()
            && self.token.is_some()
            && self.device_id.is_some()
            && self.timestamp.is_some()
    }

    /// Save as JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from JSON written by [`SessionState::save_to_file`]
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// A session with one device over one UDP socket.
pub struct DeviceSession {
    socket: UdpSocket,
    state: SessionState,
    port: u16,
    timeout: Duration,
    retries: u32,
    allowed_models: Vec<String>,
}

impl DeviceSession {
    /// Open a session from configuration. Nothing is sent until first use.
    pub async fn new(config: &SessionConfig) -> Result<Self> {
        let state = SessionState {
            ip: config.ip()?,
            token: config.token()?,
            ..SessionState::default()
        };
        Self::restore(state, config).await
    }

    /// Re-open a session from previously saved state on a fresh socket.
    pub async fn restore(state: SessionState, config: &SessionConfig) -> Result<Self> {
        let socket = bind_socket(state.ip).await?;
        debug!(
            local = ?socket.local_addr().ok(),
            bound = state.is_bound(),
            budget_ms = operation_budget(config.timeout, config.retries).as_millis() as u64,
            "Session socket open"
        );
        Ok(Self {
            socket,
            state,
            port: config.port,
            timeout: config.timeout,
            retries: config.retries,
            allowed_models: config.allowed_models.clone(),
        })
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.state.ip
    }

    pub fn token(&self) -> Option<&Token> {
        self.state.token.as_ref()
    }

    pub fn device_id(&self) -> Option<u32> {
        self.state.device_id
    }

    pub fn timestamp(&self) -> Option<u32> {
        self.state.timestamp
    }

    pub fn sequence(&self) -> u32 {
        self.state.sequence.current()
    }

    pub fn is_bound(&self) -> bool {
        self.state.is_bound()
    }

    /// Snapshot of the persistable state
    pub fn state(&self) -> SessionState {
        self.state.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Run the hello handshake.
    ///
    /// Returns false when there is nowhere to send the hello, when no device
    /// answers within the retry budget, or when the model allow-list rejects
    /// every device that answered. Session state changes only on success.
    #[instrument(skip(self), fields(port = self.port))]
    pub async fn discover(&mut self) -> bool {
        let metrics = global_metrics();
        metrics.discovery_attempt();
        let _timer = Timer::start("discover");

        let targets = match self.state.ip {
            Some(ip) => vec![SocketAddr::new(ip, self.port)],
            None => broadcast_targets(self.port),
        };
        if targets.is_empty() {
            warn!("No broadcast-capable network interface");
            metrics.discovery_failed();
            return false;
        }

        let hello = match hello_request() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode hello");
                metrics.discovery_failed();
                return false;
            }
        };

        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        for attempt in 0..=self.retries {
            for target in &targets {
                match self.socket.send_to(&hello, target).await {
                    Ok(n) => metrics.frame_sent(n),
                    Err(e) => debug!(%target, error = %e, "Hello send failed"),
                }
            }

            let received = with_timeout_error(
                async { Ok::<_, MiioError>(self.socket.recv_from(&mut buf).await?) },
                self.timeout,
            )
            .await;
            let (n, from) = match received {
                Ok(received) => received,
                Err(e) => {
                    debug!(attempt, error = %e, "No hello reply");
                    continue;
                }
            };
            metrics.frame_received(n);

            let reply = match HelloReply::parse(&buf[..n]) {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(attempt, %from, error = %e, "Ignoring malformed hello reply");
                    continue;
                }
            };

            let mut staged = self.state.clone();
            staged.ip.get_or_insert(from.ip());
            if staged.token.is_none() {
                staged.token = reply.token.clone();
            }
            if let Some(device_id) = reply.device_id {
                staged.device_id = Some(device_id);
            }
            if let Some(timestamp) = reply.timestamp {
                staged.timestamp = Some(timestamp);
                staged.sequence = SequenceCounter::starting_at(reply.sequence_seed());
            }

            if !self.allowed_models.is_empty() {
                match self.check_model(&mut staged).await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        debug!(attempt, error = %e, "Model query failed");
                        continue;
                    }
                }
            }

            info!(
                ip = ?staged.ip,
                device_id = ?staged.device_id.map(|id| format!("{id:08x}")),
                token_known = staged.token.is_some(),
                "Device discovered"
            );
            self.state = staged;
            metrics.discovery_success();
            return true;
        }

        metrics.discovery_failed();
        false
    }

    async fn check_model(&self, staged: &mut SessionState) -> Result<bool> {
        let text = self
            .exchange(staged, |id| {
                Command::new(id, INFO_METHOD, Params::None).to_json()
            })
            .await?;
        let info: DeviceInfo = Response::from_json(&text)
            .map_err(MiioError::into_response_error)?
            .into_typed()?;
        let accepted = self.allowed_models.iter().any(|m| *m == info.model);
        if !accepted {
            warn!(model = %info.model, "Device model not in allow-list");
        }
        Ok(accepted)
    }

    async fn ensure_bound(&mut self) -> Result<()> {
        if self.state.is_bound() {
            return Ok(());
        }
        if !self.discover().await {
            return Err(MiioError::DeviceNotFound);
        }
        if !self.state.is_bound() {
            return Err(MiioError::IpOrTokenUnknown);
        }
        Ok(())
    }

    /// Send a command and wait for its validated response.
    #[instrument(skip(self, params))]
    pub async fn send(&mut self, method: &str, params: Params) -> Result<Response> {
        self.ensure_bound().await?;

        let mut state = self.state.clone();
        let result = self
            .exchange(&mut state, |id| {
                Command::new(id, method, params).to_json()
            })
            .await;
        self.state = state;

        let response = Response::from_json(&result?).map_err(MiioError::into_response_error)?;
        match response.result {
            ResponseResult::Empty => Err(MiioError::EmptyResponse),
            ref result if result.is_unknown_method() => Err(MiioError::UnknownMethod),
            _ => Ok(response),
        }
    }

    /// Send a command and deserialize its result into `T`.
    pub async fn send_typed<T: DeserializeOwned>(
        &mut self,
        method: &str,
        params: Params,
    ) -> Result<T> {
        self.send(method, params).await?.into_typed()
    }

    /// Send a raw JSON request object and return the raw reply text.
    ///
    /// The request's `id` member is overwritten with the session's next id.
    #[instrument(skip(self, json))]
    pub async fn send_raw(&mut self, json: &str) -> Result<String> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| MiioError::InvalidParameters(format!("Request is not JSON: {e}")))?;
        let Value::Object(mut object) = value else {
            return Err(MiioError::InvalidParameters(
                constants::ERR_NOT_AN_OBJECT.into(),
            ));
        };

        self.ensure_bound().await?;

        let mut state = self.state.clone();
        let result = self
            .exchange(&mut state, |id| {
                object.insert("id".into(), Value::from(id));
                Ok(serde_json::to_string(&object)?)
            })
            .await;
        self.state = state;
        result
    }

    /// Query `miIO.info`
    pub async fn info(&mut self) -> Result<DeviceInfo> {
        self.send_typed(INFO_METHOD, Params::None).await
    }

    /// Advance counters in `state`, encode one frame and drive it to a validated reply.
    ///
    /// Returns the reply payload text.
    async fn exchange<F>(&self, state: &mut SessionState, build: F) -> Result<String>
    where
        F: FnOnce(u32) -> Result<String>,
    {
        let (Some(ip), Some(token), Some(device_id), Some(timestamp)) =
            (state.ip, state.token.clone(), state.device_id, state.timestamp)
        else {
            return Err(MiioError::IpOrTokenUnknown);
        };

        let timestamp = next_timestamp(timestamp);
        state.timestamp = Some(timestamp);
        let id = state.sequence.next();

        let payload = build(id)?;
        let frame = Frame::new(FrameHeader::normal(device_id, timestamp), Some(payload));
        let bytes = frame.encode(&token)?;

        self.transmit(&bytes, SocketAddr::new(ip, self.port), &token, id)
            .await
    }

    /// Send `bytes` up to `retries + 1` times until a reply for `id` validates.
    ///
    /// Within one attempt, rejected datagrams do not end the wait; the
    /// session keeps listening until the attempt's deadline.
    async fn transmit(
        &self,
        bytes: &[u8],
        target: SocketAddr,
        token: &Token,
        id: u32,
    ) -> Result<String> {
        let metrics = global_metrics();
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let mut rejected: Option<MiioError> = None;
        let mut bare_replies = 0usize;

        self.drain_stale(&mut buf);

        for attempt in 0..=self.retries {
            if attempt > 0 {
                metrics.retransmission();
                debug!(attempt, id, "Retransmitting");
            }

            if let Err(e) = self.socket.send_to(bytes, target).await {
                warn!(attempt, %target, error = %e, "Send failed");
                continue;
            }
            metrics.frame_sent(bytes.len());

            let deadline = Instant::now() + self.timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let received = with_timeout_error(
                    async { Ok::<_, MiioError>(self.socket.recv_from(&mut buf).await?) },
                    remaining,
                )
                .await;

                let (n, from) = match received {
                    Ok(received) => received,
                    Err(MiioError::Timeout) => {
                        metrics.timeout();
                        debug!(attempt, id, "Reply timed out");
                        break;
                    }
                    Err(e) => {
                        warn!(attempt, id, error = %e, "Receive failed");
                        break;
                    }
                };
                metrics.frame_received(n);

                match validate_reply(&buf[..n], token, id) {
                    Ok(text) => return Ok(text),
                    Err(MiioError::EmptyResponse) => {
                        bare_replies += 1;
                        debug!(attempt, id, %from, "Ignoring bare frame");
                    }
                    Err(e) => {
                        if matches!(e, MiioError::ChecksumMismatch) {
                            metrics.checksum_failure();
                        }
                        metrics.invalid_response();
                        debug!(attempt, id, %from, error = %e, "Rejected reply");
                        rejected = Some(e.into_response_error());
                    }
                }
            }
        }

        Err(match rejected {
            Some(e) => e,
            None if bare_replies > 0 => MiioError::EmptyResponse,
            None => MiioError::Timeout,
        })
    }

    /// Discard datagrams already queued on the socket, e.g. duplicate hello replies.
    fn drain_stale(&self, buf: &mut [u8]) {
        loop {
            match self.socket.try_recv_from(buf) {
                Ok((n, from)) => debug!(%from, len = n, "Discarding stale datagram"),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(error = %e, "Stopped draining socket");
                    break;
                }
            }
        }
    }
}

/// Advance the device timestamp counter, skipping the unknown sentinel.
fn next_timestamp(timestamp: u32) -> u32 {
    match timestamp.wrapping_add(1) {
        UNKNOWN_FIELD => 0,
        next => next,
    }
}

/// Decode and check a reply datagram against the request id.
fn validate_reply(datagram: &[u8], token: &Token, id: u32) -> Result<String> {
    let frame = Frame::decode(datagram, Some(token))?;
    if frame.header.has_unknown_identity() {
        return Err(MiioError::InvalidResponse(constants::ERR_UNKNOWN_DEVICE.into()));
    }
    let Some(text) = frame.payload else {
        return Err(MiioError::EmptyResponse);
    };

    let value: Value = serde_json::from_str(&text)?;
    let Value::Object(object) = value else {
        return Err(MiioError::InvalidResponse(constants::ERR_NOT_AN_OBJECT.into()));
    };
    if reply_id(&object)? != id {
        return Err(MiioError::InvalidResponse(constants::ERR_ID_MISMATCH.into()));
    }
    Ok(text)
}

async fn bind_socket(ip: Option<IpAddr>) -> Result<UdpSocket> {
    let local: SocketAddr = match ip {
        Some(IpAddr::V6(_)) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        _ => (Ipv4Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}
