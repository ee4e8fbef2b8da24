//! # miio-protocol
//!
//! Client and session implementation of the miIO UDP protocol used by
//! local smart-home appliances.
//!
//! ## Overview
//! Every datagram carries one frame: a 32-byte header followed by an
//! AES-128-CBC encrypted JSON payload. The payload key and IV are derived
//! from a 16-byte token shared with the device, and the header checksum is
//! an MD5 over the frame with the token substituted into the checksum field.
//!
//! A [`DeviceSession`] learns a device's id, timestamp and (when the device
//! hands it out) its token through a hello handshake, then sends
//! request/response commands with monotonically increasing ids, bounded
//! retries and strict reply correlation.
//!
//! ## Modules
//! - [`core`]: token, frame layout and datagram codec
//! - [`protocol`]: payload messages, handshake, method dispatch
//! - [`transport`]: client session and reference peer
//! - [`config`]: TOML and environment configuration
//! - [`utils`]: logging, timeouts, metrics
//!
//! ## Example
//! ```rust,no_run
//! use miio_protocol::config::SessionConfig;
//! use miio_protocol::protocol::message::Params;
//! use miio_protocol::DeviceSession;
//! use serde_json::json;
//!
//! # async fn run() -> miio_protocol::Result<()> {
//! let config = SessionConfig {
//!     address: Some("192.168.1.50".into()),
//!     token: Some("000102030405060708090a0b0c0d0e0f".into()),
//!     ..SessionConfig::default()
//! };
//! let mut session = DeviceSession::new(&config).await?;
//! if session.discover().await {
//!     let reply = session.send("get_prop", Params::from(vec![json!("power")])).await?;
//!     println!("{:?}", reply.result);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::core::packet::{Frame, FrameHeader};
pub use crate::core::token::Token;
pub use error::{MiioError, Result};
pub use protocol::message::{Command, DeviceInfo, Params, Response, ResponseResult};
pub use transport::{DeviceSession, PeerHandle, ReferencePeer, SessionState};
