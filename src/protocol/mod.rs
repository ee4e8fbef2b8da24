//! # Protocol Layer
//!
//! Logical payloads, the discovery handshake and method dispatch.
//!
//! ## Components
//! - **Message**: JSON request/response payloads and result shapes
//! - **Handshake**: hello frames, reply interpretation, broadcast targets
//! - **Dispatcher**: method-name routing for the reference peer

pub mod dispatcher;
pub mod handshake;
pub mod message;
