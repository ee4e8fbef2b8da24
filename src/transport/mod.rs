//! # Transport Layer
//!
//! UDP endpoints speaking the miIO frame format.
//!
//! ## Components
//! - **Session**: client side; discovery, sequence ids, retries, correlation
//! - **Peer**: reference device responder used for local testing
//!
//! Both ends send exactly one frame per datagram and never fragment.

pub mod peer;
pub mod session;

pub use peer::{PeerHandle, ReferencePeer};
pub use session::{DeviceSession, SequenceCounter, SessionState};
