//! # Core Protocol Components
//!
//! Token handling, frame layout and the datagram codec.
//!
//! ## Components
//! - **Token**: 16-byte shared secret, MD5 key derivation, AES-128-CBC
//! - **Packet**: miIO frame encode/decode with checksum-by-substitution
//! - **Codec**: Tokio codec for one-frame-per-datagram sockets
//!
//! ## Wire Format
//! ```text
//! [Magic(2)] [Length(2)] [Flags(4)] [DeviceId(4)] [Stamp(4)] [Checksum(16)] [Payload(N)]
//! ```
//!
//! ## Security
//! - Maximum frame size: 65507 bytes (one UDP datagram)
//! - Declared length must equal the datagram length
//! - Checksum doubles as proof that the receiver holds the right token

pub mod codec;
pub mod packet;
pub mod token;
