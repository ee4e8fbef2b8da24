//! Discovery handshake.
//!
//! The client sends a bare hello frame (every header field `0xFF`) either to
//! a known device address or to the broadcast address of every non-loopback
//! IPv4 interface. The first device to answer replies with a bare 32-byte
//! frame carrying its device id, its timestamp counter and, if the device is
//! still unprovisioned, its token in clear.
//!
//! Nothing in a hello reply is authenticated. Identity learned here is only
//! trusted once an encrypted exchange with the learned token succeeds.

use crate::core::packet::{Frame, FrameHeader, UNKNOWN_FIELD};
use crate::core::token::Token;
use crate::error::Result;
use if_addrs::IfAddr;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::{debug, warn};

/// Well-known UDP port of miIO devices
pub const MIIO_PORT: u16 = 54321;

/// Modulus applied to the device timestamp to seed the request counter.
///
/// Two sessions seeded within the same ~2 hour window can collide; that
/// residual risk is accepted.
pub const SEQUENCE_SEED_MODULUS: u32 = 8192;

/// Encoded hello request.
pub fn hello_request() -> Result<Vec<u8>> {
    Frame::hello().encode(&Token::unknown())
}

/// The bare frame a device answers a hello with.
pub fn hello_reply(device_id: u32, timestamp: u32) -> Frame {
    Frame::new(FrameHeader::normal(device_id, timestamp), None)
}

/// What a hello reply told us. Sentinel values are mapped to `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloReply {
    pub device_id: Option<u32>,
    pub timestamp: Option<u32>,
    pub token: Option<Token>,
}

impl HelloReply {
    pub fn from_frame(frame: &Frame) -> Self {
        let known = |value: u32| (value != UNKNOWN_FIELD).then_some(value);
        Self {
            device_id: known(frame.header.device_id),
            timestamp: known(frame.header.timestamp),
            token: frame.token_candidate(),
        }
    }

    /// Decode a datagram as a hello reply. No token is needed.
    pub fn parse(datagram: &[u8]) -> Result<Self> {
        Frame::decode(datagram, None).map(|frame| Self::from_frame(&frame))
    }

    /// Request counter seed derived from the device timestamp.
    pub fn sequence_seed(&self) -> u32 {
        self.timestamp.map_or(0, |ts| ts % SEQUENCE_SEED_MODULUS)
    }
}

/// Broadcast address of every non-loopback IPv4 interface, with `port`.
///
/// Returns an empty list when interfaces cannot be enumerated.
pub fn broadcast_targets(port: u16) -> Vec<SocketAddr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate network interfaces");
            return Vec::new();
        }
    };

    let mut targets = Vec::new();
    for iface in interfaces.into_iter().filter(|i| !i.is_loopback()) {
        if let IfAddr::V4(v4) = iface.addr {
            let broadcast = v4
                .broadcast
                .unwrap_or_else(|| directed_broadcast(v4.ip, v4.netmask));
            let target = SocketAddr::new(IpAddr::V4(broadcast), port);
            if !targets.contains(&target) {
                debug!(interface = %iface.name, %target, "Discovery target");
                targets.push(target);
            }
        }
    }
    targets
}

fn directed_broadcast(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(netmask))
}
