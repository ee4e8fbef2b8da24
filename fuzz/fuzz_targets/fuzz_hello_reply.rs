#![no_main]

use libfuzzer_sys::fuzz_target;
use miio_protocol::protocol::handshake::HelloReply;

fuzz_target!(|data: &[u8]| {
    if let Ok(reply) = HelloReply::parse(data) {
        let _ = reply.sequence_seed();
    }
});
