#![no_main]

use libfuzzer_sys::fuzz_target;
use miio_protocol::core::packet::Frame;
use miio_protocol::core::token::Token;
use miio_protocol::protocol::message::Response;

fuzz_target!(|data: &[u8]| {
    // Frame decoding and reply parsing must never panic on hostile datagrams
    let token = Token::from([0x5Au8; 16]);
    if let Ok(frame) = Frame::decode(data, Some(&token)) {
        if let Some(text) = frame.payload {
            let _ = Response::from_json(&text);
        }
    }
    let _ = Frame::decode(data, None);
});
