//! Property-based tests using proptest
//!
//! These tests check the frame codec invariants over randomly generated
//! tokens, identities and payloads.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use miio_protocol::core::packet::{Frame, FrameHeader, HEADER_LEN};
use miio_protocol::core::token::Token;
use miio_protocol::protocol::message::{Command, Params};
use miio_protocol::transport::SequenceCounter;
use miio_protocol::MiioError;
use proptest::prelude::*;

fn token_strategy() -> impl Strategy<Value = Token> {
    prop::array::uniform16(any::<u8>())
        .prop_filter("not a sentinel", |b| {
            !b.iter().all(|&x| x == 0) && !b.iter().all(|&x| x == 0xFF)
        })
        .prop_map(Token::from)
}

fn identity_strategy() -> impl Strategy<Value = (u32, u32)> {
    (0..u32::MAX, 0..u32::MAX)
}

// Printable ASCII keeps the payload free of NUL bytes
fn payload_strategy() -> impl Strategy<Value = String> {
    "[ -~]{1,512}"
}

// Property: a payload frame decodes under the token it was encoded with
proptest! {
    #[test]
    fn prop_frame_roundtrip(
        token in token_strategy(),
        (device_id, timestamp) in identity_strategy(),
        payload in payload_strategy(),
    ) {
        let frame = Frame::new(FrameHeader::normal(device_id, timestamp), Some(payload.clone()));
        let bytes = frame.encode(&token).unwrap();

        prop_assert_eq!(bytes.len() % 16, 0);
        prop_assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]) as usize, bytes.len());

        let decoded = Frame::decode(&bytes, Some(&token)).unwrap();
        prop_assert_eq!(decoded.header, frame.header);
        prop_assert_eq!(decoded.payload, Some(payload));
    }
}

// Property: encoding is deterministic, so retransmissions are byte-identical
proptest! {
    #[test]
    fn prop_encoding_deterministic(
        token in token_strategy(),
        (device_id, timestamp) in identity_strategy(),
        payload in payload_strategy(),
    ) {
        let frame = Frame::new(FrameHeader::normal(device_id, timestamp), Some(payload));
        prop_assert_eq!(frame.encode(&token).unwrap(), frame.encode(&token).unwrap());
    }
}

// Property: flipping any single byte of a payload frame makes it undecodable
proptest! {
    #[test]
    fn prop_single_byte_flip_rejected(
        token in token_strategy(),
        (device_id, timestamp) in identity_strategy(),
        payload in payload_strategy(),
        index in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let frame = Frame::new(FrameHeader::normal(device_id, timestamp), Some(payload));
        let mut bytes = frame.encode(&token).unwrap();
        let i = index.index(bytes.len());
        bytes[i] ^= mask;

        prop_assert!(Frame::decode(&bytes, Some(&token)).is_err());
    }
}

// Property: a different token fails the checksum
proptest! {
    #[test]
    fn prop_wrong_token_rejected(
        token in token_strategy(),
        other in token_strategy(),
        payload in payload_strategy(),
    ) {
        prop_assume!(token != other);
        let frame = Frame::new(FrameHeader::normal(1, 2), Some(payload));
        let bytes = frame.encode(&token).unwrap();

        let result = Frame::decode(&bytes, Some(&other));
        prop_assert!(matches!(result, Err(MiioError::ChecksumMismatch)));
    }
}

// Property: hello frames carry the token literally and need no key to decode
proptest! {
    #[test]
    fn prop_hello_frames_carry_literal_token(
        token in token_strategy(),
        payload in prop::option::of(payload_strategy()),
    ) {
        let frame = Frame::new(FrameHeader::HELLO, payload.clone());
        let bytes = frame.encode(&token).unwrap();
        prop_assert_eq!(&bytes[16..HEADER_LEN], token.as_bytes());

        let decoded = Frame::decode(&bytes, None).unwrap();
        prop_assert!(decoded.header.is_hello());
        prop_assert_eq!(decoded.payload, payload);
    }
}

// Property: short datagrams and foreign magic never decode
proptest! {
    #[test]
    fn prop_garbage_rejected(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let result = Frame::decode(&data, Some(&Token::new(vec![1; 16])));
        if data.len() < HEADER_LEN || data[..2] != [0x21, 0x31] {
            prop_assert!(matches!(result, Err(MiioError::InvalidFrame(_))));
        }
    }
}

// Property: request ids stay in 1..10000 no matter where the counter starts
proptest! {
    #[test]
    fn prop_sequence_stays_in_range(seed in any::<u32>(), steps in 1usize..20_000) {
        let mut counter = SequenceCounter::starting_at(seed);
        let mut previous = counter.current();
        for _ in 0..steps {
            let id = counter.next();
            prop_assert!((1..10_000).contains(&id));
            prop_assert!(id == previous + 1 || (previous == 9999 && id == 1));
            previous = id;
        }
    }
}

// Property: commands survive the JSON layer with their parameter shape
proptest! {
    #[test]
    fn prop_command_json_roundtrip(
        id in any::<u32>(),
        method in "[a-z_.]{1,24}",
        values in prop::collection::vec(any::<i64>(), 1..8),
    ) {
        let params = Params::List(values.into_iter().map(serde_json::Value::from).collect());
        let cmd = Command::new(id, method, params);
        let back = Command::from_json(&cmd.to_json().unwrap()).unwrap();
        prop_assert_eq!(back, cmd);
    }
}
