use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use miio_protocol::core::packet::{checksum, Frame, FrameHeader};
use miio_protocol::core::token::Token;
use miio_protocol::protocol::message::{Command, Params};
use serde_json::json;

fn payload_of(size: usize) -> String {
    let filler = "x".repeat(size);
    Command::new(1, "set_properties", Params::List(vec![json!(filler)]))
        .to_json()
        .unwrap_or_default()
}

#[allow(clippy::unwrap_used)]
fn bench_frame_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode_decode");
    let token = Token::random();
    let payload_sizes = [16usize, 256, 1024, 8192];

    for &size in &payload_sizes {
        let payload = payload_of(size);
        group.throughput(Throughput::Bytes(payload.len() as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || Frame::new(FrameHeader::normal(0x0123_4567, 1), Some(payload.clone())),
                |frame| frame.encode(&token).unwrap(),
                BatchSize::SmallInput,
            )
        });

        let encoded = Frame::new(FrameHeader::normal(0x0123_4567, 1), Some(payload.clone()))
            .encode(&token)
            .unwrap();
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter(|| Frame::decode(&encoded, Some(&token)).unwrap())
        });
        group.bench_function(format!("checksum_{size}b"), |b| {
            b.iter(|| checksum(&encoded, &token))
        });
    }
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_payload_cipher(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_cipher");
    let token = Token::random();
    let plain = payload_of(1024).into_bytes();
    let ciphertext = token.encrypt(&plain);

    group.throughput(Throughput::Bytes(plain.len() as u64));
    group.bench_function("encrypt_1k", |b| b.iter(|| token.encrypt(&plain)));
    group.bench_function("decrypt_1k", |b| {
        b.iter(|| token.decrypt(&ciphertext).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_frame_encode_decode, bench_payload_cipher);
criterion_main!(benches);
