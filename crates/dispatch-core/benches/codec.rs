//! Frame codec benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dispatch_core::{Frame, FrameReader};

const EVENT_BODY: &str = r#"{"id":42,"status":"EN_ROUTE","liveLocation":{"latitude":31.52,"longitude":74.35},"patient":{"firstName":"Ayesha","lastName":"Khan"},"pickupAddress":"Mall Road"}"#;

fn encode_benchmark(c: &mut Criterion) {
    let frame = Frame::message("/user/event/42", "event-42", "m-1", EVENT_BODY);

    c.bench_function("encode_message_frame", |b| {
        b.iter(|| black_box(frame.encode()))
    });
}

fn decode_benchmark(c: &mut Criterion) {
    let encoded = Frame::message("/user/event/42", "event-42", "m-1", EVENT_BODY).encode();

    c.bench_function("decode_message_frame", |b| {
        b.iter(|| black_box(Frame::decode(&encoded).unwrap()))
    });
}

fn stream_benchmark(c: &mut Criterion) {
    let mut stream = Vec::new();
    for i in 0..64 {
        let dest = format!("/user/event/{}", i);
        stream.extend_from_slice(&Frame::message(&dest, "event", "m", EVENT_BODY).encode());
        stream.push(b'\n');
    }

    c.bench_function("read_64_frames_with_heartbeats", |b| {
        b.iter(|| {
            let mut reader = FrameReader::new();
            reader.push(&stream);
            let mut count = 0;
            while let Ok(Some(_)) = reader.next() {
                count += 1;
            }
            black_box(count)
        })
    });
}

criterion_group!(benches, encode_benchmark, decode_benchmark, stream_benchmark);
criterion_main!(benches);
