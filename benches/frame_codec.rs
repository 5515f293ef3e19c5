use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;

use camstream::codec::PacketPool;
use camstream::constants::NO_TIMESTAMP;
use camstream::protocol::{encode_frame, read_frame};

fn build_stream(frames: usize, sample_len: usize) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_frame(&mut buf, NO_TIMESTAMP, &[0x67; 32]);
    for i in 0..frames {
        encode_frame(&mut buf, i as u64 * 33_333, &vec![0xAB; sample_len]);
    }
    buf.to_vec()
}

fn bench_read_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_frame");
    const FRAMES: usize = 64;

    for sample_len in [1024usize, 16 * 1024, 256 * 1024] {
        let stream = build_stream(FRAMES, sample_len);
        group.throughput(Throughput::Bytes(stream.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(sample_len), &stream, |b, stream| {
            let pool = PacketPool::new();
            b.iter(|| {
                let mut reader = Cursor::new(stream.as_slice());
                for _ in 0..FRAMES {
                    let packet = read_frame(&mut reader, &pool).unwrap();
                    black_box(packet.used());
                    pool.push_empty(packet);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_read_frame);
criterion_main!(benches);
