//! Channel read/write performance benchmarks

use axon_shared_memory::{EventBus, ShmChannel};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

/// Benchmark locked writes for different payload sizes
fn bench_channel_write(c: &mut Criterion) {
    let name = format!("/axon_bench_write_{}", std::process::id());
    let chan = ShmChannel::create(&name, 65536).unwrap();

    let data_64 = vec![0xAAu8; 64];
    let data_1k = vec![0xAAu8; 1024];
    let data_4k = vec![0xAAu8; 4096];

    c.bench_function("channel_write_64_bytes", |b| {
        b.iter(|| {
            black_box(chan.write(&data_64, 0).unwrap());
        });
    });

    c.bench_function("channel_write_1k_bytes", |b| {
        b.iter(|| {
            black_box(chan.write(&data_1k, 0).unwrap());
        });
    });

    c.bench_function("channel_write_4k_bytes", |b| {
        b.iter(|| {
            black_box(chan.write(&data_4k, 0).unwrap());
        });
    });
}

/// Benchmark locked reads through a second attachment
fn bench_channel_read(c: &mut Criterion) {
    let name = format!("/axon_bench_read_{}", std::process::id());
    let owner = ShmChannel::create(&name, 65536).unwrap();
    let reader = ShmChannel::open(&name).unwrap();

    owner.write(&vec![0xAAu8; 4096], 0).unwrap();
    let mut buf_64 = vec![0u8; 64];
    let mut buf_4k = vec![0u8; 4096];

    c.bench_function("channel_read_64_bytes", |b| {
        b.iter(|| {
            reader.read_into(black_box(&mut buf_64), 0).unwrap();
        });
    });

    c.bench_function("channel_read_4k_bytes", |b| {
        b.iter(|| {
            reader.read_into(black_box(&mut buf_4k), 0).unwrap();
        });
    });
}

/// Benchmark the publish-side notification pair: write then trigger
fn bench_write_and_trigger(c: &mut Criterion) {
    let chan_name = format!("/axon_bench_pub_{}", std::process::id());
    let bus_name = format!("/axon_bench_bus_{}", std::process::id());
    let chan = ShmChannel::create(&chan_name, 1024).unwrap();
    let bus = EventBus::create(&bus_name).unwrap();
    let data = vec![0x5Au8; 256];

    c.bench_function("write_then_trigger", |b| {
        b.iter(|| {
            chan.write(&data, 0).unwrap();
            bus.trigger(black_box(7)).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_channel_write,
    bench_channel_read,
    bench_write_and_trigger
);
criterion_main!(benches);
