use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cabkit::checksum::checksum;
use cabkit::wildcard::matches;

fn bench_checksum(c: &mut Criterion) {
    let block = vec![0xA5u8; 32768 + 4];
    let tail = vec![0x5Au8; 32768 + 7];

    c.bench_function("checksum_full_block", |b| {
        b.iter(|| checksum(black_box(&block), 0))
    });
    c.bench_function("checksum_ragged_tail", |b| {
        b.iter(|| checksum(black_box(&tail), 0))
    });
}

fn bench_wildcard(c: &mut Criterion) {
    c.bench_function("wildcard_literal", |b| {
        b.iter(|| matches(black_box("kernel32.dll"), black_box("kernel32.dll"), true))
    });
    c.bench_function("wildcard_backtracking", |b| {
        b.iter(|| matches(black_box("abc..de...fgh"), black_box("*de*f*"), true))
    });
}

criterion_group!(benches, bench_checksum, bench_wildcard);
criterion_main!(benches);
