//! Longest-prefix-match lookup throughput for the IP-only fast path.

use aegis_common::AddressFamily;
use aegis_radix::RadixTree;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn key(host: u32) -> [u8; 4] {
    ((10u32 << 24) | host).to_be_bytes()
}

fn build_tree(n: u32) -> RadixTree<u32> {
    let mut tree = RadixTree::for_family(AddressFamily::V4);
    for i in 0..n {
        tree.add_key(&key(i << 8), 24, i);
    }
    tree
}

fn bench_find_best(c: &mut Criterion) {
    let tree = build_tree(2048);
    let probe = key(1024 << 8 | 7);

    c.bench_function("radix_find_best_2048_entries", |b| {
        b.iter(|| tree.find_best(black_box(&probe)))
    });
}

fn bench_add_key(c: &mut Criterion) {
    c.bench_function("radix_add_key_single", |b| {
        b.iter(|| {
            let mut tree: RadixTree<u32> = RadixTree::for_family(AddressFamily::V4);
            tree.add_key(black_box(&key(0)), 16, 1);
        })
    });
}

criterion_group!(benches, bench_find_best, bench_add_key);
criterion_main!(benches);
