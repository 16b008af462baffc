use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hivemind_core::closest_swarm;
use hivemind_network::DedupFilter;

fn bench_ring_placement(c: &mut Criterion) {
    let swarm_ids: Vec<u64> = (0..2000u64).map(|i| i.wrapping_mul(0x9E3779B97F4A7C15)).collect();
    let mut sorted = swarm_ids.clone();
    sorted.sort_unstable();

    c.bench_function("closest_swarm/2000_swarms", |b| {
        b.iter(|| {
            for space in [0u64, u64::MAX / 3, u64::MAX - 1] {
                black_box(closest_swarm(&sorted, black_box(space)));
            }
        })
    });
}

fn bench_dedup_filter(c: &mut Criterion) {
    c.bench_function("dedup_filter/check_and_insert_10k", |b| {
        b.iter(|| {
            let mut filter = DedupFilter::new(300, 0);
            for i in 0..10_000u64 {
                let mut value = [0u8; 32];
                value[..8].copy_from_slice(&i.to_le_bytes());
                black_box(filter.check_and_insert(value, 0));
            }
        })
    });
}

criterion_group!(benches, bench_ring_placement, bench_dedup_filter);
criterion_main!(benches);
