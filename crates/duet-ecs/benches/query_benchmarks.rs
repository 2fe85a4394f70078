//! Query index benchmarks.
//!
//! Measures the cost of keeping registered result sets current while entities
//! churn, and the cost of reading a result set compared with an ad hoc scan.
//!
//! Run with: `cargo bench --bench query_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use duet_ecs::prelude::*;

// ---------------------------------------------------------------------------
// Benchmark component types
// ---------------------------------------------------------------------------

duet_ecs::component! {
    struct Transform: 191, "transform" {
        x: f32 = 0.0,
        y: f32 = 0.0,
    }
}

duet_ecs::component! {
    struct Rigidbody: 195, "rigidbody" {
        vx: f32 = 0.0,
        vy: f32 = 0.0,
    }
}

duet_ecs::component! {
    struct Player: 0, "player" {
        index: u8 = 0,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A world with `count` entities and the three queries a typical system set
/// registers.
fn setup_world(count: usize) -> (World, Vec<EntityId>, Vec<QueryKey>) {
    let mut world = World::with_seed(7);
    let keys = vec![
        world.register_query(&Query::all().with::<Transform>()),
        world.register_query(&Query::all().with::<Transform>().with::<Rigidbody>()),
        world.register_query(&Query::all().with::<Player>().with::<Rigidbody>()),
    ];
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let e = world.create();
        world
            .add(&e, Transform { x: i as f32, y: 0.0 })
            .expect("fresh entity");
        if i % 2 == 0 {
            world.add(&e, Rigidbody::default()).expect("fresh entity");
        }
        ids.push(e);
    }
    (world, ids, keys)
}

// ---------------------------------------------------------------------------
// Benchmark 1: structural churn
// ---------------------------------------------------------------------------

fn bench_component_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_churn");

    for &count in &[100usize, 1000, 5000] {
        let (mut world, ids, _keys) = setup_world(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                for e in ids.iter().step_by(10) {
                    world.add(e, Player::default()).expect("live entity");
                    world.remove_component::<Player>(e).expect("live entity");
                }
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark 2: indexed read vs. scan
// ---------------------------------------------------------------------------

fn bench_indexed_vs_scan(c: &mut Criterion) {
    let (world, _ids, keys) = setup_world(5000);
    let query = Query::all().with::<Transform>().with::<Rigidbody>();

    c.bench_function("query_indexed_5k", |b| {
        b.iter(|| black_box(world.query_members(&keys[1]).map(|m| m.len())));
    });
    c.bench_function("query_scan_5k", |b| {
        b.iter(|| black_box(world.scan(&query).len()));
    });
}

// ---------------------------------------------------------------------------
// Benchmark 3: state hash
// ---------------------------------------------------------------------------

fn bench_state_hash(c: &mut Criterion) {
    let (world, _ids, _keys) = setup_world(1000);
    c.bench_function("state_hash_1k", |b| {
        b.iter(|| black_box(world.state_hash()));
    });
}

criterion_group!(
    benches,
    bench_component_churn,
    bench_indexed_vs_scan,
    bench_state_hash,
);
criterion_main!(benches);
