//! Patch encoding benchmarks.
//!
//! Measures a delta emission when a small share of a populated world moved
//! since the last one, and the client-side apply of that delta.
//!
//! Run with: `cargo bench --bench patch_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use duet_ecs::prelude::*;
use duet_sync::prelude::*;

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

fn setup(count: usize) -> (World, Vec<EntityId>) {
    let mut world = World::with_seed(3);
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let e = world.create();
        world
            .add(&e, Transform { x: i as f32, y: 0.0 })
            .expect("fresh entity");
        world.add(&e, Rigidbody::default()).expect("fresh entity");
        ids.push(e);
    }
    (world, ids)
}

/// Move every tenth entity.
fn churn(world: &mut World, ids: &[EntityId], step: f32) {
    for id in ids.iter().step_by(10) {
        world.get_mut::<Transform>(id).expect("live entity").y += step;
    }
}

fn bench_encode_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_delta");
    for count in [100usize, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let (mut world, ids) = setup(count);
            let room = RoomState::new();
            let mut encoder = PatchEncoder::new();
            encoder.encode(0, &world, &room);
            let mut tick = 0u64;
            b.iter(|| {
                tick += 1;
                churn(&mut world, &ids, 0.5);
                black_box(encoder.encode(tick, &world, &room))
            });
        });
    }
    group.finish();
}

fn bench_apply_delta(c: &mut Criterion) {
    let mut catalog = ComponentCatalog::new();
    catalog.register::<Transform>(TypeOrigin::Engine).expect("fresh catalog");
    catalog.register::<Rigidbody>(TypeOrigin::Engine).expect("fresh catalog");

    let mut group = c.benchmark_group("apply_delta");
    for count in [100usize, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let (mut world, ids) = setup(count);
            let room = RoomState::new();
            let mut encoder = PatchEncoder::new();
            let full = encoder.encode(0, &world, &room).expect("populated world");
            let mut client = World::new();
            let mut mirror = Mirror::new();
            mirror
                .apply(&full, &mut WorldSink::new(&mut client, &catalog))
                .expect("in order");
            let mut tick = 0u64;
            b.iter(|| {
                tick += 1;
                churn(&mut world, &ids, 0.5);
                let patch = encoder.encode(tick, &world, &room).expect("moved entities");
                mirror
                    .apply(&patch, &mut WorldSink::new(&mut client, &catalog))
                    .expect("in order");
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode_delta, bench_apply_delta);
criterion_main!(benches);
