//! # Archetype Creation & Search Benchmarks
//!
//! The interesting property: filtering by archetype depends on how many
//! entities *match*, not on how many entities exist. The ignore-count
//! sweep makes regressions on that front obvious.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde::{Deserialize, Serialize};

use leyline_core::{Component, Filter, MemoryStore, Search, World, WorldConfig};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Alpha {
    n: u64,
}

impl Component for Alpha {
    const NAME: &'static str = "alpha";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Beta {
    n: u64,
}

impl Component for Beta {
    const NAME: &'static str = "beta";
}

fn bench_world() -> World {
    let mut world = World::new(Box::new(MemoryStore::new()), WorldConfig::new("bench")).unwrap();
    world.register_component::<Alpha>().unwrap();
    world.register_component::<Beta>().unwrap();
    world.load_game_state().unwrap();
    world
}

fn bench_entity_creation(c: &mut Criterion) {
    c.bench_function("create_10k_entities", |b| {
        b.iter(|| {
            let mut world = bench_world();
            let mut ctx = world.context();
            let ids = ctx.create_many(10_000, (Alpha::default(),)).unwrap();
            black_box(ids.len())
        });
    });
}

fn bench_filtered_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("exact_filter_vs_ignored_entities");
    let relevant = 100;

    for ignored in [10usize, 100, 1_000, 10_000] {
        let mut world = bench_world();
        {
            let mut ctx = world.context();
            ctx.create_many(relevant, (Alpha::default(), Beta::default()))
                .unwrap();
            ctx.create_many(ignored, (Alpha::default(),)).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(ignored), &ignored, |b, _| {
            let mut ctx = world.context();
            let both = ctx.component_set::<(Alpha, Beta)>().unwrap();
            let mut search = Search::new(Filter::exact(both));
            b.iter(|| {
                let mut count = 0usize;
                search
                    .each(&mut ctx, |_ctx, _id| {
                        count += 1;
                        true
                    })
                    .unwrap();
                assert_eq!(count, relevant);
                black_box(count)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_entity_creation, bench_filtered_iteration);
criterion_main!(benches);
