use std::hint::black_box;

use bevy_symbios_structure::builder::{StructureBuilder, build_structure};
use bevy_symbios_structure::config::BuildConfig;
use bevy_symbios_structure::position::PositionSource;
use bevy_symbios_structure::rule::{Distribution, StructureRule};
use bevy_symbios_structure::structure::StructureForest;
use criterion::{Criterion, criterion_group, criterion_main};

/// Trunk, two branch levels and a leaf level.
fn three_level_rules() -> StructureRule {
    let leaves = StructureRule {
        min_frequency: 8,
        max_frequency: 12,
        distribution: Distribution::Opposite,
        ..StructureRule::sprout(4)
    };
    let twigs = StructureRule {
        min_frequency: 4,
        max_frequency: 6,
        spacing_variance: 0.3,
        ..StructureRule::branch(2)
    }
    .with_child(leaves);
    let limbs = StructureRule {
        min_frequency: 6,
        max_frequency: 9,
        distribution: Distribution::Whorled,
        children_per_node: 3,
        ..StructureRule::branch(1)
    }
    .with_child(twigs);
    StructureRule::root().with_child(limbs)
}

fn bench_generate(c: &mut Criterion) {
    let rules = three_level_rules();
    let positions = PositionSource::default();
    c.bench_function("generate_three_levels", |b| {
        b.iter(|| {
            let mut builder =
                StructureBuilder::new(&rules, &positions, BuildConfig::with_seed(black_box(7)))
                    .unwrap();
            builder.generate(StructureForest::default())
        })
    });
}

fn bench_full_pass(c: &mut Criterion) {
    let rules = three_level_rules();
    let positions = PositionSource::default();
    c.bench_function("generate_and_materialize", |b| {
        b.iter(|| {
            build_structure(
                &rules,
                StructureForest::default(),
                &positions,
                BuildConfig::with_seed(black_box(7)),
            )
        })
    });
}

fn bench_regenerate_tuned(c: &mut Criterion) {
    let rules = three_level_rules();
    let positions = PositionSource::default();
    let mut prior = build_structure(
        &rules,
        StructureForest::default(),
        &positions,
        BuildConfig::with_seed(7),
    )
    .unwrap()
    .forest;
    let tuned: Vec<u32> = prior.roots[0].children.iter().take(2).map(|s| s.id).collect();
    for id in tuned {
        prior.commit(id).unwrap();
    }
    c.bench_function("regenerate_with_tuned", |b| {
        b.iter(|| {
            build_structure(
                &rules,
                black_box(prior.clone()),
                &positions,
                BuildConfig::with_seed(11),
            )
        })
    });
}

criterion_group!(benches, bench_generate, bench_full_pass, bench_regenerate_tuned);
criterion_main!(benches);
