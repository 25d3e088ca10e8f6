//! Benchmarks for ballot boxes and resolved views

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fvr_benchmarks::{baseline_data, field_path, random_users};
use fvr_core::{FieldPath, LocaleId, UserId};
use fvr_manager::{FactoryConfig, VettingFactory};
use fvr_storage::{InMemoryUserDirectory, InMemoryVoteStore};
use std::sync::Arc;

const NUM_PATHS: usize = 200;
const NUM_USERS: usize = 50;

fn factory(locale: &LocaleId) -> VettingFactory {
    VettingFactory::new(
        FactoryConfig::default(),
        Arc::new(InMemoryUserDirectory::from_users(random_users(1, NUM_USERS))),
        Arc::new(baseline_data(locale, NUM_PATHS).unwrap()),
        Arc::new(InMemoryVoteStore::new()),
    )
    .unwrap()
}

fn paths() -> Vec<FieldPath> {
    (0..NUM_PATHS).map(|i| field_path(i).unwrap()).collect()
}

/// Casting votes, each one invalidating the field's cached resolution
fn bench_cast_votes(c: &mut Criterion) {
    let de = LocaleId::parse("de").unwrap();
    let factory = factory(&de);
    let ballot_box = factory.ballot_box(&de).unwrap();
    let paths = paths();
    let mut round = 0usize;

    c.bench_function("vote_for_value", |b| {
        b.iter(|| {
            round += 1;
            let user = UserId((round % NUM_USERS) as u32 + 1);
            let path = &paths[round % NUM_PATHS];
            let value = format!("v{}", round % 3);
            black_box(ballot_box.vote_for_value(user, path, Some(&value)).unwrap());
        });
    });
}

/// Reading a view whose fields are already cached versus freshly invalidated
fn bench_view_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("ViewReads");
    let de = LocaleId::parse("de").unwrap();
    let factory = factory(&de);
    let ballot_box = factory.ballot_box(&de).unwrap();
    let paths = paths();

    for (i, path) in paths.iter().enumerate() {
        for user in 1..=5u32 {
            let value = format!("v{}", (i + user as usize) % 2);
            ballot_box.vote_for_value(UserId(user), path, Some(&value)).unwrap();
        }
    }

    let view = factory.resolved_view(&de).unwrap();
    group.bench_function("snapshot_cached", |b| {
        view.snapshot();
        b.iter(|| black_box(view.snapshot()));
    });

    group.bench_function("snapshot_cold", |b| {
        b.iter(|| {
            factory.invalidate_locale(&de);
            black_box(view.snapshot())
        });
    });

    group.finish();
}

/// Parent-chain substitution for locales that inherit every field
fn bench_inheritance(c: &mut Criterion) {
    let mut group = c.benchmark_group("Inheritance");
    let de = LocaleId::parse("de").unwrap();
    let factory = factory(&de);
    let path = field_path(0).unwrap();

    for locale in ["de_CH", "de_Latn_CH"].iter() {
        let child = LocaleId::parse(locale).unwrap();
        group.bench_with_input(BenchmarkId::new("resolve", locale), &child, |b, child| {
            b.iter(|| black_box(factory.resolve(child, &path).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cast_votes, bench_view_reads, bench_inheritance);
criterion_main!(benches);
