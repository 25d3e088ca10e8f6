//! Benchmarks for weighted vote resolution

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fvr_benchmarks::{baseline, random_ballots};
use fvr_resolver::{Ballot, ResolverConfig, VoteResolver};
use std::sync::Arc;

/// Resolution cost as the number of ballots on one field grows
fn bench_resolve_scale(c: &mut Criterion) {
    let mut group = c.benchmark_group("ResolveScale");
    let resolver = VoteResolver::new(ResolverConfig::default());

    for num_ballots in [1, 10, 100, 1000].iter() {
        let ballots: Arc<[Ballot]> = random_ballots(42, *num_ballots, 5).into();

        group.bench_with_input(
            BenchmarkId::new("with_baseline", num_ballots),
            &ballots,
            |b, ballots| {
                b.iter(|| black_box(resolver.resolve(ballots.clone(), Some(baseline()), None)));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("with_inheritance", num_ballots),
            &ballots,
            |b, ballots| {
                b.iter(|| {
                    black_box(resolver.resolve(ballots.clone(), None, Some("value-1".to_string())))
                });
            },
        );
    }

    group.finish();
}

/// Many candidate values competing on one field
fn bench_resolve_spread(c: &mut Criterion) {
    let mut group = c.benchmark_group("ResolveSpread");
    let resolver = VoteResolver::new(ResolverConfig::default());

    for distinct in [2, 20, 200].iter() {
        let ballots: Arc<[Ballot]> = random_ballots(7, 500, *distinct).into();
        group.bench_with_input(BenchmarkId::new("distinct_values", distinct), &ballots, |b, ballots| {
            b.iter(|| black_box(resolver.resolve(ballots.clone(), Some(baseline()), None)));
        });
    }

    group.finish();
}

/// Per-organization queries on an existing resolution
fn bench_organization_queries(c: &mut Criterion) {
    let resolver = VoteResolver::new(ResolverConfig::default());
    let resolution = resolver.resolve(random_ballots(11, 200, 4), Some(baseline()), None);

    c.bench_function("is_disputed", |b| b.iter(|| black_box(resolution.is_disputed())));

    c.bench_function("status_for_organization", |b| {
        let org = fvr_core::Organization::new("acme");
        b.iter(|| black_box(resolution.status_for_organization(&org)))
    });
}

criterion_group!(benches, bench_resolve_scale, bench_resolve_spread, bench_organization_queries);
criterion_main!(benches);
