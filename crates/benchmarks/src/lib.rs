//! Benchmarks for the Field Vetting Resolver
//!
//! Seeded generators for ballots, users and baseline data shared by the
//! criterion benches.

use chrono::{DateTime, Duration, TimeZone, Utc};
use fvr_core::{FieldPath, Level, LocaleId, Organization, User, UserId};
use fvr_resolver::{Ballot, Baseline, Status};
use fvr_storage::InMemoryBaseline;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub use fvr_core;
pub use fvr_manager;
pub use fvr_resolver;
pub use fvr_storage;

const ORGANIZATIONS: [&str; 6] = ["acme", "globex", "initech", "umbrella", "hooli", "stark"];

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200, 0).single().unwrap_or_default()
}

fn level_for(rng: &mut StdRng) -> Level {
    match rng.gen_range(0..10) {
        0..=5 => Level::Street,
        6..=8 => Level::Vetter,
        _ => Level::Tc,
    }
}

fn weight_of(level: Level) -> u32 {
    match level {
        Level::Street => 1,
        Level::Vetter | Level::Manager => 4,
        Level::Tc => 8,
        Level::Admin => 100,
        Level::Locked | Level::Anonymous => 0,
    }
}

/// `count` ballots spread over `distinct_values` candidate values
pub fn random_ballots(seed: u64, count: usize, distinct_values: usize) -> Vec<Ballot> {
    let mut rng = StdRng::seed_from_u64(seed);
    let distinct_values = distinct_values.max(1);

    (0..count)
        .map(|i| {
            let level = level_for(&mut rng);
            Ballot {
                voter: UserId(i as u32 + 1),
                organization: Organization::new(ORGANIZATIONS[rng.gen_range(0..ORGANIZATIONS.len())]),
                level,
                weight: weight_of(level),
                value: format!("value-{}", rng.gen_range(0..distinct_values)),
                cast_at: epoch() + Duration::seconds(rng.gen_range(0..86_400)),
            }
        })
        .collect()
}

pub fn baseline() -> Baseline {
    Baseline::new("value-0", Status::Approved)
}

/// Users with ids `1..=count`, all allowed to vote everywhere
pub fn random_users(seed: u64, count: usize) -> Vec<User> {
    let mut rng = StdRng::seed_from_u64(seed);
    (1..=count)
        .map(|id| {
            let level = level_for(&mut rng);
            let org = ORGANIZATIONS[rng.gen_range(0..ORGANIZATIONS.len())];
            User::new(id as u32, format!("user-{}", id), org, level)
        })
        .collect()
}

pub fn field_path(index: usize) -> fvr_core::Result<FieldPath> {
    FieldPath::parse(&format!("//ldml/bench/field[@id=\"{}\"]", index))
}

/// Baseline data with `paths` approved values in `locale` and root
pub fn baseline_data(locale: &LocaleId, paths: usize) -> fvr_core::Result<InMemoryBaseline> {
    let mut data = InMemoryBaseline::new();
    for i in 0..paths {
        let path = field_path(i)?;
        data = data
            .with_value(LocaleId::root(), path.clone(), format!("root-{}", i), Status::Approved)
            .with_value(locale.clone(), path, format!("value-{}", i), Status::Approved);
    }
    Ok(data)
}
