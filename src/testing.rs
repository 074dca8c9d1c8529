//! Synthetic data and assertion helpers shared by tests and benches.
//!
//! # Usage
//!
//! ```
//! use crosscats::testing::{mixed_schema, synthetic_log};
//!
//! let schema = mixed_schema(2, 1, 1);
//! let log = synthetic_log(&schema, 50, 3, 0.8, 42);
//! assert_eq!(log.len(), 50);
//! assert!(log.validate(&schema).is_ok());
//! ```

use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Poisson};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::data::{Datum, FeatureType, Row, RowLog, Schema, Value};
use crate::model::{Group, Mixture};

// =============================================================================
// Data generators
// =============================================================================

/// Schema with `booleans` boolean, then `counts` count, then `reals` real
/// features.
pub fn mixed_schema(booleans: usize, counts: usize, reals: usize) -> Schema {
    let mut features = vec![FeatureType::Boolean; booleans];
    features.extend(std::iter::repeat(FeatureType::Count).take(counts));
    features.extend(std::iter::repeat(FeatureType::Real).take(reals));
    Schema::new(features)
}

/// Rows drawn from `clusters` well separated clusters, each cell observed
/// with probability `density`. Row `i` belongs to cluster `i % clusters`.
pub fn synthetic_log(schema: &Schema, rows: usize, clusters: usize, density: f64, seed: u64) -> RowLog {
    assert!(clusters > 0, "need at least one cluster");
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let rows = (0..rows)
        .map(|i| {
            let cluster = i % clusters;
            let mut value = Value::empty();
            for (featureid, &ftype) in schema.features().iter().enumerate() {
                if rng.gen_bool(density) {
                    value.push(featureid, cluster_datum(ftype, cluster, clusters, &mut rng));
                }
            }
            Row::new(i as u64, value)
        })
        .collect();
    RowLog::from_rows(rows).expect("generated row ids increase")
}

fn cluster_datum<R: Rng>(ftype: FeatureType, cluster: usize, clusters: usize, rng: &mut R) -> Datum {
    let position = (cluster as f64 + 0.5) / clusters as f64;
    match ftype {
        FeatureType::Boolean => Datum::Boolean(rng.gen_bool(0.1 + 0.8 * position)),
        FeatureType::Count => {
            let lambda = 1.0 + 8.0 * position;
            let poisson = Poisson::new(lambda).expect("lambda is positive");
            Datum::Count(poisson.sample(rng) as u32)
        }
        FeatureType::Real => {
            let normal = Normal::new(10.0 * position - 5.0, 0.5).expect("sigma is positive");
            Datum::Real(normal.sample(rng))
        }
    }
}

// =============================================================================
// Assertions
// =============================================================================

/// Assert two mixtures hold the same non-empty groups, ignoring group order
/// and ids.
///
/// Statistics are compared exactly, so this suits boolean data; float
/// statistics drift under add/remove.
///
/// # Panics
///
/// Panics if some non-empty group of one mixture has no equal partner in
/// the other.
pub fn assert_same_groups(left: &Mixture, right: &Mixture) {
    let nonempty = |m: &Mixture| -> Vec<Group> { m.groups().iter().filter(|g| !g.is_empty()).cloned().collect() };
    let left = nonempty(left);
    let mut right = nonempty(right);
    assert_eq!(left.len(), right.len(), "different number of non-empty groups");
    for group in &left {
        let pos = right
            .iter()
            .position(|g| g == group)
            .unwrap_or_else(|| panic!("group {group:?} has no partner"));
        right.swap_remove(pos);
    }
}
