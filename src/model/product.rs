//! Product models: a clustering prior plus one feature model per feature.

use serde::{Deserialize, Serialize};
use special::Gamma;

use super::feature::{FeatureModel, FeatureStats};
use crate::data::Value;

// =============================================================================
// Clustering
// =============================================================================

/// Chinese Restaurant Process prior over the groups of one kind.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Clustering {
    /// Concentration parameter.
    pub alpha: f64,
}

impl Default for Clustering {
    fn default() -> Self {
        Self { alpha: 1.0 }
    }
}

impl Clustering {
    /// Candidate concentrations for grid inference.
    pub const ALPHA_GRID: [f64; 11] = [0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0];

    /// Prior log weight of joining a group of `count` rows.
    ///
    /// Empty groups share the new-group mass equally.
    #[inline]
    pub fn score_group(&self, count: usize, empty_group_count: usize) -> f64 {
        if count == 0 {
            (self.alpha / empty_group_count as f64).ln()
        } else {
            (count as f64).ln()
        }
    }

    /// Log probability of a partition with the given non-empty group sizes.
    pub fn log_partition_prob(&self, counts: impl IntoIterator<Item = usize>) -> f64 {
        let mut total = 0usize;
        let mut score = 0.0;
        for count in counts.into_iter().filter(|&c| c > 0) {
            total += count;
            score += self.alpha.ln() + ln_gamma(count as f64);
        }
        score + ln_gamma(self.alpha) - ln_gamma(self.alpha + total as f64)
    }
}

#[inline]
fn ln_gamma(x: f64) -> f64 {
    Gamma::ln_gamma(x).0
}

// =============================================================================
// ProductModel
// =============================================================================

/// Shared (per kind) model: a clustering prior and per-feature priors.
///
/// Feature indices are local to whatever value space the model scores: kind
/// local for a kind's partial model, global for the full model used by the
/// kind-structure search.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductModel {
    pub clustering: Clustering,
    pub features: Vec<FeatureModel>,
}

impl ProductModel {
    pub fn new(clustering: Clustering, features: Vec<FeatureModel>) -> Self {
        Self {
            clustering,
            features,
        }
    }

    /// Number of features.
    #[inline]
    pub fn dim(&self) -> usize {
        self.features.len()
    }

    /// Statistics of a group holding no rows.
    pub fn empty_group(&self) -> Group {
        Group {
            count: 0,
            stats: self.features.iter().map(FeatureModel::empty_stats).collect(),
        }
    }
}

// =============================================================================
// Group
// =============================================================================

/// One mixture component: a row count and per-feature sufficient statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub count: usize,
    pub stats: Vec<FeatureStats>,
}

impl Group {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn add_value(&mut self, value: &Value) {
        self.count += 1;
        for (featureid, datum) in value.iter() {
            self.stats[*featureid].add(datum);
        }
    }

    pub fn remove_value(&mut self, value: &Value) {
        assert!(self.count > 0, "removing a value from an empty group");
        self.count -= 1;
        for (featureid, datum) in value.iter() {
            self.stats[*featureid].remove(datum);
        }
    }

    /// Sum of posterior predictive scores of the observed entries.
    pub fn score_value(&self, model: &ProductModel, value: &Value) -> f64 {
        value
            .iter()
            .map(|(featureid, datum)| model.features[*featureid].score_value(&self.stats[*featureid], datum))
            .sum()
    }

    /// Sum over features of each feature's log marginal likelihood.
    pub fn log_marginal(&self, model: &ProductModel) -> f64 {
        model
            .features
            .iter()
            .zip(&self.stats)
            .map(|(feature, stats)| feature.log_marginal(stats))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Datum, FeatureType};
    use approx::assert_relative_eq;

    #[test]
    fn test_score_group_splits_new_group_mass() {
        let crp = Clustering { alpha: 2.0 };
        assert_relative_eq!(crp.score_group(0, 2), 0.0);
        assert_relative_eq!(crp.score_group(3, 2), 3f64.ln());
    }

    #[test]
    fn test_log_partition_prob_matches_sequential_crp() {
        // Sequential CRP seating of sizes [2, 1] in order a, a, b.
        let crp = Clustering { alpha: 1.5 };
        let sequential = (1.5f64 / 1.5).ln() + (1.0f64 / 2.5).ln() + (1.5f64 / 3.5).ln();
        assert_relative_eq!(crp.log_partition_prob([2, 1, 0]), sequential, epsilon = 1e-12);
    }

    #[test]
    fn test_group_add_remove() {
        let model = ProductModel::new(
            Clustering::default(),
            vec![
                FeatureModel::default_for(FeatureType::Boolean),
                FeatureModel::default_for(FeatureType::Count),
            ],
        );
        let mut group = model.empty_group();
        let value = Value::new(vec![(0, Datum::Boolean(true)), (1, Datum::Count(3))]);
        group.add_value(&value);
        assert_eq!(group.count, 1);
        group.remove_value(&value);
        assert_eq!(group, model.empty_group());
    }
}
