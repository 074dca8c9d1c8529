//! Cross-categorization state: a partition of features into kinds, each kind
//! owning a mixture over rows.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use super::feature::FeatureModel;
use super::mixture::Mixture;
use super::product::{Clustering, ProductModel};
use crate::data::{Schema, Value};
use crate::error::EngineError;
use crate::utils::{sample_from_scores, Parallelism};

// =============================================================================
// Kind
// =============================================================================

/// A block of features sharing one row partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kind {
    /// Global feature ids, sorted.
    pub featureids: Vec<usize>,
    /// Kind-local model: feature `i` is global feature `featureids[i]`.
    pub model: ProductModel,
    pub mixture: Mixture,
}

impl Kind {
    pub fn new(featureids: Vec<usize>, model: ProductModel, empty_group_count: usize) -> Self {
        debug_assert!(featureids.windows(2).all(|w| w[0] < w[1]));
        debug_assert_eq!(featureids.len(), model.dim());
        let mixture = Mixture::init_empty(&model, empty_group_count);
        Self {
            featureids,
            model,
            mixture,
        }
    }

    /// A kind with no features. Rows are partitioned by the CRP prior alone.
    pub fn featureless(clustering: Clustering, empty_group_count: usize) -> Self {
        Self::new(Vec::new(), ProductModel::new(clustering, Vec::new()), empty_group_count)
    }

    #[inline]
    pub fn is_featureless(&self) -> bool {
        self.featureids.is_empty()
    }

    /// Restrict a full value to this kind's features, in local ids.
    pub fn project_value(&self, full: &Value, partial: &mut Value) {
        partial.clear();
        for &(featureid, datum) in full.iter() {
            if let Ok(local) = self.featureids.binary_search(&featureid) {
                partial.push(local, datum);
            }
        }
    }

    /// Resample the CRP concentration and each feature's hyperparameters
    /// from their grid posteriors given the current partition.
    pub fn infer_hypers<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let scores: Vec<f64> = Clustering::ALPHA_GRID
            .iter()
            .map(|&alpha| Clustering { alpha }.log_partition_prob(self.mixture.counts()))
            .collect();
        let i = sample_from_scores(rng, &scores);
        self.model.clustering.alpha = Clustering::ALPHA_GRID[i];

        for featureid in 0..self.model.dim() {
            let grid = self.model.features[featureid].hyper_grid();
            let scores: Vec<f64> = grid
                .iter()
                .map(|candidate| {
                    self.mixture
                        .groups()
                        .iter()
                        .filter(|g| !g.is_empty())
                        .map(|g| candidate.log_marginal(&g.stats[featureid]))
                        .sum()
                })
                .collect();
            let i = sample_from_scores(rng, &scores);
            self.model.features[featureid] = grid[i].clone();
        }
    }
}

// =============================================================================
// CrossCat
// =============================================================================

/// Feature partition plus per-kind mixtures.
///
/// Kinds are addressed by packed index. `featureid_to_kindid` and the
/// per-feature local index are derived from the kinds and refreshed with
/// [`reindex`](Self::reindex) after any change to kind membership.
#[derive(Clone, Debug)]
pub struct CrossCat {
    schema: Schema,
    pub(crate) kinds: Vec<Kind>,
    featureid_to_kindid: Vec<usize>,
    featureid_to_local: Vec<usize>,
    kind_alpha: f64,
}

impl CrossCat {
    /// All features in a single kind, default priors.
    pub fn single_kind(schema: Schema, empty_group_count: usize, kind_alpha: f64) -> Self {
        let partition = vec![0; schema.len()];
        Self::from_partition(schema, &partition, empty_group_count, kind_alpha)
            .expect("single kind partition is always valid")
    }

    /// Build kinds from a feature→kind map, using default feature priors.
    ///
    /// Kind ids must be dense: every id in `0..=max` must own a feature.
    pub fn from_partition(
        schema: Schema,
        featureid_to_kindid: &[usize],
        empty_group_count: usize,
        kind_alpha: f64,
    ) -> Result<Self, EngineError> {
        if featureid_to_kindid.len() != schema.len() {
            return Err(EngineError::Schema(format!(
                "partition covers {} features, schema has {}",
                featureid_to_kindid.len(),
                schema.len()
            )));
        }
        let kind_count = featureid_to_kindid.iter().max().map_or(0, |&k| k + 1);
        let mut members = vec![Vec::new(); kind_count];
        for (featureid, &kindid) in featureid_to_kindid.iter().enumerate() {
            members[kindid].push(featureid);
        }
        if let Some(kindid) = members.iter().position(Vec::is_empty) {
            return Err(EngineError::InvalidParameter {
                name: "featureid_to_kindid",
                value: format!("kind {kindid} has no features"),
            });
        }
        let kinds = members
            .into_iter()
            .map(|featureids| {
                let features = featureids
                    .iter()
                    .map(|&f| FeatureModel::default_for(schema.feature_type(f)))
                    .collect();
                Kind::new(featureids, ProductModel::new(Clustering::default(), features), empty_group_count)
            })
            .collect();
        Self::from_kinds(schema, kinds, kind_alpha)
    }

    /// Assemble from existing kinds, checking that they partition the schema.
    pub fn from_kinds(schema: Schema, kinds: Vec<Kind>, kind_alpha: f64) -> Result<Self, EngineError> {
        let mut owner = vec![None; schema.len()];
        for (kindid, kind) in kinds.iter().enumerate() {
            if kind.featureids.len() != kind.model.dim() {
                return Err(EngineError::Schema(format!(
                    "kind {kindid} lists {} features but models {}",
                    kind.featureids.len(),
                    kind.model.dim()
                )));
            }
            for (local, &featureid) in kind.featureids.iter().enumerate() {
                let slot = owner.get_mut(featureid).ok_or_else(|| {
                    EngineError::Schema(format!("kind {kindid} references unknown feature {featureid}"))
                })?;
                if slot.is_some() {
                    return Err(EngineError::Schema(format!("feature {featureid} is in more than one kind")));
                }
                if kind.model.features[local].feature_type() != schema.feature_type(featureid) {
                    return Err(EngineError::Schema(format!("feature {featureid} has the wrong model type")));
                }
                *slot = Some(kindid);
            }
        }
        if let Some(featureid) = owner.iter().position(Option::is_none) {
            return Err(EngineError::Schema(format!("feature {featureid} is in no kind")));
        }
        let mut cross_cat = Self {
            schema,
            kinds,
            featureid_to_kindid: Vec::new(),
            featureid_to_local: Vec::new(),
            kind_alpha,
        };
        cross_cat.reindex();
        Ok(cross_cat)
    }

    #[inline]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[inline]
    pub fn kinds(&self) -> &[Kind] {
        &self.kinds
    }

    #[inline]
    pub fn kind_count(&self) -> usize {
        self.kinds.len()
    }

    #[inline]
    pub fn featureid_to_kindid(&self) -> &[usize] {
        &self.featureid_to_kindid
    }

    #[inline]
    pub fn kind_alpha(&self) -> f64 {
        self.kind_alpha
    }

    /// Recompute the feature lookup tables from the kinds' feature lists.
    pub fn reindex(&mut self) {
        let dim = self.schema.len();
        self.featureid_to_kindid = vec![usize::MAX; dim];
        self.featureid_to_local = vec![usize::MAX; dim];
        for (kindid, kind) in self.kinds.iter().enumerate() {
            for (local, &featureid) in kind.featureids.iter().enumerate() {
                self.featureid_to_kindid[featureid] = kindid;
                self.featureid_to_local[featureid] = local;
            }
        }
    }

    /// Split a full value into one kind-local value per kind.
    ///
    /// `partials` is resized to the kind count and overwritten.
    pub fn value_split(&self, full: &Value, partials: &mut Vec<Value>) {
        partials.resize_with(self.kinds.len(), Value::empty);
        partials.iter_mut().for_each(Value::clear);
        for &(featureid, datum) in full.iter() {
            let kindid = self.featureid_to_kindid[featureid];
            partials[kindid].push(self.featureid_to_local[featureid], datum);
        }
    }

    /// Inverse of [`value_split`](Self::value_split).
    pub fn value_join(&self, partials: &[Value]) -> Value {
        debug_assert_eq!(partials.len(), self.kinds.len());
        let entries = self
            .kinds
            .iter()
            .zip(partials)
            .flat_map(|(kind, partial)| partial.iter().map(|&(local, datum)| (kind.featureids[local], datum)))
            .collect();
        Value::new(entries)
    }

    /// Model over all features in global order, used to score shadow mixtures.
    pub fn full_model(&self) -> ProductModel {
        let features = (0..self.schema.len())
            .map(|featureid| {
                let kind = &self.kinds[self.featureid_to_kindid[featureid]];
                kind.model.features[self.featureid_to_local[featureid]].clone()
            })
            .collect();
        ProductModel::new(Clustering::default(), features)
    }

    /// Resample every kind's hyperparameters, one independent RNG per kind.
    pub fn infer_hypers<R: Rng + ?Sized>(&mut self, rng: &mut R, parallelism: Parallelism) {
        let jobs: Vec<(&mut Kind, u64)> = self.kinds.iter_mut().map(|kind| (kind, rng.gen())).collect();
        parallelism.maybe_par_for_each(jobs, |(kind, seed)| {
            kind.infer_hypers(&mut Xoshiro256PlusPlus::seed_from_u64(seed));
        });
    }

    /// Append a kind with no features. Returns its packed index.
    pub fn add_featureless_kind(&mut self, empty_group_count: usize) -> usize {
        self.kinds.push(Kind::featureless(Clustering::default(), empty_group_count));
        self.kinds.len() - 1
    }

    /// Remove a featureless kind. Later kinds shift down by one.
    pub fn remove_kind(&mut self, kindid: usize) {
        assert!(self.kinds[kindid].is_featureless(), "only featureless kinds can be removed");
        self.kinds.remove(kindid);
        self.reindex();
    }

    /// Replace every kind's feature list and model in one step.
    ///
    /// Mixtures are left to the caller, which must re-derive them for the new
    /// feature lists.
    pub(crate) fn set_kind_features(&mut self, featureid_to_kindid: &[usize], full_model: &ProductModel) {
        for kind in &mut self.kinds {
            kind.featureids.clear();
        }
        for (featureid, &kindid) in featureid_to_kindid.iter().enumerate() {
            self.kinds[kindid].featureids.push(featureid);
        }
        for kind in &mut self.kinds {
            kind.model.features = kind
                .featureids
                .iter()
                .map(|&f| full_model.features[f].clone())
                .collect();
        }
        self.reindex();
    }

    /// Assert every structural invariant of the feature partition and mixtures.
    pub fn validate(&self) {
        assert!(!self.kinds.is_empty(), "no kinds");
        let mut seen = vec![false; self.schema.len()];
        for (kindid, kind) in self.kinds.iter().enumerate() {
            assert_eq!(kind.featureids.len(), kind.model.dim(), "kind {kindid} model dim mismatch");
            for (local, &featureid) in kind.featureids.iter().enumerate() {
                assert!(!seen[featureid], "feature {featureid} in two kinds");
                seen[featureid] = true;
                assert_eq!(self.featureid_to_kindid[featureid], kindid);
                assert_eq!(self.featureid_to_local[featureid], local);
            }
            kind.mixture.validate(&kind.model);
        }
        assert!(seen.into_iter().all(|s| s), "some feature is in no kind");
        let sizes: Vec<usize> = self.kinds.iter().map(|k| k.mixture.sample_size()).collect();
        assert!(sizes.windows(2).all(|w| w[0] == w[1]), "kinds hold different row counts: {sizes:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Datum, FeatureType};

    fn schema() -> Schema {
        Schema::new(vec![FeatureType::Boolean, FeatureType::Count, FeatureType::Real])
    }

    #[test]
    fn test_split_join() {
        let cross_cat = CrossCat::from_partition(schema(), &[1, 0, 1], 1, 1.0).unwrap();
        let full = Value::new(vec![
            (0, Datum::Boolean(true)),
            (1, Datum::Count(2)),
            (2, Datum::Real(0.5)),
        ]);
        let mut partials = Vec::new();
        cross_cat.value_split(&full, &mut partials);
        assert_eq!(partials.len(), 2);
        assert_eq!(partials[0], Value::new(vec![(0, Datum::Count(2))]));
        assert_eq!(
            partials[1],
            Value::new(vec![(0, Datum::Boolean(true)), (1, Datum::Real(0.5))])
        );
        assert_eq!(cross_cat.value_join(&partials), full);

        let mut projected = Value::empty();
        for (kind, partial) in cross_cat.kinds().iter().zip(&partials) {
            kind.project_value(&full, &mut projected);
            assert_eq!(&projected, partial);
        }
    }

    #[test]
    fn test_split_sparse_value() {
        let cross_cat = CrossCat::from_partition(schema(), &[0, 1, 0], 1, 1.0).unwrap();
        let mut partials = vec![Value::new(vec![(5, Datum::Count(1))])];
        cross_cat.value_split(&Value::new(vec![(2, Datum::Real(1.0))]), &mut partials);
        assert_eq!(partials[0], Value::new(vec![(1, Datum::Real(1.0))]));
        assert!(partials[1].is_empty());
    }

    #[test]
    fn test_from_partition_rejects_gaps() {
        let err = CrossCat::from_partition(schema(), &[0, 2, 0], 1, 1.0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter { .. }));
    }

    #[test]
    fn test_from_partition_rejects_wrong_width() {
        let err = CrossCat::from_partition(schema(), &[0, 0], 1, 1.0).unwrap_err();
        assert!(matches!(err, EngineError::Schema(_)));
    }

    #[test]
    fn test_full_model_global_order() {
        let cross_cat = CrossCat::from_partition(schema(), &[1, 0, 1], 1, 1.0).unwrap();
        let full = cross_cat.full_model();
        let types: Vec<_> = full.features.iter().map(FeatureModel::feature_type).collect();
        assert_eq!(types, schema().features());
    }

    #[test]
    fn test_featureless_kind_lifecycle() {
        let mut cross_cat = CrossCat::single_kind(schema(), 1, 1.0);
        let kindid = cross_cat.add_featureless_kind(1);
        assert_eq!(kindid, 1);
        cross_cat.validate();
        cross_cat.remove_kind(kindid);
        assert_eq!(cross_cat.kind_count(), 1);
        cross_cat.validate();
    }

    #[test]
    fn test_set_kind_features_moves_models() {
        let mut cross_cat = CrossCat::from_partition(schema(), &[0, 0, 1], 1, 1.0).unwrap();
        let full = cross_cat.full_model();
        cross_cat.set_kind_features(&[1, 0, 1], &full);
        assert_eq!(cross_cat.kinds()[0].featureids, vec![1]);
        assert_eq!(cross_cat.kinds()[1].featureids, vec![0, 2]);
        assert_eq!(cross_cat.featureid_to_kindid(), &[1, 0, 1]);
        assert_eq!(cross_cat.kinds()[1].model.features[1].feature_type(), FeatureType::Real);
    }

    #[test]
    fn test_infer_hypers_keeps_valid_models() {
        let mut cross_cat = CrossCat::single_kind(schema(), 1, 1.0);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        cross_cat.infer_hypers(&mut rng, Parallelism::Sequential);
        let kind = &cross_cat.kinds()[0];
        assert!(Clustering::ALPHA_GRID.contains(&kind.model.clustering.alpha));
        assert!(kind.model.features.iter().all(FeatureModel::is_valid));
    }
}
