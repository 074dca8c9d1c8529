//! Array-backed mixture of groups with collapsed scoring.
//!
//! A [`Mixture`] always holds exactly `empty_group_count` empty groups, which
//! stand for the "new group" option of the collapsed sampler. Adding a value
//! to an empty group promotes it and appends a fresh empty group; removing
//! the last value of a group deletes it. Every mutation takes a packed id;
//! the [`IdTracker`] mirrors each creation and deletion so callers can hold
//! on to global ids.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::id_tracker::{GlobalId, IdTracker, PackedId};
use super::product::{Group, ProductModel};
use crate::data::Value;
use crate::utils::sample_from_probs;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mixture {
    groups: Vec<Group>,
    id_tracker: IdTracker,
    empty_group_count: usize,
}

impl Mixture {
    /// A mixture with only its empty groups.
    pub fn init_empty(model: &ProductModel, empty_group_count: usize) -> Self {
        assert!(empty_group_count > 0, "a mixture needs at least one empty group");
        Self {
            groups: (0..empty_group_count).map(|_| model.empty_group()).collect(),
            id_tracker: IdTracker::new(empty_group_count),
            empty_group_count,
        }
    }

    /// A mixture with the same groups, counts and ids as `other` but with
    /// empty statistics for `model`'s features.
    ///
    /// Used to build a shadow view whose statistics are then filled with
    /// [`accumulate_value`](Self::accumulate_value).
    pub fn mirror_of(other: &Mixture, model: &ProductModel) -> Self {
        let groups = other
            .groups
            .iter()
            .map(|g| Group {
                count: g.count,
                ..model.empty_group()
            })
            .collect();
        Self {
            groups,
            id_tracker: other.id_tracker.clone(),
            empty_group_count: other.empty_group_count,
        }
    }

    /// Restrict a mixture to a subset of its features, keeping ids and counts.
    ///
    /// `featureids` index `other`'s feature space; the result's feature `i`
    /// is `other`'s feature `featureids[i]`.
    pub fn project(other: &Mixture, featureids: &[usize]) -> Self {
        let groups = other
            .groups
            .iter()
            .map(|g| Group {
                count: g.count,
                stats: featureids.iter().map(|&f| g.stats[f].clone()).collect(),
            })
            .collect();
        Self {
            groups,
            id_tracker: other.id_tracker.clone(),
            empty_group_count: other.empty_group_count,
        }
    }

    /// Number of live groups, including the empty ones.
    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    #[inline]
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    #[inline]
    pub fn id_tracker(&self) -> &IdTracker {
        &self.id_tracker
    }

    #[inline]
    pub fn empty_group_count(&self) -> usize {
        self.empty_group_count
    }

    /// Total number of rows held by the mixture.
    pub fn sample_size(&self) -> usize {
        self.groups.iter().map(|g| g.count).sum()
    }

    /// Row counts of the non-empty groups.
    pub fn counts(&self) -> impl Iterator<Item = usize> + '_ {
        self.groups.iter().map(|g| g.count).filter(|&c| c > 0)
    }

    #[inline]
    pub fn packed_to_global(&self, packed: PackedId) -> GlobalId {
        self.id_tracker.packed_to_global(packed)
    }

    #[inline]
    pub fn global_to_packed(&self, global: GlobalId) -> PackedId {
        self.id_tracker.global_to_packed(global)
    }

    /// Collapsed log-score of `value` joining each live group.
    ///
    /// `scores` is overwritten and has one entry per packed id.
    pub fn score(&self, model: &ProductModel, value: &Value, scores: &mut Vec<f64>) {
        scores.clear();
        scores.extend(self.groups.iter().map(|group| {
            model.clustering.score_group(group.count, self.empty_group_count) + group.score_value(model, value)
        }));
    }

    pub fn add_value(&mut self, model: &ProductModel, packed: PackedId, value: &Value) {
        let group = &mut self.groups[packed];
        let was_empty = group.is_empty();
        group.add_value(value);
        if was_empty {
            self.groups.push(model.empty_group());
            self.id_tracker.packed_add();
        }
    }

    pub fn remove_value(&mut self, packed: PackedId, value: &Value) {
        let group = &mut self.groups[packed];
        group.remove_value(value);
        if group.is_empty() {
            self.groups.swap_remove(packed);
            self.id_tracker.packed_remove(packed);
        }
    }

    /// Add a value's statistics without touching counts or group structure.
    pub(crate) fn accumulate_value(&mut self, packed: PackedId, value: &Value) {
        let stats = &mut self.groups[packed].stats;
        for (featureid, datum) in value.iter() {
            stats[*featureid].add(datum);
        }
    }

    /// Draw a group from `probs`, then draw each feature in `featureids` from
    /// that group's posterior predictive.
    pub fn sample_value<R: Rng + ?Sized>(
        &self,
        model: &ProductModel,
        probs: &[f64],
        featureids: &[usize],
        rng: &mut R,
    ) -> Value {
        debug_assert_eq!(probs.len(), self.groups.len());
        let group = &self.groups[sample_from_probs(rng, probs)];
        let mut value = Value::empty();
        for &featureid in featureids {
            let datum = model.features[featureid].sample_value(&group.stats[featureid], rng);
            value.push(featureid, datum);
        }
        value
    }

    /// Log marginal likelihood of one feature's data under this partition.
    pub fn feature_log_marginal(&self, model: &ProductModel, featureid: usize) -> f64 {
        let feature = &model.features[featureid];
        self.groups
            .iter()
            .filter(|g| !g.is_empty())
            .map(|g| feature.log_marginal(&g.stats[featureid]))
            .sum()
    }

    /// Set a new empty group count by adding or dropping empty groups.
    pub fn set_empty_group_count(&mut self, model: &ProductModel, empty_group_count: usize) {
        assert!(empty_group_count > 0, "a mixture needs at least one empty group");
        while self.empty_group_count < empty_group_count {
            self.groups.push(model.empty_group());
            self.id_tracker.packed_add();
            self.empty_group_count += 1;
        }
        while self.empty_group_count > empty_group_count {
            let packed = self
                .groups
                .iter()
                .rposition(Group::is_empty)
                .expect("mixture tracks its empty groups");
            self.groups.swap_remove(packed);
            self.id_tracker.packed_remove(packed);
            self.empty_group_count -= 1;
        }
    }

    /// Restore the tracker's reverse index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.id_tracker.rebuild_index();
    }

    pub fn validate(&self, model: &ProductModel) {
        assert_eq!(self.groups.len(), self.id_tracker.len(), "group count != tracked id count");
        let empty = self.groups.iter().filter(|g| g.is_empty()).count();
        assert_eq!(empty, self.empty_group_count, "wrong number of empty groups");
        for group in &self.groups {
            assert_eq!(group.stats.len(), model.dim(), "group statistics do not match model dim");
        }
        self.id_tracker.validate();
    }
}
