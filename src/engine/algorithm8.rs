//! Kind-structure search: a truncated form of Neal's Algorithm 8 over the
//! feature→kind partition.
//!
//! While the search is active every kind carries a shadow mixture scored on
//! full row values. Its groups mirror the kind's own mixture id-for-id, so
//! for any kind the shadow knows how every feature's data would be grouped
//! under that kind's row partition. Moving a feature between kinds is then a
//! matter of re-projecting the shadow statistics; no row is re-read.
//!
//! One search step ([`Engine::run_algorithm8`]):
//!
//! 1. score every (feature, kind) pair by the feature's log marginal
//!    likelihood under the kind's partition;
//! 2. Gibbs-sample each feature's kind with a CRP prior over kinds, the empty
//!    ("ephemeral") kinds sharing the new-kind mass;
//! 3. re-project changed kinds from their shadows, drop kinds left without
//!    features and refill the ephemeral kinds with fresh CRP partitions.
//!
//! Row partitions are held fixed during step 2, hence "truncated".

use std::collections::VecDeque;

use rand::Rng;
use tracing::{debug, trace};

use super::assignments::{pop_end, QueueEnd};
use super::stream::StreamInterval;
use super::workers::BatchEnd;
use super::{sample_group, Engine, Scratch};
use crate::data::{Row, RowLog, Value};
use crate::error::EngineError;
use crate::model::{CrossCat, GlobalId, Kind, Mixture, ProductModel};
use crate::utils::{run_with_threads, sample_from_scores, Parallelism};

use super::schedule::FlushingAnnealingSchedule;

/// Shadow state of an active search.
#[derive(Debug)]
pub(crate) struct Algorithm8 {
    /// Model over all features, global ids.
    pub model: ProductModel,
    /// One shadow mixture per kind.
    pub mixtures: Vec<Mixture>,
    /// Full values of the assigned rows, aligned with the rowid queue.
    pub values: VecDeque<Value>,
}

impl Algorithm8 {
    pub fn validate(&self, cross_cat: &CrossCat, assignments: &super::Assignments) {
        assert_eq!(self.mixtures.len(), cross_cat.kind_count(), "shadow count != kind count");
        assert_eq!(self.values.len(), assignments.len(), "shadow values != assigned rows");
        for (kindid, (kind, shadow)) in cross_cat.kinds().iter().zip(&self.mixtures).enumerate() {
            shadow.validate(&self.model);
            assert_eq!(
                shadow.id_tracker(),
                kind.mixture.id_tracker(),
                "kind {kindid} shadow ids diverged"
            );
            let counts = shadow.groups().iter().zip(kind.mixture.groups());
            assert!(
                counts.into_iter().all(|(s, p)| s.count == p.count),
                "kind {kindid} shadow counts diverged"
            );
        }
    }
}

/// One kind's share of the search state, lent to whoever applies that kind's
/// row updates.
pub(crate) struct KindSlot<'a> {
    pub kind: &'a mut Kind,
    pub shadow: &'a mut Mixture,
    pub groupids: &'a mut VecDeque<GlobalId>,
}

impl KindSlot<'_> {
    /// Sample a group from the kind's own view and add the row to both views.
    pub fn add<R: Rng + ?Sized>(&mut self, full_model: &ProductModel, full: &Value, scratch: &mut Scratch, rng: &mut R) {
        self.kind.project_value(full, &mut scratch.partial);
        let packed = sample_group(self.kind, &scratch.partial, &mut scratch.scores, rng);
        self.kind.mixture.add_value(&self.kind.model, packed, &scratch.partial);
        self.shadow.add_value(full_model, packed, full);
        self.groupids.push_back(self.kind.mixture.packed_to_global(packed));
    }

    /// Remove a row from both views, popping its group from `end`.
    pub fn remove(&mut self, full: &Value, end: QueueEnd, scratch: &mut Scratch) {
        let global = pop_end(self.groupids, end).expect("kind column is shorter than the rowid queue");
        let packed = self.kind.mixture.global_to_packed(global);
        debug_assert_eq!(self.shadow.packed_to_global(packed), global);
        self.kind.project_value(full, &mut scratch.partial);
        self.kind.mixture.remove_value(packed, &scratch.partial);
        self.shadow.remove_value(packed, full);
    }
}

impl Engine {
    /// Build the shadow state from the current assignments and append
    /// `ephemeral_kind_count` featureless kinds.
    ///
    /// Every assigned row is looked up in `log` once; afterwards the search
    /// never re-reads the log.
    pub(crate) fn prepare_algorithm8(&mut self, log: &RowLog, ephemeral_kind_count: usize) -> Result<(), EngineError> {
        let model = self.cross_cat.full_model();
        let mut mixtures: Vec<Mixture> = self
            .cross_cat
            .kinds()
            .iter()
            .map(|kind| Mixture::mirror_of(&kind.mixture, &model))
            .collect();
        let mut values = VecDeque::with_capacity(self.assignments.len());
        for (pos, &rowid) in self.assignments.rowids().iter().enumerate() {
            let row = log
                .find(rowid)
                .ok_or_else(|| EngineError::RowLog(format!("assigned row {rowid} is missing from the row log")))?;
            for (kindid, shadow) in mixtures.iter_mut().enumerate() {
                let packed = shadow.global_to_packed(self.assignments.groupids(kindid)[pos]);
                shadow.accumulate_value(packed, &row.value);
            }
            values.push_back(row.value.clone());
        }
        self.algorithm8 = Some(Algorithm8 {
            model,
            mixtures,
            values,
        });
        for _ in 0..ephemeral_kind_count {
            self.add_featureless_kind();
        }
        debug!(
            kinds = self.cross_cat.kind_count(),
            rows = self.assignments.len(),
            "prepared kind structure search"
        );
        Ok(())
    }

    /// Add a row to both the kind-local and the shadow views of every kind.
    /// Returns false, changing nothing, if the row is already assigned.
    ///
    /// # Panics
    /// Panics if the search is not prepared.
    pub fn try_add_row_algorithm8(&mut self, row: &Row) -> bool {
        if !self.assignments.try_push_rowid(row.id) {
            return false;
        }
        let algorithm8 = self.algorithm8.as_mut().expect("kind structure search is not prepared");
        let slots = self
            .cross_cat
            .kinds
            .iter_mut()
            .zip(algorithm8.mixtures.iter_mut())
            .zip(self.assignments.groupids.iter_mut());
        for ((kind, shadow), groupids) in slots {
            KindSlot { kind, shadow, groupids }.add(&algorithm8.model, &row.value, &mut self.scratch, &mut self.rng);
        }
        algorithm8.values.push_back(row.value.clone());
        trace!(rowid = row.id, "added row to both views");
        true
    }

    /// Remove a row from both views of every kind.
    ///
    /// # Panics
    /// Panics if the search is not prepared or the row is at neither end of
    /// the assignment queue.
    pub fn remove_row_algorithm8(&mut self, row: &Row) {
        let end = self.assignments.pop_rowid(row.id);
        let algorithm8 = self.algorithm8.as_mut().expect("kind structure search is not prepared");
        let slots = self
            .cross_cat
            .kinds
            .iter_mut()
            .zip(algorithm8.mixtures.iter_mut())
            .zip(self.assignments.groupids.iter_mut());
        for ((kind, shadow), groupids) in slots {
            KindSlot { kind, shadow, groupids }.remove(&row.value, end, &mut self.scratch);
        }
        pop_end(&mut algorithm8.values, end);
        trace!(rowid = row.id, ?end, "removed row from both views");
    }

    /// Stream rows on the driver thread until the next flush or until the
    /// fill phase is exhausted.
    pub(crate) fn run_batch_sequential(
        &mut self,
        rows: &mut StreamInterval<'_>,
        schedule: &mut FlushingAnnealingSchedule,
    ) -> BatchEnd {
        loop {
            if schedule.next_action_is_add() {
                let row = rows.read_unassigned();
                if !self.try_add_row_algorithm8(row) {
                    return BatchEnd::Done;
                }
            } else {
                let row = rows.read_assigned();
                self.remove_row_algorithm8(row);
                if schedule.time_to_flush() {
                    return BatchEnd::Flush;
                }
            }
        }
    }

    /// One search step. Returns the number of features that changed kind.
    ///
    /// # Panics
    /// Panics if the search is not prepared.
    pub fn run_algorithm8(&mut self, ephemeral_kind_count: usize, iterations: usize) -> usize {
        run_with_threads(self.config.n_threads, |parallelism| {
            self.step_algorithm8(ephemeral_kind_count, iterations, parallelism)
        })
    }

    /// [`run_algorithm8`](Self::run_algorithm8) inside a caller-provided
    /// thread pool.
    pub(crate) fn step_algorithm8(
        &mut self,
        ephemeral_kind_count: usize,
        iterations: usize,
        parallelism: Parallelism,
    ) -> usize {
        let algorithm8 = self.algorithm8.as_mut().expect("kind structure search is not prepared");
        algorithm8.model = self.cross_cat.full_model();

        // scores[kindid][featureid]
        let feature_count = self.cross_cat.schema().len();
        let model = &algorithm8.model;
        let scores: Vec<Vec<f64>> = parallelism.maybe_par_map(&algorithm8.mixtures, |shadow| {
            (0..feature_count)
                .map(|featureid| shadow.feature_log_marginal(model, featureid))
                .collect()
        });

        let old_assignment = self.cross_cat.featureid_to_kindid().to_vec();
        let new_assignment = sample_feature_kinds(
            &scores,
            &old_assignment,
            self.cross_cat.kind_alpha(),
            iterations,
            &mut self.rng,
        );
        let moved = old_assignment
            .iter()
            .zip(&new_assignment)
            .filter(|(old, new)| old != new)
            .count();

        if moved > 0 {
            let old_features: Vec<Vec<usize>> = self.cross_cat.kinds().iter().map(|k| k.featureids.clone()).collect();
            self.cross_cat.set_kind_features(&new_assignment, &algorithm8.model);
            for ((kind, shadow), old) in self
                .cross_cat
                .kinds
                .iter_mut()
                .zip(&algorithm8.mixtures)
                .zip(&old_features)
            {
                if kind.featureids != *old {
                    kind.mixture = Mixture::project(shadow, &kind.featureids);
                }
            }
        }

        for kindid in (0..self.cross_cat.kind_count()).rev() {
            if self.cross_cat.kinds()[kindid].is_featureless() {
                self.remove_kind(kindid);
            }
        }
        for _ in 0..ephemeral_kind_count {
            self.add_featureless_kind();
        }
        debug!(moved, kinds = self.cross_cat.kind_count(), "ran kind structure step");
        moved
    }

    /// Delete featureless kinds and drop the shadow state.
    pub fn cleanup_algorithm8(&mut self) {
        for kindid in (0..self.cross_cat.kind_count()).rev() {
            if self.cross_cat.kinds()[kindid].is_featureless() {
                self.remove_kind(kindid);
            }
        }
        self.algorithm8 = None;
    }

    /// Append a featureless kind whose partition of the assigned rows is
    /// drawn from the CRP prior.
    fn add_featureless_kind(&mut self) -> usize {
        let empty_group_count = self.config.empty_group_count;
        let kindid = self.cross_cat.add_featureless_kind(empty_group_count);
        let column = self.assignments.packed_add();
        debug_assert_eq!(column, kindid);

        let algorithm8 = self.algorithm8.as_mut().expect("kind structure search is not prepared");
        let kind = &mut self.cross_cat.kinds[kindid];
        let mut shadow = Mixture::init_empty(&algorithm8.model, empty_group_count);
        let empty = Value::empty();
        for full in &algorithm8.values {
            let packed = sample_group(kind, &empty, &mut self.scratch.scores, &mut self.rng);
            kind.mixture.add_value(&kind.model, packed, &empty);
            shadow.add_value(&algorithm8.model, packed, full);
            self.assignments.push_groupid(kindid, kind.mixture.packed_to_global(packed));
        }
        algorithm8.mixtures.push(shadow);
        kindid
    }

    /// Remove a featureless kind from every structure that is indexed by
    /// kind.
    fn remove_kind(&mut self, kindid: usize) {
        self.cross_cat.remove_kind(kindid);
        self.assignments.packed_remove(kindid);
        if let Some(algorithm8) = self.algorithm8.as_mut() {
            algorithm8.mixtures.remove(kindid);
        }
    }
}

/// Gibbs sweeps over the feature→kind map with rows held fixed.
///
/// `scores[k][f]` is feature `f`'s log marginal likelihood under kind `k`'s
/// row partition. A populated kind has prior weight equal to its feature
/// count; empty kinds split `kind_alpha` equally.
fn sample_feature_kinds<R: Rng + ?Sized>(
    scores: &[Vec<f64>],
    featureid_to_kindid: &[usize],
    kind_alpha: f64,
    iterations: usize,
    rng: &mut R,
) -> Vec<usize> {
    let kind_count = scores.len();
    let mut assignment = featureid_to_kindid.to_vec();
    let mut sizes = vec![0usize; kind_count];
    for &kindid in &assignment {
        sizes[kindid] += 1;
    }
    let mut probs = Vec::with_capacity(kind_count);
    for _ in 0..iterations {
        for featureid in 0..assignment.len() {
            sizes[assignment[featureid]] -= 1;
            let empty = sizes.iter().filter(|&&s| s == 0).count();
            probs.clear();
            probs.extend((0..kind_count).map(|kindid| {
                let prior = match sizes[kindid] {
                    0 => (kind_alpha / empty as f64).ln(),
                    size => (size as f64).ln(),
                };
                prior + scores[kindid][featureid]
            }));
            let kindid = sample_from_scores(rng, &probs);
            sizes[kindid] += 1;
            assignment[featureid] = kindid;
        }
    }
    assignment
}
