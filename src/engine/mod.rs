//! Streaming inference engine.
//!
//! [`Engine`] owns the cross-categorization state, the assignment store and
//! the RNG, and exposes the row lifecycle (add / try-add / remove) plus the
//! drivers that stream a [`RowLog`] through it.
//!
//! # Drivers
//!
//! | Driver | Rows | Flush |
//! |---|---|---|
//! | [`infer_single_pass`](Engine::infer_single_pass) | each row once, untracked | none |
//! | [`infer_multi_pass`](Engine::infer_multi_pass) | fill then remove/re-add churn | hyperparameters |
//! | [`infer_kind_structure`](Engine::infer_kind_structure) | as multi-pass, both views | kind search, hyperparameters |
//! | [`posterior_enum`](Engine::posterior_enum) | full sweeps over a small row set | none |

mod algorithm8;
mod assignments;
mod config;
mod predict;
mod schedule;
mod stream;
mod workers;

use std::io::Write;
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

pub use assignments::{Assignment, Assignments, QueueEnd};
pub use config::{ConfigError, EngineConfig, KindStructureParams};
pub use predict::{PredictQuery, PredictResult};
pub use schedule::FlushingAnnealingSchedule;
pub use stream::StreamInterval;

use self::algorithm8::Algorithm8;
use crate::data::{Row, RowLog, Value};
use crate::error::EngineError;
use crate::model::{CrossCat, GlobalId, Kind, PackedId};
use crate::persist;
use crate::utils::{run_with_threads, sample_from_scores, Parallelism};

/// One posterior sample of the row partitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSample {
    pub featureid_to_kindid: Vec<usize>,
    /// Per kind, the global group id of each row in rowid order.
    pub kinds: Vec<Vec<GlobalId>>,
}

/// Scratch buffers reused across rows.
#[derive(Debug, Default)]
pub(crate) struct Scratch {
    pub partial: Value,
    pub scores: Vec<f64>,
}

/// Score `value` against a kind's groups and draw one.
#[inline]
pub(crate) fn sample_group<R: Rng + ?Sized>(kind: &Kind, value: &Value, scores: &mut Vec<f64>, rng: &mut R) -> PackedId {
    kind.mixture.score(&kind.model, value, scores);
    sample_from_scores(rng, scores)
}

pub struct Engine {
    config: EngineConfig,
    cross_cat: CrossCat,
    assignments: Assignments,
    /// Shadow state, present only during kind-structure search.
    algorithm8: Option<Algorithm8>,
    rng: Xoshiro256PlusPlus,
    partials: Vec<Value>,
    scratch: Scratch,
}

impl Engine {
    /// Wrap a cross-cat with an empty assignment store.
    ///
    /// Mixtures are brought to the configured empty group count.
    ///
    /// # Panics
    /// Panics if the cross-cat has no kinds.
    pub fn new(config: EngineConfig, mut cross_cat: CrossCat) -> Self {
        assert!(cross_cat.kind_count() > 0, "no kinds, engine is empty");
        for kind in &mut cross_cat.kinds {
            kind.mixture.set_empty_group_count(&kind.model, config.empty_group_count);
        }
        let assignments = Assignments::new(cross_cat.kind_count());
        let rng = Xoshiro256PlusPlus::seed_from_u64(config.seed);
        Self {
            config,
            cross_cat,
            assignments,
            algorithm8: None,
            rng,
            partials: Vec::new(),
            scratch: Scratch::default(),
        }
    }

    /// Restore an engine from checkpoint files.
    ///
    /// Without `groups` the mixtures start empty; without `assign` no row is
    /// tracked, so every row already in the groups counts as untracked.
    pub fn load(
        config: EngineConfig,
        model: impl AsRef<Path>,
        groups: Option<&Path>,
        assign: Option<&Path>,
    ) -> Result<Self, EngineError> {
        let mut cross_cat = persist::load_model(model, config.empty_group_count)?;
        if let Some(path) = groups {
            persist::load_groups(&mut cross_cat, path)?;
        }
        let mut engine = Self::new(config, cross_cat);
        if let Some(path) = assign {
            let assignments = persist::load_assignments(path, engine.cross_cat.kind_count())?;
            engine.check_assignments(&assignments)?;
            engine.assignments = assignments;
        }
        info!(
            kinds = engine.cross_cat.kind_count(),
            assigned = engine.assignments.len(),
            untracked = engine.count_untracked_rows(),
            "loaded engine"
        );
        Ok(engine)
    }

    /// Write any of the model, groups and assignments.
    pub fn dump(&self, model: Option<&Path>, groups: Option<&Path>, assign: Option<&Path>) -> Result<(), EngineError> {
        if let Some(path) = model {
            persist::dump_model(&self.cross_cat, path)?;
        }
        if let Some(path) = groups {
            persist::dump_groups(&self.cross_cat, path)?;
        }
        if let Some(path) = assign {
            persist::dump_assignments(&self.assignments, path)?;
        }
        Ok(())
    }

    fn check_assignments(&self, assignments: &Assignments) -> Result<(), EngineError> {
        for (kindid, kind) in self.cross_cat.kinds().iter().enumerate() {
            if assignments.len() > kind.mixture.sample_size() {
                return Err(EngineError::Checkpoint(format!(
                    "{} assignments but kind {kindid} holds {} rows",
                    assignments.len(),
                    kind.mixture.sample_size()
                )));
            }
            let tracker = kind.mixture.id_tracker();
            if let Some(groupid) = assignments
                .groupids(kindid)
                .iter()
                .find(|&&g| !tracker.contains_global(g))
            {
                return Err(EngineError::Checkpoint(format!(
                    "kind {kindid} has no live group {groupid}"
                )));
            }
            let mut tracked = vec![0usize; kind.mixture.len()];
            for &global in assignments.groupids(kindid) {
                tracked[tracker.global_to_packed(global)] += 1;
            }
            if let Some((packed, group)) = kind
                .mixture
                .groups()
                .iter()
                .enumerate()
                .find(|&(packed, group)| tracked[packed] > group.count)
            {
                return Err(EngineError::Checkpoint(format!(
                    "kind {kindid} group {} has {} assignments but holds {} rows",
                    tracker.packed_to_global(packed),
                    tracked[packed],
                    group.count
                )));
            }
        }
        Ok(())
    }

    /// Every assigned row must be in `log` before a driver resumes over it.
    fn check_assigned_rows(&self, log: &RowLog) -> Result<(), EngineError> {
        match self.assignments.rowids().iter().find(|&&rowid| log.find(rowid).is_none()) {
            Some(rowid) => Err(EngineError::RowLog(format!(
                "assigned row {rowid} is missing from the row log"
            ))),
            None => Ok(()),
        }
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn cross_cat(&self) -> &CrossCat {
        &self.cross_cat
    }

    #[inline]
    pub fn assignments(&self) -> &Assignments {
        &self.assignments
    }

    /// Rows held by the mixtures that the assignment store does not track,
    /// i.e. rows added with [`add_row_noassign`](Self::add_row_noassign) or
    /// [`add_row`](Self::add_row).
    pub fn count_untracked_rows(&self) -> usize {
        let sample_size = self.cross_cat.kinds()[0].mixture.sample_size();
        assert!(
            self.assignments.len() <= sample_size,
            "more assignments than rows in the mixtures"
        );
        sample_size - self.assignments.len()
    }

    // =========================================================================
    // Row lifecycle
    // =========================================================================

    /// Add a row without recording where it went. Irreversible.
    pub fn add_row_noassign(&mut self, row: &Row) {
        self.cross_cat.value_split(&row.value, &mut self.partials);
        for (kind, value) in self.cross_cat.kinds.iter_mut().zip(&self.partials) {
            let packed = sample_group(kind, value, &mut self.scratch.scores, &mut self.rng);
            kind.mixture.add_value(&kind.model, packed, value);
        }
    }

    /// Add a row and return its per-kind global group ids. The row is not
    /// tracked for later removal.
    pub fn add_row(&mut self, row: &Row) -> Assignment {
        self.cross_cat.value_split(&row.value, &mut self.partials);
        let mut groupids = Vec::with_capacity(self.cross_cat.kind_count());
        for (kind, value) in self.cross_cat.kinds.iter_mut().zip(&self.partials) {
            let packed = sample_group(kind, value, &mut self.scratch.scores, &mut self.rng);
            kind.mixture.add_value(&kind.model, packed, value);
            groupids.push(kind.mixture.packed_to_global(packed));
        }
        Assignment {
            rowid: row.id,
            groupids,
        }
    }

    /// Add a row and track its groups. Returns false, changing nothing, if
    /// the row is already assigned.
    pub fn try_add_row(&mut self, row: &Row) -> bool {
        if !self.assignments.try_push_rowid(row.id) {
            trace!(rowid = row.id, "row already assigned");
            return false;
        }
        debug_assert_eq!(self.assignments.dim(), self.cross_cat.kind_count());
        self.cross_cat.value_split(&row.value, &mut self.partials);
        let kinds = self.cross_cat.kinds.iter_mut().zip(&self.partials);
        for (kindid, (kind, value)) in kinds.enumerate() {
            let packed = sample_group(kind, value, &mut self.scratch.scores, &mut self.rng);
            kind.mixture.add_value(&kind.model, packed, value);
            self.assignments.push_groupid(kindid, kind.mixture.packed_to_global(packed));
        }
        trace!(rowid = row.id, "added row");
        true
    }

    /// Remove a tracked row. The row must be the oldest or the newest
    /// assigned row.
    pub fn remove_row(&mut self, row: &Row) {
        let end = self.assignments.pop_rowid(row.id);
        assert_eq!(
            self.assignments.dim(),
            self.cross_cat.kind_count(),
            "assignment width != kind count"
        );
        self.cross_cat.value_split(&row.value, &mut self.partials);
        let kinds = self.cross_cat.kinds.iter_mut().zip(&self.partials);
        for (kindid, (kind, value)) in kinds.enumerate() {
            let global = self.assignments.pop_groupid(kindid, end);
            let packed = kind.mixture.global_to_packed(global);
            kind.mixture.remove_value(packed, value);
        }
        trace!(rowid = row.id, ?end, "removed row");
    }

    // =========================================================================
    // Drivers
    // =========================================================================

    /// Stream every row of the log into the mixtures once.
    ///
    /// With `assign_out`, each row's [`Assignment`] is written as one JSON
    /// line. Rows are never tracked for removal.
    pub fn infer_single_pass(&mut self, log: &RowLog, assign_out: Option<&mut dyn Write>) -> Result<(), EngineError> {
        log.validate(self.cross_cat.schema())?;
        info!(rows = log.len(), "single pass start");
        match assign_out {
            Some(out) => {
                for row in log.rows() {
                    let assignment = self.add_row(row);
                    serde_json::to_writer(&mut *out, &assignment)?;
                    out.write_all(b"\n")?;
                }
                out.flush()?;
            }
            None => {
                for row in log.rows() {
                    self.add_row_noassign(row);
                }
            }
        }
        info!(rows = log.len(), "single pass done");
        Ok(())
    }

    /// Anneal over the log: add every unassigned row, then run
    /// `extra_passes` of remove/re-add churn, refreshing hyperparameters at
    /// each flush. Resumes from the current assignments.
    pub fn infer_multi_pass(&mut self, log: &RowLog, extra_passes: f64) -> Result<(), EngineError> {
        check_log(log, &self.cross_cat)?;
        self.check_assigned_rows(log)?;
        run_with_threads(self.config.n_threads, |parallelism| {
            self.infer_multi_pass_inner(log, extra_passes, parallelism)
        })
    }

    fn infer_multi_pass_inner(
        &mut self,
        log: &RowLog,
        extra_passes: f64,
        parallelism: Parallelism,
    ) -> Result<(), EngineError> {
        info!(rows = log.len(), assigned = self.assignments.len(), extra_passes, "multi pass start");
        let mut rows = StreamInterval::resume(log, self.assignments.span(), |row| self.remove_row(row));
        let mut schedule = FlushingAnnealingSchedule::new(
            extra_passes,
            log.len(),
            self.assignments.len(),
            self.config.flushes_per_pass,
        )?;
        let mut flushes = 0usize;
        loop {
            if schedule.next_action_is_add() {
                let row = rows.read_unassigned();
                if !self.try_add_row(row) {
                    break;
                }
            } else {
                let row = rows.read_assigned();
                self.remove_row(row);
                if schedule.time_to_flush() {
                    self.cross_cat.infer_hypers(&mut self.rng, parallelism);
                    flushes += 1;
                    debug!(flushes, remaining = schedule.cycles_remaining(), "flushed hyperparameters");
                }
            }
        }
        info!(assigned = self.assignments.len(), flushes, "multi pass done");
        Ok(())
    }

    /// Anneal as [`infer_multi_pass`](Self::infer_multi_pass) while searching
    /// over the feature→kind partition. Each flush runs one kind-structure
    /// step and a hyperparameter refresh. With
    /// [`algorithm8_parallel`](EngineConfig::algorithm8_parallel) set, row
    /// updates between flushes run on a kind-sharded worker pool.
    pub fn infer_kind_structure(&mut self, log: &RowLog, params: KindStructureParams) -> Result<(), EngineError> {
        check_log(log, &self.cross_cat)?;
        let untracked = self.count_untracked_rows();
        if untracked > 0 {
            return Err(EngineError::UntrackedRows(untracked));
        }
        self.check_assigned_rows(log)?;
        run_with_threads(self.config.n_threads, |parallelism| {
            self.infer_kind_structure_inner(log, params, parallelism)
        })
    }

    fn infer_kind_structure_inner(
        &mut self,
        log: &RowLog,
        params: KindStructureParams,
        parallelism: Parallelism,
    ) -> Result<(), EngineError> {
        info!(
            rows = log.len(),
            kinds = self.cross_cat.kind_count(),
            extra_passes = params.extra_passes,
            ephemeral_kind_count = params.ephemeral_kind_count,
            workers = self.config.algorithm8_parallel,
            "kind structure start"
        );
        let mut rows = StreamInterval::resume(log, self.assignments.span(), |row| self.remove_row(row));
        let mut schedule = FlushingAnnealingSchedule::new(
            params.extra_passes,
            log.len(),
            self.assignments.len(),
            self.config.flushes_per_pass,
        )?;
        self.prepare_algorithm8(log, params.ephemeral_kind_count)?;

        let mut moved_total = 0usize;
        loop {
            let end = if self.config.algorithm8_parallel > 0 {
                self.run_batch_parallel(&mut rows, &mut schedule, self.config.algorithm8_parallel)
            } else {
                self.run_batch_sequential(&mut rows, &mut schedule)
            };
            if end == workers::BatchEnd::Done {
                break;
            }
            let moved = self.step_algorithm8(params.ephemeral_kind_count, params.iterations, parallelism);
            self.cross_cat.infer_hypers(&mut self.rng, parallelism);
            moved_total += moved;
            debug!(
                moved,
                kinds = self.cross_cat.kind_count(),
                remaining = schedule.cycles_remaining(),
                "kind structure step"
            );
        }

        self.cleanup_algorithm8();
        info!(kinds = self.cross_cat.kind_count(), moved = moved_total, "kind structure done");
        Ok(())
    }

    /// Draw `sample_count` posterior samples of the row partitions, running
    /// `sample_skip` full remove/re-add sweeps before each.
    ///
    /// Rows must have ids `0..n` in order and the engine must have no
    /// assigned rows.
    pub fn posterior_enum(
        &mut self,
        rows: &[Row],
        sample_count: usize,
        sample_skip: usize,
    ) -> Result<Vec<PosteriorSample>, EngineError> {
        if let Some((pos, row)) = rows.iter().enumerate().find(|(pos, row)| row.id != *pos as u64) {
            return Err(EngineError::RowLog(format!(
                "posterior enumeration needs rowids 0..n, found {} at position {pos}",
                row.id
            )));
        }
        if !self.assignments.is_empty() {
            return Err(EngineError::InvalidParameter {
                name: "assignments",
                value: format!("{} rows already assigned", self.assignments.len()),
            });
        }
        if let Some(row) = rows.iter().find(|row| !self.cross_cat.schema().is_valid(&row.value)) {
            return Err(EngineError::Schema(format!(
                "row {} does not match the model schema",
                row.id
            )));
        }
        info!(rows = rows.len(), sample_count, sample_skip, "posterior enum start");

        for row in rows {
            self.try_add_row(row);
        }
        let mut samples = Vec::with_capacity(sample_count);
        for _ in 0..sample_count {
            for _ in 0..sample_skip {
                for row in rows {
                    self.remove_row(row);
                    self.try_add_row(row);
                }
            }
            samples.push(self.posterior_sample());
        }
        Ok(samples)
    }

    fn posterior_sample(&self) -> PosteriorSample {
        PosteriorSample {
            featureid_to_kindid: self.cross_cat.featureid_to_kindid().to_vec(),
            kinds: (0..self.assignments.dim())
                .map(|kindid| self.assignments.groupids(kindid).iter().copied().collect())
                .collect(),
        }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Assert every structural invariant across cross-cat, assignments and
    /// (if active) the kind-structure shadow state.
    pub fn validate(&self) {
        self.cross_cat.validate();
        self.assignments.validate();
        assert_eq!(
            self.assignments.dim(),
            self.cross_cat.kind_count(),
            "assignment width != kind count"
        );
        let untracked = self.count_untracked_rows();
        for (kindid, kind) in self.cross_cat.kinds().iter().enumerate() {
            let tracker = kind.mixture.id_tracker();
            let mut tracked = vec![0usize; kind.mixture.len()];
            for &global in self.assignments.groupids(kindid) {
                tracked[tracker.global_to_packed(global)] += 1;
            }
            for (packed, group) in kind.mixture.groups().iter().enumerate() {
                assert!(tracked[packed] <= group.count, "kind {kindid} group {packed} over-assigned");
                if untracked == 0 {
                    assert_eq!(tracked[packed], group.count, "kind {kindid} group {packed} count mismatch");
                }
            }
        }
        if let Some(algorithm8) = &self.algorithm8 {
            algorithm8.validate(&self.cross_cat, &self.assignments);
        }
    }
}

/// Annealing drivers cycle over the log, so it must hold at least one row.
fn check_log(log: &RowLog, cross_cat: &CrossCat) -> Result<(), EngineError> {
    if log.is_empty() {
        warn!("row log is empty");
        return Err(EngineError::RowLog("row log is empty".to_string()));
    }
    log.validate(cross_cat.schema())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Datum, FeatureType, Schema};

    fn engine(kinds: &[usize]) -> Engine {
        let schema = Schema::new(vec![FeatureType::Boolean; kinds.len()]);
        let cross_cat = CrossCat::from_partition(schema, kinds, 1, 1.0).unwrap();
        Engine::new(EngineConfig::default(), cross_cat)
    }

    fn row(id: u64, bits: &[bool]) -> Row {
        Row::new(
            id,
            Value::new(bits.iter().enumerate().map(|(f, &b)| (f, Datum::Boolean(b))).collect()),
        )
    }

    #[test]
    #[should_panic(expected = "no kinds")]
    fn test_empty_model_panics() {
        let cross_cat = CrossCat::single_kind(Schema::new(Vec::new()), 1, 1.0);
        Engine::new(EngineConfig::default(), cross_cat);
    }

    #[test]
    fn test_try_add_then_remove_restores_state() {
        let mut engine = engine(&[0, 1, 0]);
        let before = engine.cross_cat.kinds().to_vec();
        let rows: Vec<Row> = (0..3).map(|i| row(i, &[i % 2 == 0, true, false])).collect();
        for r in &rows {
            assert!(engine.try_add_row(r));
        }
        engine.validate();
        for r in rows.iter().rev() {
            engine.remove_row(r);
        }
        engine.validate();
        for (kind, old) in engine.cross_cat.kinds().iter().zip(&before) {
            assert_eq!(kind.mixture.sample_size(), 0);
            assert_eq!(kind.mixture.groups(), old.mixture.groups());
        }
    }

    #[test]
    fn test_duplicate_is_side_effect_free() {
        let mut engine = engine(&[0, 0]);
        let r = row(5, &[true, false]);
        assert!(engine.try_add_row(&r));
        let kinds = engine.cross_cat.kinds().to_vec();
        let assignments = engine.assignments.clone();
        assert!(!engine.try_add_row(&r));
        assert_eq!(engine.cross_cat.kinds(), kinds.as_slice());
        assert_eq!(engine.assignments, assignments);
    }

    #[test]
    fn test_add_row_is_untracked() {
        let mut engine = engine(&[0, 1]);
        let assignment = engine.add_row(&row(0, &[true, true]));
        assert_eq!(assignment.rowid, 0);
        assert_eq!(assignment.groupids.len(), 2);
        engine.add_row_noassign(&row(1, &[false, true]));
        assert_eq!(engine.count_untracked_rows(), 2);
        assert!(engine.assignments.is_empty());
        engine.validate();
    }

    #[test]
    fn test_remove_oldest_row() {
        let mut engine = engine(&[0]);
        let rows: Vec<Row> = (0..4).map(|i| row(i, &[i < 2])).collect();
        rows.iter().for_each(|r| assert!(engine.try_add_row(r)));
        engine.remove_row(&rows[0]);
        engine.remove_row(&rows[1]);
        assert_eq!(engine.assignments.rowids(), &[2, 3]);
        engine.validate();
    }

    #[test]
    fn test_infer_multi_pass_rejects_empty_log() {
        let mut engine = engine(&[0]);
        let err = engine.infer_multi_pass(&RowLog::default(), 1.0).unwrap_err();
        assert!(matches!(err, EngineError::RowLog(_)));
    }
}
