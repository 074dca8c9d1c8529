//! Add / remove decisions for multi-pass annealing.

use crate::error::EngineError;

/// Decides, step by step, whether the driver adds an unseen row or retracts
/// the oldest assigned row for re-insertion, and when to flush.
///
/// The run has three phases:
///
/// 1. fill: `row_count - assigned_count` adds;
/// 2. churn: `round(extra_passes * row_count)` cycles of one remove followed
///    by one add, which re-inserts the retracted row;
/// 3. adds forever. The driver stops when an add hits an already assigned
///    row.
#[derive(Clone, Debug)]
pub struct FlushingAnnealingSchedule {
    fill_remaining: usize,
    cycles_remaining: usize,
    reinsert_pending: bool,
    flush_period: usize,
    removes_since_flush: usize,
}

impl FlushingAnnealingSchedule {
    /// # Arguments
    ///
    /// * `extra_passes` - remove/re-add passes after the fill phase
    /// * `row_count` - rows in the log
    /// * `assigned_count` - rows already assigned when the run starts
    /// * `flushes_per_pass` - flushes per `row_count` removals
    ///
    /// # Errors
    ///
    /// `extra_passes` must be finite and non-negative.
    pub fn new(
        extra_passes: f64,
        row_count: usize,
        assigned_count: usize,
        flushes_per_pass: usize,
    ) -> Result<Self, EngineError> {
        if !(extra_passes.is_finite() && extra_passes >= 0.0) {
            return Err(EngineError::InvalidParameter {
                name: "extra_passes",
                value: extra_passes.to_string(),
            });
        }
        Ok(Self {
            fill_remaining: row_count.saturating_sub(assigned_count),
            cycles_remaining: (extra_passes * row_count as f64).round() as usize,
            reinsert_pending: false,
            flush_period: (row_count / flushes_per_pass.max(1)).max(1),
            removes_since_flush: 0,
        })
    }

    /// Remove/re-add cycles not yet started.
    #[inline]
    pub fn cycles_remaining(&self) -> usize {
        self.cycles_remaining
    }

    pub fn next_action_is_add(&mut self) -> bool {
        if self.fill_remaining > 0 {
            self.fill_remaining -= 1;
            return true;
        }
        if self.reinsert_pending {
            self.reinsert_pending = false;
            return true;
        }
        if self.cycles_remaining > 0 {
            self.cycles_remaining -= 1;
            self.reinsert_pending = true;
            return false;
        }
        true
    }

    /// Call once after each remove step.
    pub fn time_to_flush(&mut self) -> bool {
        self.removes_since_flush += 1;
        if self.removes_since_flush >= self.flush_period {
            self.removes_since_flush = 0;
            true
        } else {
            false
        }
    }
}
