//! Kind-sharded worker pool for the kind-structure search.
//!
//! Between two flushes the driver streams rows as usual, but instead of
//! updating kinds itself it sends each row's task to one FIFO channel per
//! kind. Kind `i` is owned by worker `i % workers`, and each worker drains
//! its kinds' channels round-robin. Each kind therefore sees its tasks in
//! row order while different kinds proceed independently. Closing the
//! channels and joining the scope is the barrier before the next search
//! step.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::debug;

use super::algorithm8::{Algorithm8, KindSlot};
use super::assignments::{pop_end, QueueEnd};
use super::schedule::FlushingAnnealingSchedule;
use super::stream::StreamInterval;
use super::{Engine, Scratch};
use crate::data::Value;
use crate::model::ProductModel;

/// Why a batch of row updates stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BatchEnd {
    /// The schedule asked for a flush.
    Flush,
    /// An add hit an already assigned row.
    Done,
}

/// Per-kind update for one row.
#[derive(Clone, Copy, Debug)]
enum Task<'r> {
    Add(&'r Value),
    Remove(&'r Value, QueueEnd),
}

impl Engine {
    /// Stream rows until the next flush or the end of the run, applying kind
    /// updates on a scoped pool of `min(workers, kinds)` threads.
    pub(crate) fn run_batch_parallel<'r>(
        &mut self,
        rows: &mut StreamInterval<'r>,
        schedule: &mut FlushingAnnealingSchedule,
        workers: usize,
    ) -> BatchEnd {
        let Engine {
            cross_cat,
            assignments,
            algorithm8,
            rng,
            ..
        } = self;
        let Algorithm8 {
            model,
            mixtures,
            values,
        } = algorithm8.as_mut().expect("kind structure search is not prepared");
        let model: &ProductModel = model;

        let kind_count = cross_cat.kinds.len();
        let workers = workers.clamp(1, kind_count);
        let mut shards: Vec<Vec<(KindSlot<'_>, Receiver<Task<'r>>)>> = (0..workers).map(|_| Vec::new()).collect();
        let mut senders: Vec<Sender<Task<'r>>> = Vec::with_capacity(kind_count);
        let slots = cross_cat
            .kinds
            .iter_mut()
            .zip(mixtures.iter_mut())
            .zip(assignments.groupids.iter_mut());
        for (kindid, ((kind, shadow), groupids)) in slots.enumerate() {
            let (sender, receiver) = mpsc::channel();
            senders.push(sender);
            shards[kindid % workers].push((KindSlot { kind, shadow, groupids }, receiver));
        }
        let seeds: Vec<u64> = (0..workers).map(|_| rng.gen()).collect();
        let rowids = &mut assignments.rows;

        let (end, tasks) = thread::scope(|scope| {
            for (shard, seed) in shards.into_iter().zip(seeds) {
                scope.spawn(move || run_worker(model, shard, seed));
            }

            let mut tasks = 0usize;
            let end = loop {
                if schedule.next_action_is_add() {
                    let row = rows.read_unassigned();
                    if !rowids.try_push(row.id) {
                        break BatchEnd::Done;
                    }
                    broadcast(&senders, Task::Add(&row.value));
                    values.push_back(row.value.clone());
                } else {
                    let row = rows.read_assigned();
                    let end = rowids.pop(row.id);
                    broadcast(&senders, Task::Remove(&row.value, end));
                    pop_end(values, end);
                    if schedule.time_to_flush() {
                        break BatchEnd::Flush;
                    }
                }
                tasks += 1;
            };
            // Hanging up ends every worker after it drains its queues.
            drop(senders);
            (end, tasks)
        });
        debug!(workers, kinds = kind_count, rows = tasks, ?end, "worker batch joined");
        end
    }
}

fn broadcast<'r>(senders: &[Sender<Task<'r>>], task: Task<'r>) {
    for sender in senders {
        sender.send(task).expect("kind worker exited early");
    }
}

/// Apply tasks to the owned kinds until the driver hangs up.
fn run_worker(model: &ProductModel, mut shard: Vec<(KindSlot<'_>, Receiver<Task<'_>>)>, seed: u64) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut scratch = Scratch::default();
    'rows: loop {
        for (slot, receiver) in shard.iter_mut() {
            let Ok(task) = receiver.recv() else {
                break 'rows;
            };
            match task {
                Task::Add(full) => slot.add(model, full, &mut scratch, &mut rng),
                Task::Remove(full, end) => slot.remove(full, end, &mut scratch),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Datum, FeatureType, Row, RowLog, Schema};
    use crate::engine::EngineConfig;
    use crate::model::CrossCat;

    fn log(n: u64) -> RowLog {
        let rows = (0..n)
            .map(|i| {
                Row::new(
                    i,
                    Value::new(vec![
                        (0, Datum::Boolean(i % 2 == 0)),
                        (1, Datum::Boolean(i % 3 == 0)),
                        (2, Datum::Real(i as f64 * 0.1)),
                    ]),
                )
            })
            .collect();
        RowLog::from_rows(rows).unwrap()
    }

    fn engine(workers: usize) -> Engine {
        let schema = Schema::new(vec![FeatureType::Boolean, FeatureType::Boolean, FeatureType::Real]);
        let cross_cat = CrossCat::from_partition(schema, &[0, 1, 2], 1, 1.0).unwrap();
        let config = EngineConfig::builder().algorithm8_parallel(workers).build().unwrap();
        Engine::new(config, cross_cat)
    }

    #[test]
    fn test_parallel_batch_fills_all_kinds() {
        let log = log(30);
        let mut engine = engine(2);
        engine.prepare_algorithm8(&log, 2).unwrap();
        let mut rows = StreamInterval::resume(&log, None, |_| {});
        let mut schedule = FlushingAnnealingSchedule::new(1.0, log.len(), 0, 2).unwrap();

        let end = engine.run_batch_parallel(&mut rows, &mut schedule, 2);
        assert_eq!(end, BatchEnd::Flush);
        assert_eq!(engine.assignments().len(), 29, "30 adds then one retracted row");
        engine.validate();

        let mut ends = Vec::new();
        loop {
            let end = engine.run_batch_parallel(&mut rows, &mut schedule, 2);
            ends.push(end);
            if end == BatchEnd::Done {
                break;
            }
        }
        assert_eq!(ends.len(), 2);
        assert_eq!(engine.assignments().len(), 30);
        engine.validate();
    }

    #[test]
    fn test_more_workers_than_kinds() {
        let log = log(8);
        let mut engine = engine(16);
        engine.prepare_algorithm8(&log, 0).unwrap();
        let mut rows = StreamInterval::resume(&log, None, |_| {});
        let mut schedule = FlushingAnnealingSchedule::new(0.0, log.len(), 0, 1).unwrap();
        assert_eq!(engine.run_batch_parallel(&mut rows, &mut schedule, 16), BatchEnd::Done);
        assert_eq!(engine.assignments().len(), 8);
        engine.validate();
    }
}
