//! Per-row, per-kind group assignments.
//!
//! Rows are appended at the back in arrival order. A removal pops whichever
//! end holds the row: the front when the trailing cursor retracts the oldest
//! row during annealing, the back when undoing the most recent addition.
//! Every kind column is popped from the same end as the rowid queue, so all
//! columns stay aligned with the rowids.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::data::RowId;
use crate::model::GlobalId;

/// One row's groups, one global id per kind. Also the record format of
/// assignment files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub rowid: RowId,
    pub groupids: Vec<GlobalId>,
}

/// Which end of the queues a removal popped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueEnd {
    Front,
    Back,
}

/// Assigned rowids in arrival order, with a membership set for the
/// duplicate guard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct RowQueue {
    rowids: VecDeque<RowId>,
    members: HashSet<RowId>,
}

impl RowQueue {
    /// Register a rowid. Returns false, changing nothing, if already present.
    pub(crate) fn try_push(&mut self, rowid: RowId) -> bool {
        if !self.members.insert(rowid) {
            return false;
        }
        self.rowids.push_back(rowid);
        true
    }

    /// Unregister a rowid from whichever end holds it.
    ///
    /// # Panics
    /// Panics if `rowid` is at neither end. Removing from the middle would
    /// desynchronize the kind columns from the mixtures.
    pub(crate) fn pop(&mut self, rowid: RowId) -> QueueEnd {
        let end = if self.rowids.back() == Some(&rowid) {
            self.rowids.pop_back();
            QueueEnd::Back
        } else if self.rowids.front() == Some(&rowid) {
            self.rowids.pop_front();
            QueueEnd::Front
        } else {
            panic!(
                "row {rowid} is not at either end of the assignment queue (span {:?} .. {:?})",
                self.rowids.front(),
                self.rowids.back()
            );
        };
        self.members.remove(&rowid);
        end
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Assignments {
    pub(crate) rows: RowQueue,
    pub(crate) groupids: Vec<VecDeque<GlobalId>>,
}

impl Assignments {
    /// Empty store with `dim` kind columns.
    pub fn new(dim: usize) -> Self {
        Self {
            rows: RowQueue::default(),
            groupids: vec![VecDeque::new(); dim],
        }
    }

    /// Number of kind columns.
    #[inline]
    pub fn dim(&self) -> usize {
        self.groupids.len()
    }

    /// Number of assigned rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.rowids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.rowids.is_empty()
    }

    #[inline]
    pub fn rowids(&self) -> &VecDeque<RowId> {
        &self.rows.rowids
    }

    #[inline]
    pub fn groupids(&self, kindid: usize) -> &VecDeque<GlobalId> {
        &self.groupids[kindid]
    }

    pub fn contains(&self, rowid: RowId) -> bool {
        self.rows.members.contains(&rowid)
    }

    /// Oldest and newest assigned rowids.
    pub fn span(&self) -> Option<(RowId, RowId)> {
        Some((*self.rows.rowids.front()?, *self.rows.rowids.back()?))
    }

    /// Register a rowid. Returns false, changing nothing, if already present.
    #[inline]
    pub fn try_push_rowid(&mut self, rowid: RowId) -> bool {
        self.rows.try_push(rowid)
    }

    /// Unregister a rowid from whichever end of the queue holds it. The
    /// caller pops every kind column from the returned end.
    #[inline]
    pub fn pop_rowid(&mut self, rowid: RowId) -> QueueEnd {
        self.rows.pop(rowid)
    }

    #[inline]
    pub fn push_groupid(&mut self, kindid: usize, groupid: GlobalId) {
        self.groupids[kindid].push_back(groupid);
    }

    pub fn pop_groupid(&mut self, kindid: usize, end: QueueEnd) -> GlobalId {
        pop_end(&mut self.groupids[kindid], end).expect("kind column is shorter than the rowid queue")
    }

    /// Append an empty kind column. The caller must fill it to `len()`.
    pub fn packed_add(&mut self) -> usize {
        self.groupids.push(VecDeque::new());
        self.groupids.len() - 1
    }

    /// Drop a kind column. Later columns shift down by one.
    pub fn packed_remove(&mut self, kindid: usize) {
        self.groupids.remove(kindid);
    }

    /// Record for the row at queue position `pos`.
    pub fn get(&self, pos: usize) -> Assignment {
        Assignment {
            rowid: self.rows.rowids[pos],
            groupids: self.groupids.iter().map(|column| column[pos]).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Assignment> + '_ {
        (0..self.len()).map(|pos| self.get(pos))
    }

    /// Append a full record, e.g. when loading a checkpoint.
    ///
    /// # Panics
    /// Panics on a duplicate rowid or a record of the wrong width.
    pub fn push(&mut self, assignment: &Assignment) {
        assert_eq!(assignment.groupids.len(), self.dim(), "assignment width != kind count");
        assert!(
            self.try_push_rowid(assignment.rowid),
            "duplicate row {} in assignments",
            assignment.rowid
        );
        for (column, &groupid) in self.groupids.iter_mut().zip(&assignment.groupids) {
            column.push_back(groupid);
        }
    }

    pub fn clear(&mut self) {
        self.rows.rowids.clear();
        self.rows.members.clear();
        self.groupids.iter_mut().for_each(VecDeque::clear);
    }

    /// Assert all columns are aligned with the rowid queue.
    pub fn validate(&self) {
        assert_eq!(self.rows.members.len(), self.rows.rowids.len(), "rowid set out of sync");
        for (kindid, column) in self.groupids.iter().enumerate() {
            assert_eq!(
                column.len(),
                self.rows.rowids.len(),
                "kind {kindid} has {} assignments for {} rows",
                column.len(),
                self.rows.rowids.len()
            );
        }
    }
}

#[inline]
pub(crate) fn pop_end<T>(queue: &mut VecDeque<T>, end: QueueEnd) -> Option<T> {
    match end {
        QueueEnd::Front => queue.pop_front(),
        QueueEnd::Back => queue.pop_back(),
    }
}
