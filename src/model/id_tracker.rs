//! Packed ↔ global group id translation.
//!
//! Mixtures keep their live groups in a dense vector (packed ids) so scoring
//! is a tight loop over contiguous memory. Removing a group swap-removes it,
//! so packed ids are not stable. Global ids are assigned once and never
//! reused; they are what assignments record and what checkpoints persist.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Stable identifier of a group, surviving repacking.
pub type GlobalId = u64;

/// Dense index of a live group.
pub type PackedId = usize;

/// Arena index: dense `packed → global` vector plus a `global → packed` map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTracker {
    packed_to_global: Vec<GlobalId>,
    #[serde(skip)]
    global_to_packed: HashMap<GlobalId, PackedId>,
    next_global: GlobalId,
}

impl IdTracker {
    /// Tracker for `size` groups with global ids `0..size`.
    pub fn new(size: usize) -> Self {
        let mut tracker = Self::default();
        for _ in 0..size {
            tracker.packed_add();
        }
        tracker
    }

    /// Number of live groups.
    #[inline]
    pub fn len(&self) -> usize {
        self.packed_to_global.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packed_to_global.is_empty()
    }

    /// Register a new group at the next packed slot. Returns its global id.
    pub fn packed_add(&mut self) -> GlobalId {
        let global = self.next_global;
        self.next_global += 1;
        self.global_to_packed.insert(global, self.packed_to_global.len());
        self.packed_to_global.push(global);
        global
    }

    /// Remove the group at `packed`; the last group moves into its slot.
    pub fn packed_remove(&mut self, packed: PackedId) {
        let removed = self.packed_to_global.swap_remove(packed);
        self.global_to_packed.remove(&removed);
        if let Some(&moved) = self.packed_to_global.get(packed) {
            self.global_to_packed.insert(moved, packed);
        }
    }

    #[inline]
    pub fn packed_to_global(&self, packed: PackedId) -> GlobalId {
        self.packed_to_global[packed]
    }

    /// Translate a global id to its current packed slot.
    ///
    /// # Panics
    /// Panics if the group is not live; assignments must only reference
    /// groups that still hold the row being removed.
    #[inline]
    pub fn global_to_packed(&self, global: GlobalId) -> PackedId {
        match self.global_to_packed.get(&global) {
            Some(&packed) => packed,
            None => panic!("global group id {global} is not live"),
        }
    }

    pub fn contains_global(&self, global: GlobalId) -> bool {
        self.global_to_packed.contains_key(&global)
    }

    pub fn globals(&self) -> &[GlobalId] {
        &self.packed_to_global
    }

    /// Rebuild the reverse map after deserialization.
    pub fn rebuild_index(&mut self) {
        self.global_to_packed = self
            .packed_to_global
            .iter()
            .enumerate()
            .map(|(packed, &global)| (global, packed))
            .collect();
    }

    /// Assert the two directions agree.
    pub fn validate(&self) {
        assert_eq!(
            self.global_to_packed.len(),
            self.packed_to_global.len(),
            "id tracker maps differ in size"
        );
        for (packed, &global) in self.packed_to_global.iter().enumerate() {
            assert_eq!(self.global_to_packed(global), packed, "id tracker is not a bijection");
            assert!(global < self.next_global, "global id {global} was never issued");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_identity() {
        let tracker = IdTracker::new(4);
        for i in 0..4 {
            assert_eq!(tracker.packed_to_global(i), i as GlobalId);
            assert_eq!(tracker.global_to_packed(i as GlobalId), i);
        }
        tracker.validate();
    }

    #[test]
    fn test_remove_moves_last_into_slot() {
        let mut tracker = IdTracker::new(4);
        tracker.packed_remove(1);
        assert_eq!(tracker.globals(), &[0, 3, 2]);
        assert_eq!(tracker.global_to_packed(3), 1);
        assert!(!tracker.contains_global(1));
        tracker.validate();
    }

    #[test]
    fn test_remove_last() {
        let mut tracker = IdTracker::new(3);
        tracker.packed_remove(2);
        assert_eq!(tracker.globals(), &[0, 1]);
        tracker.validate();
    }

    #[test]
    fn test_global_ids_are_never_reused() {
        let mut tracker = IdTracker::new(2);
        tracker.packed_remove(1);
        let fresh = tracker.packed_add();
        assert_eq!(fresh, 2);
        assert_eq!(tracker.globals(), &[0, 2]);
    }

    #[test]
    fn test_bijection_after_churn() {
        let mut tracker = IdTracker::new(5);
        tracker.packed_remove(0);
        tracker.packed_add();
        tracker.packed_remove(2);
        tracker.packed_add();
        tracker.packed_remove(tracker.len() - 1);
        for packed in 0..tracker.len() {
            let global = tracker.packed_to_global(packed);
            assert_eq!(tracker.global_to_packed(global), packed);
        }
        tracker.validate();
    }

    #[test]
    fn test_rebuild_index_after_json() {
        let mut tracker = IdTracker::new(3);
        tracker.packed_remove(0);
        let json = serde_json::to_string(&tracker).unwrap();
        let mut back: IdTracker = serde_json::from_str(&json).unwrap();
        back.rebuild_index();
        assert_eq!(back, tracker);
    }

    #[test]
    #[should_panic(expected = "not live")]
    fn test_unknown_global_panics() {
        IdTracker::new(1).global_to_packed(9);
    }
}
