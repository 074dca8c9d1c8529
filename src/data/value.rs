//! Sparse row values.

use serde::{Deserialize, Serialize};

/// Row identifier. Strictly increasing within a row log.
pub type RowId = u64;

/// A single observed cell.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Boolean(bool),
    Count(u32),
    Real(f64),
}

/// Sparse feature vector: only observed entries are present.
///
/// Entries are `(feature id, datum)` pairs sorted by feature id. Feature ids
/// are global for a full row value and kind-local for a value produced by
/// [`CrossCat::value_split`](crate::model::CrossCat::value_split).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Value {
    entries: Vec<(usize, Datum)>,
}

impl Value {
    /// Create a value, sorting entries by feature id.
    pub fn new(mut entries: Vec<(usize, Datum)>) -> Self {
        entries.sort_by_key(|&(featureid, _)| featureid);
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a sparse value from a dense observation vector.
    pub fn from_dense(data: &[Option<Datum>]) -> Self {
        let entries = data
            .iter()
            .enumerate()
            .filter_map(|(featureid, datum)| datum.map(|d| (featureid, d)))
            .collect();
        Self { entries }
    }

    #[inline]
    pub fn entries(&self) -> &[(usize, Datum)] {
        &self.entries
    }

    /// Number of observed entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, featureid: usize) -> Option<&Datum> {
        self.entries
            .binary_search_by_key(&featureid, |&(f, _)| f)
            .ok()
            .map(|i| &self.entries[i].1)
    }

    /// Append an entry. Feature ids must be pushed in increasing order.
    #[inline]
    pub fn push(&mut self, featureid: usize, datum: Datum) {
        debug_assert!(self.entries.last().map_or(true, |&(f, _)| f < featureid));
        self.entries.push((featureid, datum));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &(usize, Datum)> {
        self.entries.iter()
    }
}

/// A row of the row log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    pub value: Value,
}

impl Row {
    pub fn new(id: RowId, value: Value) -> Self {
        Self { id, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sorts_entries() {
        let v = Value::new(vec![(3, Datum::Count(2)), (1, Datum::Boolean(true))]);
        let ids: Vec<usize> = v.iter().map(|&(f, _)| f).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_get() {
        let v = Value::new(vec![(0, Datum::Real(0.5)), (4, Datum::Count(9))]);
        assert_eq!(v.get(4), Some(&Datum::Count(9)));
        assert_eq!(v.get(2), None);
    }

    #[test]
    fn test_from_dense_skips_unobserved() {
        let v = Value::from_dense(&[None, Some(Datum::Boolean(false)), None]);
        assert_eq!(v.entries(), &[(1, Datum::Boolean(false))]);
    }

    #[test]
    fn test_row_json_shape() {
        let row = Row::new(7, Value::new(vec![(0, Datum::Boolean(true))]));
        let json = serde_json::to_string(&row).unwrap();
        let back: Row = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }
}
