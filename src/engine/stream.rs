//! Dual cyclic cursor over a row log.

use crate::data::{Row, RowId, RowLog};

/// Two independent cursors over the same log: one leading through rows not
/// yet assigned, one trailing through assigned rows oldest-first. Both wrap
/// to the start of the log at the end.
#[derive(Debug)]
pub struct StreamInterval<'a> {
    log: &'a RowLog,
    unassigned: usize,
    assigned: usize,
}

impl<'a> StreamInterval<'a> {
    /// Position both cursors for a run over `log`.
    ///
    /// `span` is the (oldest, newest) assigned rowid of a previous run, if
    /// any. The leading cursor skips past `newest`; the trailing cursor reads
    /// up to `oldest` and hands that row to `remove_row`, retracting the last
    /// step of the interrupted run.
    ///
    /// # Panics
    /// Panics if the log is empty or does not contain the span's rows.
    pub fn resume<F>(log: &'a RowLog, span: Option<(RowId, RowId)>, remove_row: F) -> Self
    where
        F: FnOnce(&'a Row),
    {
        assert!(!log.is_empty(), "cannot stream an empty row log");
        let mut interval = Self {
            log,
            unassigned: 0,
            assigned: 0,
        };
        if let Some((first, last)) = span {
            interval.skip_unassigned_through(last);
            let oldest = interval.skip_assigned_through(first);
            remove_row(oldest);
        }
        interval
    }

    /// Next row for the leading cursor.
    pub fn read_unassigned(&mut self) -> &'a Row {
        Self::cyclic_read(self.log, &mut self.unassigned)
    }

    /// Next row for the trailing cursor.
    pub fn read_assigned(&mut self) -> &'a Row {
        Self::cyclic_read(self.log, &mut self.assigned)
    }

    fn skip_unassigned_through(&mut self, rowid: RowId) {
        self.log
            .find(rowid)
            .unwrap_or_else(|| panic!("assigned row {rowid} is missing from the row log"));
        while self.read_unassigned().id != rowid {}
    }

    fn skip_assigned_through(&mut self, rowid: RowId) -> &'a Row {
        self.log
            .find(rowid)
            .unwrap_or_else(|| panic!("assigned row {rowid} is missing from the row log"));
        loop {
            let row = self.read_assigned();
            if row.id == rowid {
                return row;
            }
        }
    }

    #[inline]
    fn cyclic_read(log: &'a RowLog, pos: &mut usize) -> &'a Row {
        let row = log.get(*pos);
        *pos += 1;
        if *pos == log.len() {
            *pos = 0;
        }
        row
    }
}
