//! Append-only row log.
//!
//! The log is the source the inference drivers read from. It is held in
//! memory; [`RowLog::load_jsonl`] and [`RowLog::dump_jsonl`] move it to and
//! from a JSON-lines file with one [`Row`] per line.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::schema::Schema;
use super::value::{Row, RowId};
use crate::error::EngineError;

/// Ordered rows with strictly increasing ids.
#[derive(Clone, Debug, Default)]
pub struct RowLog {
    rows: Vec<Row>,
}

impl RowLog {
    /// Build a log, checking that ids strictly increase.
    pub fn from_rows(rows: Vec<Row>) -> Result<Self, EngineError> {
        if let Some(pair) = rows.windows(2).find(|w| w[0].id >= w[1].id) {
            return Err(EngineError::RowLog(format!(
                "row ids must strictly increase, got {} then {}",
                pair[0].id, pair[1].id
            )));
        }
        Ok(Self { rows })
    }

    /// Append a row. Its id must exceed every id already in the log.
    pub fn push(&mut self, row: Row) -> Result<(), EngineError> {
        if let Some(last) = self.rows.last() {
            if last.id >= row.id {
                return Err(EngineError::RowLog(format!(
                    "row id {} does not follow {}",
                    row.id, last.id
                )));
            }
        }
        self.rows.push(row);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[inline]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[inline]
    pub fn get(&self, pos: usize) -> &Row {
        &self.rows[pos]
    }

    /// Find a row by id.
    pub fn find(&self, id: RowId) -> Option<&Row> {
        self.rows
            .binary_search_by_key(&id, |row| row.id)
            .ok()
            .map(|pos| &self.rows[pos])
    }

    /// Check every row against the schema.
    pub fn validate(&self, schema: &Schema) -> Result<(), EngineError> {
        match self.rows.iter().find(|row| !schema.is_valid(&row.value)) {
            Some(row) => Err(EngineError::Schema(format!(
                "row {} does not match the model schema",
                row.id
            ))),
            None => Ok(()),
        }
    }

    pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let reader = BufReader::new(File::open(path)?);
        let mut rows = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str(&line)?);
        }
        Self::from_rows(rows)
    }

    pub fn dump_jsonl(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let mut writer = BufWriter::new(File::create(path)?);
        for row in &self.rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}
