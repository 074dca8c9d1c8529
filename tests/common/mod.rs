//! Shared fixtures for integration tests.
//!
//! For data generators and mixture assertions, use `crosscats::testing`.

#![allow(dead_code)]

use crosscats::data::{Datum, FeatureType, Row, RowLog, Schema, Value};
use crosscats::testing::{mixed_schema, synthetic_log};
use crosscats::{CrossCat, Engine, EngineConfig};

// =============================================================================
// Rows
// =============================================================================

/// Row of boolean cells, one per feature.
pub fn bool_row(id: u64, bits: &[bool]) -> Row {
    Row::new(
        id,
        Value::new(bits.iter().enumerate().map(|(f, &b)| (f, Datum::Boolean(b))).collect()),
    )
}

/// Boolean-only log where rows fall into two blocks per feature pair.
pub fn bool_log(rows: u64, features: usize) -> RowLog {
    let rows = (0..rows)
        .map(|i| {
            let bits: Vec<bool> = (0..features).map(|f| (i as usize + f / 2) % 3 == 0).collect();
            bool_row(i, &bits)
        })
        .collect();
    RowLog::from_rows(rows).expect("ids increase")
}

/// Mixed-type synthetic log: 3 boolean, 2 count and 2 real features.
pub fn mixed_log(rows: usize, seed: u64) -> (Schema, RowLog) {
    let schema = mixed_schema(3, 2, 2);
    let log = synthetic_log(&schema, rows, 3, 0.9, seed);
    (schema, log)
}

// =============================================================================
// Engines
// =============================================================================

pub fn engine_with(schema: Schema, partition: &[usize], config: EngineConfig) -> Engine {
    let cross_cat = CrossCat::from_partition(schema, partition, config.empty_group_count, config.kind_alpha)
        .expect("valid partition");
    Engine::new(config, cross_cat)
}

pub fn bool_engine(partition: &[usize]) -> Engine {
    let schema = Schema::new(vec![FeatureType::Boolean; partition.len()]);
    engine_with(schema, partition, EngineConfig::default())
}
