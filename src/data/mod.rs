//! Row data: typed cells, sparse values, schemas and the row log.
//!
//! # Overview
//!
//! - [`Datum`]: a single observed cell (boolean, count or real)
//! - [`Value`]: sparse list of `(feature id, datum)` pairs
//! - [`Row`]: a value tagged with a monotonically increasing [`RowId`]
//! - [`Schema`]: per-feature [`FeatureType`] used to validate values
//! - [`RowLog`]: the append-only sequence of rows the drivers consume

mod row_log;
mod schema;
mod value;

pub use row_log::RowLog;
pub use schema::{FeatureType, Schema};
pub use value::{Datum, Row, RowId, Value};
