//! crosscats: streaming cross-categorization inference for Rust.
//!
//! A cross-categorization partitions the features of a table into kinds and,
//! within each kind, clusters the rows into groups under a Dirichlet process
//! mixture with conjugate per-feature priors. Rows arrive from an
//! append-only log and are added and removed incrementally.
//!
//! # Key Types
//!
//! - [`Engine`] - Inference state with the row lifecycle and drivers
//! - [`EngineConfig`] / [`KindStructureParams`] - Configuration
//! - [`CrossCat`] - The feature partition and per-kind mixtures
//! - [`RowLog`] / [`Schema`] - Input rows and their feature types
//! - [`PredictQuery`] / [`PredictResult`] - Conditional sampling
//!
//! # Inference
//!
//! Build a model with [`CrossCat::from_partition`] (or load one with
//! [`Engine::load`]), wrap it in an [`Engine`], then stream rows with
//! [`Engine::infer_multi_pass`] or [`Engine::infer_kind_structure`].
//! See the [`engine`] module for the available drivers.
//!
//! ```
//! use crosscats::testing::{mixed_schema, synthetic_log};
//! use crosscats::{CrossCat, Engine, EngineConfig};
//!
//! let schema = mixed_schema(3, 0, 1);
//! let log = synthetic_log(&schema, 40, 2, 1.0, 0);
//! let cross_cat = CrossCat::single_kind(schema, 1, 1.0);
//! let mut engine = Engine::new(EngineConfig::default(), cross_cat);
//! engine.infer_multi_pass(&log, 2.0).unwrap();
//! assert_eq!(engine.assignments().len(), 40);
//! ```

pub mod data;
pub mod engine;
pub mod error;
pub mod model;
pub mod persist;
pub mod testing;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use engine::{
    Assignment, Engine, EngineConfig, KindStructureParams, PosteriorSample, PredictQuery, PredictResult,
};

pub use model::{CrossCat, Kind, Mixture, ProductModel};

pub use data::{Datum, FeatureType, Row, RowId, RowLog, Schema, Value};

pub use error::EngineError;

pub use utils::Parallelism;
