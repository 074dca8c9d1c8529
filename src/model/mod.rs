//! Probabilistic state of the cross-categorization.
//!
//! # Overview
//!
//! - [`FeatureModel`] / [`FeatureStats`]: conjugate per-feature priors and
//!   their sufficient statistics
//! - [`ProductModel`] and [`Group`]: a CRP [`Clustering`] plus one feature
//!   model per feature, and one mixture component
//! - [`IdTracker`]: packed ↔ global group id arena
//! - [`Mixture`]: the groups of one kind
//! - [`Kind`] and [`CrossCat`]: the feature partition

mod cross_cat;
mod feature;
mod id_tracker;
mod mixture;
mod product;

pub use cross_cat::{CrossCat, Kind};
pub use feature::{FeatureModel, FeatureStats};
pub use id_tracker::{GlobalId, IdTracker, PackedId};
pub use mixture::Mixture;
pub use product::{Clustering, Group, ProductModel};
