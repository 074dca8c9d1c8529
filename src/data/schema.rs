//! Feature type definitions.
//!
//! This module defines the schema that describes which datum type each
//! feature carries, and validates values against it.

use serde::{Deserialize, Serialize};

use super::value::{Datum, Value};

/// Logical feature types.
///
/// Each type pairs with one conjugate model family in [`crate::model`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeatureType {
    /// Two-valued feature (Beta-Bernoulli).
    #[default]
    Boolean,
    /// Non-negative integer feature (Gamma-Poisson).
    Count,
    /// Real-valued feature (Normal-Inverse-Chi-Squared).
    Real,
}

impl FeatureType {
    /// Returns true if `datum` is of this type.
    #[inline]
    pub fn accepts(self, datum: &Datum) -> bool {
        matches!(
            (self, datum),
            (FeatureType::Boolean, Datum::Boolean(_))
                | (FeatureType::Count, Datum::Count(_))
                | (FeatureType::Real, Datum::Real(_))
        )
    }
}

/// Ordered list of feature types, indexed by global feature id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    features: Vec<FeatureType>,
}

impl Schema {
    pub fn new(features: Vec<FeatureType>) -> Self {
        Self { features }
    }

    /// Number of features.
    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    #[inline]
    pub fn feature_type(&self, featureid: usize) -> FeatureType {
        self.features[featureid]
    }

    pub fn features(&self) -> &[FeatureType] {
        &self.features
    }

    /// Check that a sparse value fits this schema.
    ///
    /// Feature ids must be in range and strictly increasing, and each datum
    /// must match its feature's declared type.
    pub fn is_valid(&self, value: &Value) -> bool {
        let mut prev: Option<usize> = None;
        for &(featureid, ref datum) in value.entries() {
            if featureid >= self.features.len() || prev.is_some_and(|p| p >= featureid) {
                return false;
            }
            if !self.features[featureid].accepts(datum) {
                return false;
            }
            prev = Some(featureid);
        }
        true
    }

    /// Check that a dense observation vector fits this schema.
    ///
    /// The vector must be exactly as wide as the schema; `None` marks an
    /// unobserved feature.
    pub fn is_valid_dense(&self, data: &[Option<Datum>]) -> bool {
        data.len() == self.features.len()
            && data
                .iter()
                .zip(&self.features)
                .all(|(datum, ftype)| datum.as_ref().map_or(true, |d| ftype.accepts(d)))
    }
}
