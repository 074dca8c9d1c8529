//! Engine configuration with builder pattern.
//!
//! [`EngineConfig`] holds the knobs that stay fixed for the lifetime of an
//! [`Engine`](super::Engine). Per-run knobs of the kind-structure search live
//! in [`KindStructureParams`].
//!
//! # Example
//!
//! ```
//! use crosscats::engine::EngineConfig;
//!
//! // All defaults
//! let config = EngineConfig::builder().build().unwrap();
//!
//! // Parallel kind-structure search with two workers
//! let config = EngineConfig::builder()
//!     .algorithm8_parallel(2)
//!     .empty_group_count(2)
//!     .seed(7)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.algorithm8_parallel, 2);
//! ```

use bon::Builder;


// =============================================================================
// ConfigError
// =============================================================================

/// Errors that can occur during configuration validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Mixtures need at least one empty group to open new groups.
    #[error("empty_group_count must be at least 1")]
    InvalidEmptyGroupCount,
    /// The CRP concentration over kinds must be positive.
    #[error("kind_alpha must be positive and finite, got {0}")]
    InvalidKindAlpha(f64),
    /// At least one flush per pass.
    #[error("flushes_per_pass must be at least 1")]
    InvalidFlushesPerPass,
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Configuration of an inference engine.
#[derive(Debug, Clone, Builder)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
pub struct EngineConfig {
    // === Mixtures ===
    /// Number of empty groups each mixture keeps open. Default: 1.
    #[builder(default = 1)]
    pub empty_group_count: usize,

    // === Kind structure ===
    /// Concentration of the CRP prior over kinds. Default: 1.0.
    #[builder(default = 1.0)]
    pub kind_alpha: f64,

    /// Worker threads for the kind-structure search. 0 runs it on the
    /// driver thread. Default: 0.
    #[builder(default = 0)]
    pub algorithm8_parallel: usize,

    // === Scheduling ===
    /// Hyperparameter refreshes per pass over the rows. Default: 2.
    #[builder(default = 2)]
    pub flushes_per_pass: usize,

    // === Resource control ===
    /// Size of the thread pool for kind-parallel phases (hyperparameter
    /// refresh and kind scoring). 0 = auto, 1 = sequential, >1 = exact
    /// count. Default: 0.
    #[builder(default = 0)]
    pub n_threads: usize,

    // === Reproducibility ===
    /// Random seed. Default: 42.
    #[builder(default = 42)]
    pub seed: u64,
}

/// Custom finishing function that validates the config.
impl<S: engine_config_builder::IsComplete> EngineConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any parameter is invalid:
    /// - `empty_group_count == 0`
    /// - `kind_alpha <= 0` or not finite
    /// - `flushes_per_pass == 0`
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.empty_group_count == 0 {
            return Err(ConfigError::InvalidEmptyGroupCount);
        }
        if !(self.kind_alpha > 0.0 && self.kind_alpha.is_finite()) {
            return Err(ConfigError::InvalidKindAlpha(self.kind_alpha));
        }
        if self.flushes_per_pass == 0 {
            return Err(ConfigError::InvalidFlushesPerPass);
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build().expect("default config is valid")
    }
}

// =============================================================================
// KindStructureParams
// =============================================================================

/// Parameters of one kind-structure search run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KindStructureParams {
    /// Remove/re-add passes after every row has been added once.
    pub extra_passes: f64,
    /// Empty kinds kept available as destinations for feature moves.
    pub ephemeral_kind_count: usize,
    /// Gibbs sweeps over features per search step.
    pub iterations: usize,
}

impl Default for KindStructureParams {
    fn default() -> Self {
        Self {
            extra_passes: 1.0,
            ephemeral_kind_count: 4,
            iterations: 10,
        }
    }
}
