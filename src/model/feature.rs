//! Conjugate per-feature models and their sufficient statistics.
//!
//! Each [`FeatureModel`] variant pairs with one [`FeatureStats`] variant and
//! one [`FeatureType`]. Priors, posteriors and statistics are the `rv`
//! types; this module only dispatches on the feature type. All scores are
//! natural-log probabilities.
//!
//! | Feature type | Prior | Likelihood | Sufficient statistics |
//! |---|---|---|---|
//! | `Boolean` | `Beta` | `Bernoulli` | `BernoulliSuffStat` |
//! | `Count` | `Gamma` | `Poisson` | `PoissonSuffStat` |
//! | `Real` | `NormalInvChiSquared` | `Gaussian` | `GaussianSuffStat` |

use rand::Rng;
use rand_distr::{Distribution, Poisson as PoissonDistr, StudentT};
use rv::data::{BernoulliSuffStat, DataOrSuffStat, GaussianSuffStat, PoissonSuffStat};
use rv::dist::{Bernoulli, Beta, Gamma, Gaussian, NormalInvChiSquared, Poisson};
use rv::traits::{ConjugatePrior, Rv, SuffStat};
use serde::{Deserialize, Serialize};

use crate::data::{Datum, FeatureType};

// =============================================================================
// FeatureModel
// =============================================================================

/// Prior for one feature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FeatureModel {
    BetaBernoulli(Beta),
    GammaPoisson(Gamma),
    NormalInvChiSquared(NormalInvChiSquared),
}

#[inline]
fn bernoulli_stat(stat: &BernoulliSuffStat) -> DataOrSuffStat<'_, bool, Bernoulli> {
    DataOrSuffStat::SuffStat(stat)
}

#[inline]
fn poisson_stat(stat: &PoissonSuffStat) -> DataOrSuffStat<'_, u32, Poisson> {
    DataOrSuffStat::SuffStat(stat)
}

#[inline]
fn gaussian_stat(stat: &GaussianSuffStat) -> DataOrSuffStat<'_, f64, Gaussian> {
    DataOrSuffStat::SuffStat(stat)
}

impl FeatureModel {
    /// Weakly informative defaults for a feature type.
    pub fn default_for(ftype: FeatureType) -> Self {
        match ftype {
            FeatureType::Boolean => Self::BetaBernoulli(Beta::new_unchecked(1.0, 1.0)),
            FeatureType::Count => Self::GammaPoisson(Gamma::new_unchecked(1.0, 1.0)),
            FeatureType::Real => Self::NormalInvChiSquared(NormalInvChiSquared::new_unchecked(0.0, 1.0, 1.0, 1.0)),
        }
    }

    pub fn feature_type(&self) -> FeatureType {
        match self {
            Self::BetaBernoulli(_) => FeatureType::Boolean,
            Self::GammaPoisson(_) => FeatureType::Count,
            Self::NormalInvChiSquared(_) => FeatureType::Real,
        }
    }

    /// Statistics of a group with no observations of this feature.
    pub fn empty_stats(&self) -> FeatureStats {
        match self {
            Self::BetaBernoulli(_) => FeatureStats::Boolean(BernoulliSuffStat::new()),
            Self::GammaPoisson(_) => FeatureStats::Count(PoissonSuffStat::new()),
            Self::NormalInvChiSquared(_) => FeatureStats::Real(GaussianSuffStat::new()),
        }
    }

    /// Hyperparameters are finite and strictly positive where required.
    ///
    /// Deserialized priors bypass the `rv` constructors, so checkpoints are
    /// checked with this.
    pub fn is_valid(&self) -> bool {
        let positive = |x: f64| x.is_finite() && x > 0.0;
        match self {
            Self::BetaBernoulli(beta) => positive(beta.alpha()) && positive(beta.beta()),
            Self::GammaPoisson(gamma) => positive(gamma.shape()) && positive(gamma.rate()),
            Self::NormalInvChiSquared(nix) => {
                nix.m().is_finite() && positive(nix.k()) && positive(nix.v()) && positive(nix.s2())
            }
        }
    }

    /// Posterior predictive log probability of `datum` given `stats`.
    pub fn score_value(&self, stats: &FeatureStats, datum: &Datum) -> f64 {
        match (self, stats, datum) {
            (Self::BetaBernoulli(prior), FeatureStats::Boolean(stat), Datum::Boolean(x)) => {
                prior.ln_pp(x, &bernoulli_stat(stat))
            }
            (Self::GammaPoisson(prior), FeatureStats::Count(stat), Datum::Count(x)) => {
                prior.ln_pp(x, &poisson_stat(stat))
            }
            (Self::NormalInvChiSquared(prior), FeatureStats::Real(stat), Datum::Real(x)) => {
                prior.ln_pp(x, &gaussian_stat(stat))
            }
            _ => type_mismatch(self, datum),
        }
    }

    /// Log marginal likelihood of all observations summarized by `stats`.
    pub fn log_marginal(&self, stats: &FeatureStats) -> f64 {
        if stats.count() == 0 {
            return 0.0;
        }
        match (self, stats) {
            (Self::BetaBernoulli(prior), FeatureStats::Boolean(stat)) => prior.ln_m(&bernoulli_stat(stat)),
            (Self::GammaPoisson(prior), FeatureStats::Count(stat)) => prior.ln_m(&poisson_stat(stat)),
            (Self::NormalInvChiSquared(prior), FeatureStats::Real(stat)) => prior.ln_m(&gaussian_stat(stat)),
            _ => panic!(
                "feature statistics do not match feature model {:?}",
                self.feature_type()
            ),
        }
    }

    /// Draw a datum from the posterior predictive given `stats`.
    pub fn sample_value<R: Rng + ?Sized>(&self, stats: &FeatureStats, rng: &mut R) -> Datum {
        let mut rng = rng;
        match (self, stats) {
            (Self::BetaBernoulli(prior), FeatureStats::Boolean(stat)) => {
                let posterior = prior.posterior(&bernoulli_stat(stat));
                let p: f64 = posterior.draw(&mut rng);
                Datum::Boolean(rng.gen_bool(p.clamp(0.0, 1.0)))
            }
            (Self::GammaPoisson(prior), FeatureStats::Count(stat)) => {
                let posterior = prior.posterior(&poisson_stat(stat));
                let lambda: f64 = posterior.draw(&mut rng);
                match PoissonDistr::new(lambda) {
                    Ok(poisson) => {
                        let x: f64 = poisson.sample(&mut rng);
                        Datum::Count(x.min(u32::MAX as f64) as u32)
                    }
                    // Underflowed rate.
                    Err(_) => Datum::Count(0),
                }
            }
            (Self::NormalInvChiSquared(prior), FeatureStats::Real(stat)) => {
                let posterior = prior.posterior(&gaussian_stat(stat));
                let scale = (posterior.s2() * (1.0 + 1.0 / posterior.k())).sqrt();
                let t = StudentT::new(posterior.v()).expect("posterior degrees of freedom are positive");
                Datum::Real(posterior.m() + scale * t.sample(&mut rng))
            }
            _ => panic!(
                "feature statistics do not match feature model {:?}",
                self.feature_type()
            ),
        }
    }

    /// Candidate priors for grid inference.
    ///
    /// The current prior is always the first candidate so a flat posterior
    /// over the grid never forces a move away from it.
    pub fn hyper_grid(&self) -> Vec<FeatureModel> {
        const SMALL_GRID: [f64; 3] = [0.5, 1.0, 2.0];
        const RATE_GRID: [f64; 4] = [0.25, 0.5, 1.0, 2.0];
        const SHAPE_GRID: [f64; 4] = [0.5, 1.0, 2.0, 4.0];
        const SCALE_GRID: [f64; 3] = [0.1, 1.0, 10.0];

        let mut grid = vec![self.clone()];
        match self {
            Self::BetaBernoulli(_) => {
                for &alpha in &SMALL_GRID {
                    for &beta in &SMALL_GRID {
                        grid.push(Self::BetaBernoulli(Beta::new_unchecked(alpha, beta)));
                    }
                }
            }
            Self::GammaPoisson(_) => {
                for &shape in &SHAPE_GRID {
                    for &rate in &RATE_GRID {
                        grid.push(Self::GammaPoisson(Gamma::new_unchecked(shape, rate)));
                    }
                }
            }
            Self::NormalInvChiSquared(nix) => {
                for &k in &SCALE_GRID {
                    for &s2 in &SCALE_GRID {
                        grid.push(Self::NormalInvChiSquared(NormalInvChiSquared::new_unchecked(
                            nix.m(),
                            k,
                            nix.v(),
                            s2,
                        )));
                    }
                }
            }
        }
        grid
    }
}

#[cold]
fn type_mismatch(model: &FeatureModel, datum: &Datum) -> ! {
    panic!(
        "datum {:?} does not match feature model {:?}",
        datum,
        model.feature_type()
    )
}

// =============================================================================
// FeatureStats
// =============================================================================

/// Sufficient statistics of one feature within one group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FeatureStats {
    Boolean(BernoulliSuffStat),
    Count(PoissonSuffStat),
    Real(GaussianSuffStat),
}

impl FeatureStats {
    /// Number of observations summarized.
    pub fn count(&self) -> usize {
        match self {
            Self::Boolean(stat) => stat.n(),
            Self::Count(stat) => stat.n(),
            Self::Real(stat) => stat.n(),
        }
    }

    pub fn add(&mut self, datum: &Datum) {
        match (self, datum) {
            (Self::Boolean(stat), Datum::Boolean(x)) => stat.observe(x),
            (Self::Count(stat), Datum::Count(x)) => stat.observe(x),
            (Self::Real(stat), Datum::Real(x)) => stat.observe(x),
            (stats, datum) => panic!("datum {datum:?} does not match statistics {stats:?}"),
        }
    }

    /// Remove a datum previously added. Resets exactly to the empty state
    /// when the last observation leaves.
    pub fn remove(&mut self, datum: &Datum) {
        assert!(self.count() > 0, "removing a datum from empty statistics");
        match (&mut *self, datum) {
            (Self::Boolean(stat), Datum::Boolean(x)) => stat.forget(x),
            (Self::Count(stat), Datum::Count(x)) => stat.forget(x),
            (Self::Real(stat), Datum::Real(x)) => stat.forget(x),
            (stats, datum) => panic!("datum {datum:?} does not match statistics {stats:?}"),
        }
        if self.count() == 0 {
            let empty = match self {
                Self::Boolean(_) => Self::Boolean(BernoulliSuffStat::new()),
                Self::Count(_) => Self::Count(PoissonSuffStat::new()),
                Self::Real(_) => Self::Real(GaussianSuffStat::new()),
            };
            *self = empty;
        }
    }
}
