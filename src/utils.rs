//! Common utilities used across the crate.
//!
//! This module provides categorical sampling over log-scores (on top of
//! `rv::misc`) and the thread pool control used by the kind-parallel phases
//! of inference.

use rand::Rng;
use rayon::prelude::*;
use rv::misc::{ln_pflip, logsumexp, pflip};

// =============================================================================
// Categorical Sampling
// =============================================================================

/// Convert log-scores in place to a normalized probability vector.
pub fn scores_to_probs(scores: &mut [f64]) {
    let norm = logsumexp(scores);
    scores.iter_mut().for_each(|s| *s = (*s - norm).exp());
}

/// Draw an index proportional to `probs`. The weights need not sum to one.
#[inline]
pub fn sample_from_probs<R: Rng + ?Sized>(mut rng: &mut R, probs: &[f64]) -> usize {
    debug_assert!(!probs.is_empty(), "cannot sample from an empty distribution");
    pflip(probs, 1, &mut rng)[0]
}

/// Draw an index proportional to `exp(scores)`.
#[inline]
pub fn sample_from_scores<R: Rng + ?Sized>(mut rng: &mut R, scores: &[f64]) -> usize {
    assert!(!scores.is_empty(), "cannot sample from an empty score vector");
    ln_pflip(scores, 1, false, &mut rng)[0]
}

// =============================================================================
// Parallelism Configuration
// =============================================================================

/// Whether parallel execution is allowed.
///
/// Passed into the kind-parallel phases (hyperparameter inference and
/// kind-structure scoring). When `true`, those phases use `rayon` parallel
/// iterators; otherwise they iterate sequentially.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    Parallel,
}

impl Parallelism {
    /// Create from thread count semantics.
    ///
    /// - 0 = auto (parallel if rayon pool has multiple threads, sequential otherwise)
    /// - 1 = sequential
    /// - >1 = parallel
    #[inline]
    pub fn from_threads(n_threads: usize) -> Self {
        if n_threads == 1 || (n_threads == 0 && rayon::current_num_threads() == 1) {
            Parallelism::Sequential
        } else {
            Parallelism::Parallel
        }
    }

    /// Returns `true` if parallel execution is allowed.
    #[inline]
    pub fn is_parallel(self) -> bool {
        matches!(self, Parallelism::Parallel)
    }

    #[inline]
    pub fn maybe_par_for_each<T, I, F>(self, iter: I, f: F)
    where
        T: Send,
        I: IntoIterator<Item = T> + IntoParallelIterator<Item = T>,
        F: Fn(T) + Sync + Send,
    {
        if self.is_parallel() {
            iter.into_par_iter().for_each(f);
        } else {
            iter.into_iter().for_each(f);
        }
    }

    #[inline]
    pub fn maybe_par_map<T, B, I, F>(self, iter: I, f: F) -> Vec<B>
    where
        T: Send,
        B: Send,
        I: IntoIterator<Item = T> + IntoParallelIterator<Item = T>,
        F: Fn(T) -> B + Sync + Send,
    {
        if self.is_parallel() {
            iter.into_par_iter().map(f).collect()
        } else {
            iter.into_iter().map(f).collect()
        }
    }
}

/// Run a closure with the appropriate thread pool.
///
/// Thread count semantics:
/// - `0` = auto (use all available cores)
/// - `1` = sequential (no thread pool)
/// - `n > 1` = use exactly `n` threads
///
/// # Example
///
/// ```
/// use crosscats::utils::{run_with_threads, Parallelism};
///
/// let width = run_with_threads(1, |parallelism| {
///     assert_eq!(parallelism, Parallelism::Sequential);
///     rayon::current_num_threads()
/// });
/// assert!(width >= 1);
/// assert_eq!(run_with_threads(3, |_| rayon::current_num_threads()), 3);
/// ```
#[inline]
pub fn run_with_threads<T: Send>(n_threads: usize, f: impl FnOnce(Parallelism) -> T + Send) -> T {
    let parallelism = Parallelism::from_threads(n_threads);

    match parallelism {
        Parallelism::Sequential => f(Parallelism::Sequential),
        Parallelism::Parallel => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n_threads)
                .build()
                .expect("Failed to create thread pool");
            pool.install(|| f(Parallelism::Parallel))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_scores_to_probs_normalizes() {
        let mut scores = vec![-1000.0, -1000.0 + 2f64.ln()];
        scores_to_probs(&mut scores);
        assert!((scores[0] - 1.0 / 3.0).abs() < 1e-12);
        assert!((scores[1] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_sample_from_scores_degenerate() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        for _ in 0..50 {
            let scores = [f64::NEG_INFINITY, 0.0, f64::NEG_INFINITY];
            assert_eq!(sample_from_scores(&mut rng, &scores), 1);
        }
    }

    #[test]
    fn test_sample_from_probs_frequencies() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let probs = [0.2, 0.8];
        let n = 20_000;
        let hits = (0..n).filter(|_| sample_from_probs(&mut rng, &probs) == 1).count();
        let freq = hits as f64 / n as f64;
        assert!((freq - 0.8).abs() < 0.02, "freq = {freq}");
    }

    #[test]
    fn test_sample_from_scores_frequencies() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let scores = [-700.0, -700.0 + 3f64.ln()];
        let n = 20_000;
        let hits = (0..n).filter(|_| sample_from_scores(&mut rng, &scores) == 1).count();
        let freq = hits as f64 / n as f64;
        assert!((freq - 0.75).abs() < 0.02, "freq = {freq}");
    }

    #[test]
    fn test_run_with_threads_sizes_pool() {
        assert_eq!(run_with_threads(2, |_| rayon::current_num_threads()), 2);
        let parallelism = run_with_threads(1, |p| p);
        assert_eq!(parallelism, Parallelism::Sequential);
    }

    #[test]
    fn test_parallelism_from_threads() {
        assert!(!Parallelism::from_threads(1).is_parallel());
        assert!(Parallelism::from_threads(2).is_parallel());
    }

    #[test]
    fn test_maybe_par_map() {
        let result: Vec<_> = Parallelism::Sequential.maybe_par_map(0..5usize, |i| i * 2);
        assert_eq!(result, vec![0, 2, 4, 6, 8]);

        let result: Vec<_> = Parallelism::Parallel.maybe_par_map(0..5usize, |i| i * 2);
        assert_eq!(result, vec![0, 2, 4, 6, 8]);
    }
}
