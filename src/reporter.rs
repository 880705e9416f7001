//! Observability for fitting loops.
//!
//! This module provides the [`FitReporter`] trait. Reporters receive
//! callbacks at key points of an EM or blocked Gibbs run without polluting
//! the algorithms themselves.
//!
//! # Zero-Cost Abstraction
//!
//! The default [`NoOpReporter`] compiles to zero overhead - all callback
//! methods are empty and will be optimized away by the compiler.
//!
//! # Example
//!
//! ```
//! use ssm_inference::reporter::{DebugReporter, FitReporter};
//!
//! let mut reporter = DebugReporter::new();
//! reporter.on_em_iteration(0, -120.5);
//! reporter.on_em_iteration(1, -118.0);
//!
//! assert_eq!(reporter.em_events().len(), 2);
//! ```

use crate::em::StopReason;
use crate::errors::InferenceError;

// ============================================================================
// FitReporter Trait
// ============================================================================

/// Observability trait for fitting loops.
///
/// All methods have default empty implementations, so you only need to
/// override the events you care about.
///
/// # Thread Safety
///
/// Reporters use `&mut self` for callbacks and are only called from the
/// thread driving the loop, so they are NOT required to be `Send + Sync`.
pub trait FitReporter {
    /// Called after each EM iteration with the log joint probability of the
    /// parameters the iteration started from.
    fn on_em_iteration(&mut self, _iteration: usize, _log_prob: f64) {}

    /// Called when an EM iteration decreased the objective beyond round-off.
    ///
    /// EM is monotone, so this signals a bug or a numerically degenerate model.
    fn on_non_monotone(&mut self, _iteration: usize, _previous: f64, _current: f64) {}

    /// Called after each Gibbs sweep with the marginal log-likelihood of the
    /// drawn parameters.
    fn on_gibbs_sample(&mut self, _sample: usize, _marginal_loglik: f64) {}

    /// Called once when the loop stops without error.
    fn on_fit_complete(&mut self, _reason: StopReason, _iterations: usize) {}

    /// Called once when the loop aborts.
    fn on_fit_failed(&mut self, _iteration: usize, _error: &InferenceError) {}
}

// ============================================================================
// NoOpReporter
// ============================================================================

/// Zero-cost reporter that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReporter;

impl NoOpReporter {
    /// Create a new no-op reporter.
    pub fn new() -> Self {
        Self
    }
}

impl FitReporter for NoOpReporter {}

// ============================================================================
// DebugReporter
// ============================================================================

/// Reporter that captures all events for post-hoc analysis.
#[derive(Debug, Clone, Default)]
pub struct DebugReporter {
    em_iterations: Vec<(usize, f64)>,
    non_monotone: Vec<(usize, f64, f64)>,
    gibbs_samples: Vec<(usize, f64)>,
    completion: Option<(StopReason, usize)>,
    failure: Option<(usize, InferenceError)>,
}

impl DebugReporter {
    /// Create a new debug reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all captured events.
    pub fn clear(&mut self) {
        self.em_iterations.clear();
        self.non_monotone.clear();
        self.gibbs_samples.clear();
        self.completion = None;
        self.failure = None;
    }

    /// Captured `(iteration, log_prob)` pairs.
    pub fn em_events(&self) -> &[(usize, f64)] {
        &self.em_iterations
    }

    /// Captured `(iteration, previous, current)` decreases.
    pub fn non_monotone_events(&self) -> &[(usize, f64, f64)] {
        &self.non_monotone
    }

    /// Captured `(sample, marginal_loglik)` pairs.
    pub fn gibbs_events(&self) -> &[(usize, f64)] {
        &self.gibbs_samples
    }

    /// Stop reason and iteration count, if the loop completed.
    pub fn completion(&self) -> Option<(StopReason, usize)> {
        self.completion
    }

    /// Iteration and error, if the loop aborted.
    pub fn failure(&self) -> Option<&(usize, InferenceError)> {
        self.failure.as_ref()
    }
}

impl FitReporter for DebugReporter {
    fn on_em_iteration(&mut self, iteration: usize, log_prob: f64) {
        self.em_iterations.push((iteration, log_prob));
    }

    fn on_non_monotone(&mut self, iteration: usize, previous: f64, current: f64) {
        self.non_monotone.push((iteration, previous, current));
    }

    fn on_gibbs_sample(&mut self, sample: usize, marginal_loglik: f64) {
        self.gibbs_samples.push((sample, marginal_loglik));
    }

    fn on_fit_complete(&mut self, reason: StopReason, iterations: usize) {
        self.completion = Some((reason, iterations));
    }

    fn on_fit_failed(&mut self, iteration: usize, error: &InferenceError) {
        self.failure = Some((iteration, error.clone()));
    }
}

// ============================================================================
// LoggingReporter
// ============================================================================

/// Reporter that emits events through the `log` crate.
///
/// # Log Levels
///
/// - completion: INFO
/// - per-iteration values: DEBUG (TRACE for Gibbs sweeps)
/// - non-monotone EM steps: WARN
/// - failures: ERROR
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingReporter {
    /// Log every `stride`-th iteration
    stride: usize,
}

impl LoggingReporter {
    /// Create a logging reporter that logs every iteration.
    pub fn new() -> Self {
        Self { stride: 1 }
    }

    /// Log only every `stride`-th iteration.
    pub fn every(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
        }
    }

    fn should_log(&self, iteration: usize) -> bool {
        iteration % self.stride.max(1) == 0
    }
}

impl FitReporter for LoggingReporter {
    fn on_em_iteration(&mut self, iteration: usize, log_prob: f64) {
        if self.should_log(iteration) {
            log::debug!("EM iteration {}: log prob {:.6}", iteration, log_prob);
        }
    }

    fn on_non_monotone(&mut self, iteration: usize, previous: f64, current: f64) {
        log::warn!(
            "EM objective decreased at iteration {}: {:.9} -> {:.9}",
            iteration,
            previous,
            current
        );
    }

    fn on_gibbs_sample(&mut self, sample: usize, marginal_loglik: f64) {
        if self.should_log(sample) {
            log::trace!("Gibbs sample {}: marginal loglik {:.6}", sample, marginal_loglik);
        }
    }

    fn on_fit_complete(&mut self, reason: StopReason, iterations: usize) {
        log::info!("Fit finished after {} iterations ({:?})", iterations, reason);
    }

    fn on_fit_failed(&mut self, iteration: usize, error: &InferenceError) {
        log::error!("Fit aborted at iteration {}: {}", iteration, error);
    }
}

// ============================================================================
// CompositeReporter
// ============================================================================

/// Reporter that forwards events to two child reporters.
///
/// # Example
///
/// ```
/// use ssm_inference::reporter::{CompositeReporter, DebugReporter, FitReporter, LoggingReporter};
///
/// let mut composite = CompositeReporter::new(DebugReporter::new(), LoggingReporter::new());
/// composite.on_gibbs_sample(0, -10.0);
/// assert_eq!(composite.first().gibbs_events().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct CompositeReporter<A: FitReporter, B: FitReporter> {
    first: A,
    second: B,
}

impl<A: FitReporter, B: FitReporter> CompositeReporter<A, B> {
    /// Create a new composite reporter.
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    /// Get a reference to the first reporter.
    pub fn first(&self) -> &A {
        &self.first
    }

    /// Get a reference to the second reporter.
    pub fn second(&self) -> &B {
        &self.second
    }

    /// Consume and return both reporters.
    pub fn into_parts(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: FitReporter, B: FitReporter> FitReporter for CompositeReporter<A, B> {
    fn on_em_iteration(&mut self, iteration: usize, log_prob: f64) {
        self.first.on_em_iteration(iteration, log_prob);
        self.second.on_em_iteration(iteration, log_prob);
    }

    fn on_non_monotone(&mut self, iteration: usize, previous: f64, current: f64) {
        self.first.on_non_monotone(iteration, previous, current);
        self.second.on_non_monotone(iteration, previous, current);
    }

    fn on_gibbs_sample(&mut self, sample: usize, marginal_loglik: f64) {
        self.first.on_gibbs_sample(sample, marginal_loglik);
        self.second.on_gibbs_sample(sample, marginal_loglik);
    }

    fn on_fit_complete(&mut self, reason: StopReason, iterations: usize) {
        self.first.on_fit_complete(reason, iterations);
        self.second.on_fit_complete(reason, iterations);
    }

    fn on_fit_failed(&mut self, iteration: usize, error: &InferenceError) {
        self.first.on_fit_failed(iteration, error);
        self.second.on_fit_failed(iteration, error);
    }
}

// Allow `&mut R` where a reporter is taken by value.
impl<R: FitReporter + ?Sized> FitReporter for &mut R {
    fn on_em_iteration(&mut self, iteration: usize, log_prob: f64) {
        (**self).on_em_iteration(iteration, log_prob);
    }

    fn on_non_monotone(&mut self, iteration: usize, previous: f64, current: f64) {
        (**self).on_non_monotone(iteration, previous, current);
    }

    fn on_gibbs_sample(&mut self, sample: usize, marginal_loglik: f64) {
        (**self).on_gibbs_sample(sample, marginal_loglik);
    }

    fn on_fit_complete(&mut self, reason: StopReason, iterations: usize) {
        (**self).on_fit_complete(reason, iterations);
    }

    fn on_fit_failed(&mut self, iteration: usize, error: &InferenceError) {
        (**self).on_fit_failed(iteration, error);
    }
}
