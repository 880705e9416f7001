//! Generic expectation-maximization driver
//!
//! Both model families implement [`EmModel`]: an E-step that turns one
//! sequence into additive sufficient statistics plus its log-likelihood, a
//! log prior, and a closed-form M-step. [`fit_em`] owns the loop: batch
//! E-step (parallel over sequences with the `rayon` feature), objective
//! bookkeeping, the optional early stop, cancellation and reporting.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::common::constants::MONOTONICITY_TOLERANCE;
use crate::config::EmConfig;
use crate::errors::{FitError, InferenceError, Result};
use crate::reporter::FitReporter;

/// Expected sufficient statistics that can be summed across sequences
///
/// `combine` must be associative and commutative so that a batch can be
/// reduced in any order.
pub trait SufficientStatistics: Send + Sized {
    /// Sum two sets of statistics
    fn combine(self, other: Self) -> Self;
}

/// A model that can be fitted by EM
pub trait EmModel: Sync {
    /// Model parameters
    type Params: Clone + Send + Sync;
    /// Per-parameter trainability and priors
    type Props: Sync;
    /// One observation sequence
    type Sequence: Sync;
    /// Expected sufficient statistics
    type Stats: SufficientStatistics;

    /// Posterior inference on one sequence: statistics and marginal log-likelihood
    fn e_step(&self, params: &Self::Params, sequence: &Self::Sequence)
        -> Result<(Self::Stats, f64)>;

    /// Log density of the trainable parameters under their priors
    fn log_prior(&self, params: &Self::Params, props: &Self::Props) -> Result<f64>;

    /// Closed-form maximization; non-trainable parameters are carried over
    fn m_step(
        &self,
        params: &Self::Params,
        props: &Self::Props,
        stats: Self::Stats,
    ) -> Result<Self::Params>;

    /// Checks run once before the first iteration
    fn validate(
        &self,
        _params: &Self::Params,
        _props: &Self::Props,
        _data: &[Self::Sequence],
    ) -> Result<()> {
        Ok(())
    }
}

/// Why a fitting loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Ran the configured number of iterations
    Completed,
    /// Relative improvement fell below the tolerance
    Converged,
    /// The cancellation token was set
    Cancelled,
}

/// Result of an EM run
#[derive(Debug, Clone)]
pub struct EmFit<P> {
    /// Parameters after the last M-step
    pub params: P,
    /// Log joint `log p(y | θ_i) + log p(θ_i)` of the parameters entering iteration `i`
    pub log_probs: Vec<f64>,
    /// Parameters after each M-step (empty unless history is kept)
    pub history: Vec<P>,
    /// Why the loop stopped
    pub stop_reason: StopReason,
}

impl<P> EmFit<P> {
    /// Number of completed iterations
    pub fn iterations(&self) -> usize {
        self.log_probs.len()
    }
}

/// E-step over a batch: statistics summed across sequences, log-likelihoods added
pub fn batch_e_step<M: EmModel>(
    model: &M,
    params: &M::Params,
    data: &[M::Sequence],
) -> Result<(M::Stats, f64)> {
    #[cfg(feature = "rayon")]
    let per_sequence = data
        .par_iter()
        .map(|sequence| model.e_step(params, sequence))
        .collect::<Result<Vec<_>>>()?;

    #[cfg(not(feature = "rayon"))]
    let per_sequence = data
        .iter()
        .map(|sequence| model.e_step(params, sequence))
        .collect::<Result<Vec<_>>>()?;

    per_sequence
        .into_iter()
        .reduce(|(a, ll_a), (b, ll_b)| (a.combine(b), ll_a + ll_b))
        .ok_or_else(|| InferenceError::configuration("EM requires at least one sequence"))
}

fn em_iteration<M: EmModel>(
    model: &M,
    params: &M::Params,
    props: &M::Props,
    data: &[M::Sequence],
) -> Result<(f64, M::Params)> {
    let (stats, marginal_loglik) = batch_e_step(model, params, data)?;
    let log_prob = marginal_loglik + model.log_prior(params, props)?;
    if !log_prob.is_finite() {
        return Err(InferenceError::NonFinite {
            context: "EM objective".to_string(),
        });
    }
    let updated = model.m_step(params, props, stats)?;
    Ok((log_prob, updated))
}

/// Run EM from `initial`
///
/// The loop stops after `config.num_iters` iterations, on the optional
/// relative-improvement tolerance, or when the cancellation token is set
/// (checked before each iteration). Any error aborts the loop and returns
/// the last parameters that completed an iteration together with the partial
/// trace.
///
/// # Arguments
/// * `model` - Model implementing the E- and M-steps
/// * `initial` - Starting parameters
/// * `props` - Trainability masks and priors
/// * `data` - Batch of independent sequences
/// * `config` - Iteration count, tolerance, history and cancellation
/// * `reporter` - Receives per-iteration callbacks
pub fn fit_em<M: EmModel, R: FitReporter>(
    model: &M,
    initial: M::Params,
    props: &M::Props,
    data: &[M::Sequence],
    config: &EmConfig,
    mut reporter: R,
) -> std::result::Result<EmFit<M::Params>, FitError<M::Params>> {
    if let Err(source) = config
        .validate()
        .and_then(|_| model.validate(&initial, props, data))
    {
        reporter.on_fit_failed(0, &source);
        return Err(FitError {
            source,
            iteration: 0,
            params: initial,
            log_probs: Vec::new(),
        });
    }

    let mut params = initial;
    let mut log_probs: Vec<f64> = Vec::with_capacity(config.num_iters);
    let mut history = Vec::new();
    let mut stop_reason = StopReason::Completed;

    for iteration in 0..config.num_iters {
        if config.is_cancelled() {
            stop_reason = StopReason::Cancelled;
            break;
        }

        let (log_prob, updated) = match em_iteration(model, &params, props, data) {
            Ok(step) => step,
            Err(source) => {
                reporter.on_fit_failed(iteration, &source);
                return Err(FitError {
                    source,
                    iteration,
                    params,
                    log_probs,
                });
            }
        };

        let previous = log_probs.last().copied();
        if let Some(prev) = previous {
            if log_prob < prev - MONOTONICITY_TOLERANCE * (1.0 + prev.abs()) {
                reporter.on_non_monotone(iteration, prev, log_prob);
            }
        }
        reporter.on_em_iteration(iteration, log_prob);
        log_probs.push(log_prob);

        params = updated;
        if config.keep_history {
            history.push(params.clone());
        }

        if let (Some(tol), Some(prev)) = (config.tolerance, previous) {
            if (log_prob - prev).abs() / (1.0 + prev.abs()) <= tol {
                stop_reason = StopReason::Converged;
                break;
            }
        }
    }

    log::debug!(
        "EM stopped after {} iterations ({:?}), final log prob {:?}",
        log_probs.len(),
        stop_reason,
        log_probs.last()
    );
    reporter.on_fit_complete(stop_reason, log_probs.len());

    Ok(EmFit {
        params,
        log_probs,
        history,
        stop_reason,
    })
}
