//! Blocked Gibbs sampling for linear-Gaussian SSMs
//!
//! Each sweep alternates two exact conditional draws:
//!
//! 1. a latent trajectory per sequence by forward-filter backward-sample
//! 2. every trainable parameter block from its conjugate MNIW posterior given
//!    the exact statistics of those trajectories
//!
//! The marginal log-likelihood of the data is evaluated at every draw so the
//! chain can be monitored.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::inference::filter;
use super::learning::{require_priors, sample_params};
use super::params::{LgssmParams, LgssmProps, LgssmSequence};
use super::sampling::backward_sample;
use super::stats::{trajectory_stats, LgssmStats};
use crate::common::rng::RngKey;
use crate::config::{GibbsConfig, NumericConfig};
use crate::em::{StopReason, SufficientStatistics};
use crate::errors::{FitError, InferenceError, Result};
use crate::reporter::{FitReporter, NoOpReporter};

/// Output of a blocked Gibbs run
#[derive(Debug, Clone)]
pub struct GibbsChain {
    /// Parameter draw of each sweep
    pub samples: Vec<LgssmParams>,
    /// `log p(y | θ_s)` for each draw
    pub marginal_logliks: Vec<f64>,
    /// Key to continue sampling from
    pub next_key: RngKey,
    /// Why the chain stopped
    pub stop_reason: StopReason,
}

impl GibbsChain {
    /// Number of draws
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the chain holds no draws
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// FFBS over every sequence, then the summed trajectory statistics
fn sample_trajectories(
    key: RngKey,
    params: &LgssmParams,
    data: &[LgssmSequence],
    numerics: &NumericConfig,
) -> Result<LgssmStats> {
    let keys = key.split_n(data.len());
    let draw = |(sequence, key): (&LgssmSequence, &RngKey)| -> Result<LgssmStats> {
        let filtered = filter(params, sequence, numerics)?;
        let states = backward_sample(&mut key.rng(), params, &filtered, numerics.jitter)?;
        Ok(trajectory_stats(params, sequence, &states))
    };

    #[cfg(feature = "rayon")]
    let per_sequence = data
        .par_iter()
        .zip(keys.par_iter())
        .map(draw)
        .collect::<Result<Vec<_>>>()?;

    #[cfg(not(feature = "rayon"))]
    let per_sequence = data
        .iter()
        .zip(keys.iter())
        .map(draw)
        .collect::<Result<Vec<_>>>()?;

    Ok(per_sequence
        .into_iter()
        .fold(LgssmStats::zeros(params), SufficientStatistics::combine))
}

/// Marginal log-likelihood summed over the batch
pub(crate) fn batch_marginal_loglik(
    params: &LgssmParams,
    data: &[LgssmSequence],
    numerics: &NumericConfig,
) -> Result<f64> {
    #[cfg(feature = "rayon")]
    let logliks = data
        .par_iter()
        .map(|sequence| filter(params, sequence, numerics).map(|f| f.marginal_loglik))
        .collect::<Result<Vec<_>>>()?;

    #[cfg(not(feature = "rayon"))]
    let logliks = data
        .iter()
        .map(|sequence| filter(params, sequence, numerics).map(|f| f.marginal_loglik))
        .collect::<Result<Vec<_>>>()?;

    Ok(logliks.into_iter().sum())
}

fn gibbs_sweep(
    key: RngKey,
    params: &LgssmParams,
    props: &LgssmProps,
    data: &[LgssmSequence],
    numerics: &NumericConfig,
) -> Result<(LgssmParams, f64)> {
    let (trajectory_key, param_key) = key.split();
    let stats = sample_trajectories(trajectory_key, params, data, numerics)?;
    let drawn = sample_params(&mut param_key.rng(), params, props, &stats, numerics.jitter)?;
    let loglik = batch_marginal_loglik(&drawn, data, numerics)?;
    Ok((drawn, loglik))
}

fn validate_gibbs(
    params: &LgssmParams,
    props: &LgssmProps,
    data: &[LgssmSequence],
    numerics: &NumericConfig,
) -> Result<()> {
    numerics.validate()?;
    params.validate()?;
    props.validate(params)?;
    require_priors(params, props)?;
    if data.is_empty() {
        return Err(InferenceError::configuration(
            "blocked Gibbs requires at least one sequence",
        ));
    }
    for sequence in data {
        sequence.validate(params)?;
    }
    Ok(())
}

/// Run one blocked Gibbs chain from `initial`
///
/// Every trainable block in `props` must carry an explicit prior. The chain
/// stops after `config.sample_size` draws or when the cancellation token is
/// set (checked before each sweep).
///
/// # Arguments
/// * `key` - Random key; the key to continue from is returned in the chain
/// * `initial` - Starting parameters
/// * `props` - Trainability masks and priors
/// * `data` - Batch of independent sequences
/// * `config` - Number of draws and cancellation
/// * `numerics` - Jitter for the Cholesky retries
/// * `reporter` - Receives one callback per draw
///
/// # Errors
/// A failed sweep aborts the chain; the error carries the last accepted draw
/// and the log-likelihoods so far.
pub fn fit_blocked_gibbs<R: FitReporter>(
    key: RngKey,
    initial: LgssmParams,
    props: &LgssmProps,
    data: &[LgssmSequence],
    config: &GibbsConfig,
    numerics: &NumericConfig,
    mut reporter: R,
) -> std::result::Result<GibbsChain, FitError<LgssmParams>> {
    if let Err(source) = validate_gibbs(&initial, props, data, numerics) {
        reporter.on_fit_failed(0, &source);
        return Err(FitError {
            source,
            iteration: 0,
            params: initial,
            log_probs: Vec::new(),
        });
    }

    let mut key = key;
    let mut params = initial;
    let mut samples = Vec::with_capacity(config.sample_size);
    let mut marginal_logliks = Vec::with_capacity(config.sample_size);
    let mut stop_reason = StopReason::Completed;

    for sample in 0..config.sample_size {
        if config.is_cancelled() {
            stop_reason = StopReason::Cancelled;
            break;
        }

        let (next_key, sweep_key) = key.split();
        key = next_key;
        match gibbs_sweep(sweep_key, &params, props, data, numerics) {
            Ok((drawn, loglik)) => {
                reporter.on_gibbs_sample(sample, loglik);
                samples.push(drawn.clone());
                marginal_logliks.push(loglik);
                params = drawn;
            }
            Err(source) => {
                reporter.on_fit_failed(sample, &source);
                return Err(FitError {
                    source,
                    iteration: sample,
                    params,
                    log_probs: marginal_logliks,
                });
            }
        }
    }

    log::debug!(
        "blocked Gibbs drew {} samples ({:?})",
        samples.len(),
        stop_reason
    );
    reporter.on_fit_complete(stop_reason, samples.len());

    Ok(GibbsChain {
        samples,
        marginal_logliks,
        next_key: key,
        stop_reason,
    })
}

/// Run `num_chains` independent chains from the same starting point
///
/// Chain `i` uses the `i`-th key of `key.split_n(num_chains)`, so the result
/// does not depend on how the chains are scheduled. With the `rayon` feature
/// the chains run concurrently.
///
/// # Errors
/// The first failing chain's error.
pub fn fit_blocked_gibbs_chains(
    key: RngKey,
    initial: &LgssmParams,
    props: &LgssmProps,
    data: &[LgssmSequence],
    config: &GibbsConfig,
    numerics: &NumericConfig,
    num_chains: usize,
) -> std::result::Result<Vec<GibbsChain>, FitError<LgssmParams>> {
    let keys = key.split_n(num_chains);
    let run = |chain_key: &RngKey| {
        fit_blocked_gibbs(
            *chain_key,
            initial.clone(),
            props,
            data,
            config,
            numerics,
            NoOpReporter,
        )
    };

    #[cfg(feature = "rayon")]
    let chains = keys.par_iter().map(run).collect();

    #[cfg(not(feature = "rayon"))]
    let chains = keys.iter().map(run).collect();

    chains
}
