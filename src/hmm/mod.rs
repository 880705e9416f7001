//! Discrete hidden Markov models
//!
//! - [`inference`] - scaled forward-backward
//! - [`scan`] - forward-backward as associative scans
//! - [`viterbi`] - most likely state path
//! - [`sampling`] - ancestral sampling and forward-filter backward-sample
//! - [`learning`] - expected counts, Dirichlet MAP M-step and log prior
//!
//! [`DiscreteHmm`] carries the numerical settings and implements [`EmModel`].

pub mod inference;
pub mod learning;
pub mod params;
pub mod sampling;
pub mod scan;
pub mod viterbi;

pub use inference::{filter, smoother, HmmFilterPosterior, HmmPosterior};
pub use learning::HmmStats;
pub use params::{DiscreteObservations, HmmParams, HmmProps, ProbabilityProps};
pub use sampling::{posterior_sample, sample, sample_multinomial, HmmSample};
pub use scan::{parallel_filter, parallel_smoother};
pub use viterbi::most_likely_states;

use crate::common::rng::RngKey;
use crate::config::{EmConfig, NumericConfig};
use crate::em::{fit_em, EmFit, EmModel};
use crate::errors::{FitError, Result};
use crate::reporter::{FitReporter, NoOpReporter};

/// Hidden Markov model with categorical or multinomial emissions
///
/// # Example
///
/// ```
/// use ssm_inference::common::rng::RngKey;
/// use ssm_inference::hmm::{DiscreteHmm, HmmParams};
///
/// let model = DiscreteHmm::default();
/// let params = HmmParams::sticky(3, 4, 0.9).unwrap();
/// let (data, _) = model.sample(RngKey::new(1), &params, 40).unwrap();
/// let path = model.most_likely_states(&params, &data.observations).unwrap();
/// assert_eq!(path.len(), 40);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DiscreteHmm {
    numerics: NumericConfig,
}

impl DiscreteHmm {
    /// Create a model with the given numerical settings
    pub fn new(numerics: NumericConfig) -> Result<Self> {
        numerics.validate()?;
        Ok(Self { numerics })
    }

    /// Numerical settings
    pub fn numerics(&self) -> &NumericConfig {
        &self.numerics
    }

    /// Forward filter
    pub fn filter(
        &self,
        params: &HmmParams,
        observations: &DiscreteObservations,
    ) -> Result<HmmFilterPosterior> {
        params.validate(self.numerics.probability_tolerance)?;
        filter(params, observations)
    }

    /// Forward-backward smoother
    pub fn smoother(
        &self,
        params: &HmmParams,
        observations: &DiscreteObservations,
    ) -> Result<HmmPosterior> {
        params.validate(self.numerics.probability_tolerance)?;
        smoother(params, observations)
    }

    /// Associative-scan filter, see [`scan::parallel_filter`]
    pub fn parallel_filter(
        &self,
        params: &HmmParams,
        observations: &DiscreteObservations,
    ) -> Result<HmmFilterPosterior> {
        params.validate(self.numerics.probability_tolerance)?;
        parallel_filter(params, observations)
    }

    /// Associative-scan smoother, see [`scan::parallel_smoother`]
    pub fn parallel_smoother(
        &self,
        params: &HmmParams,
        observations: &DiscreteObservations,
    ) -> Result<HmmPosterior> {
        params.validate(self.numerics.probability_tolerance)?;
        parallel_smoother(params, observations)
    }

    /// Viterbi path
    pub fn most_likely_states(
        &self,
        params: &HmmParams,
        observations: &DiscreteObservations,
    ) -> Result<Vec<usize>> {
        params.validate(self.numerics.probability_tolerance)?;
        most_likely_states(params, observations)
    }

    /// One draw of the state path given the observations
    pub fn posterior_sample(
        &self,
        key: RngKey,
        params: &HmmParams,
        observations: &DiscreteObservations,
    ) -> Result<(Vec<usize>, RngKey)> {
        params.validate(self.numerics.probability_tolerance)?;
        posterior_sample(key, params, observations)
    }

    /// Simulate states and categorical observations
    pub fn sample(
        &self,
        key: RngKey,
        params: &HmmParams,
        num_timesteps: usize,
    ) -> Result<(HmmSample, RngKey)> {
        sample(key, params, num_timesteps)
    }

    /// Run EM for exactly `num_iters` iterations
    pub fn fit_em(
        &self,
        params: HmmParams,
        props: &HmmProps,
        data: &[DiscreteObservations],
        num_iters: usize,
    ) -> std::result::Result<EmFit<HmmParams>, FitError<HmmParams>> {
        self.fit_em_with(params, props, data, &EmConfig::fixed(num_iters), NoOpReporter)
    }

    /// Run EM with a full configuration and a reporter
    pub fn fit_em_with<R: FitReporter>(
        &self,
        params: HmmParams,
        props: &HmmProps,
        data: &[DiscreteObservations],
        config: &EmConfig,
        reporter: R,
    ) -> std::result::Result<EmFit<HmmParams>, FitError<HmmParams>> {
        fit_em(self, params, props, data, config, reporter)
    }
}

impl EmModel for DiscreteHmm {
    type Params = HmmParams;
    type Props = HmmProps;
    type Sequence = DiscreteObservations;
    type Stats = HmmStats;

    fn e_step(
        &self,
        params: &HmmParams,
        observations: &DiscreteObservations,
    ) -> Result<(HmmStats, f64)> {
        let posterior = smoother(params, observations)?;
        let stats = learning::expected_stats(&posterior, observations, params.num_classes());
        Ok((stats, posterior.marginal_loglik))
    }

    fn log_prior(&self, params: &HmmParams, props: &HmmProps) -> Result<f64> {
        Ok(learning::log_prior(params, props))
    }

    fn m_step(&self, params: &HmmParams, props: &HmmProps, stats: HmmStats) -> Result<HmmParams> {
        learning::m_step(params, props, &stats, self.numerics.probability_tolerance)
    }

    fn validate(
        &self,
        params: &HmmParams,
        props: &HmmProps,
        data: &[DiscreteObservations],
    ) -> Result<()> {
        self.numerics.validate()?;
        params.validate(self.numerics.probability_tolerance)?;
        props.validate(params)?;
        for observations in data {
            observations.validate(params.num_classes())?;
        }
        Ok(())
    }
}
