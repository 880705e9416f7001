//! Linear-Gaussian state-space models
//!
//! - [`inference`] - Kalman filter and RTS smoother
//! - [`scan`] - the same recursions as parallel-in-time associative scans
//! - [`sampling`] - forward-filter backward-sample and ancestral sampling
//! - [`stats`] - sufficient statistics of the three regression blocks
//! - [`learning`] - M-step, log prior and conditional parameter draws
//! - [`gibbs`] - blocked Gibbs sampler
//!
//! [`Lgssm`] bundles the free functions with one [`NumericConfig`] and
//! implements [`EmModel`] so it can be fitted by the generic EM driver.

pub mod gibbs;
pub mod inference;
pub mod learning;
pub mod params;
pub mod sampling;
pub mod scan;
pub mod stats;

pub use gibbs::{fit_blocked_gibbs, fit_blocked_gibbs_chains, GibbsChain};
pub use inference::{filter, smoother, FilteredPosterior, SmoothedPosterior};
pub use params::{
    DynamicsParams, EmissionParams, EmissionWeights, InitialParams, InitialProps, LgssmParams,
    LgssmProps, LgssmSequence, RegressionProps,
};
pub use sampling::{posterior_sample, sample, LgssmSample};
pub use scan::{parallel_filter, parallel_smoother};
pub use stats::{LgssmStats, RegressionStats};

use nalgebra::DVector;

use crate::common::rng::RngKey;
use crate::config::{EmConfig, GibbsConfig, NumericConfig};
use crate::em::{fit_em, EmFit, EmModel};
use crate::errors::{FitError, Result};
use crate::reporter::{FitReporter, NoOpReporter};

/// Linear-Gaussian SSM with its numerical settings
///
/// Parameters are passed to every call, so one model object serves any
/// number of parameter sets.
///
/// # Example
///
/// ```
/// use ssm_inference::common::rng::RngKey;
/// use ssm_inference::lgssm::{Lgssm, LgssmParams};
///
/// let model = Lgssm::default();
/// let params = LgssmParams::constant_velocity_1d(1.0, 0.1, 0.5);
/// let (data, _) = model.sample(RngKey::new(0), &params, 50, None).unwrap();
/// let posterior = model.smoother(&params, &data.to_sequence()).unwrap();
/// assert_eq!(posterior.len(), 50);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Lgssm {
    numerics: NumericConfig,
}

impl Lgssm {
    /// Create a model with the given numerical settings
    pub fn new(numerics: NumericConfig) -> Result<Self> {
        numerics.validate()?;
        Ok(Self { numerics })
    }

    /// Numerical settings
    pub fn numerics(&self) -> &NumericConfig {
        &self.numerics
    }

    /// Kalman filter, see [`inference::filter`]
    pub fn filter(
        &self,
        params: &LgssmParams,
        sequence: &LgssmSequence,
    ) -> Result<FilteredPosterior> {
        filter(params, sequence, &self.numerics)
    }

    /// RTS smoother, see [`inference::smoother`]
    pub fn smoother(
        &self,
        params: &LgssmParams,
        sequence: &LgssmSequence,
    ) -> Result<SmoothedPosterior> {
        smoother(params, sequence, &self.numerics)
    }

    /// Associative-scan filter, see [`scan::parallel_filter`]
    pub fn parallel_filter(
        &self,
        params: &LgssmParams,
        sequence: &LgssmSequence,
    ) -> Result<FilteredPosterior> {
        parallel_filter(params, sequence, &self.numerics)
    }

    /// Associative-scan smoother, see [`scan::parallel_smoother`]
    pub fn parallel_smoother(
        &self,
        params: &LgssmParams,
        sequence: &LgssmSequence,
    ) -> Result<SmoothedPosterior> {
        parallel_smoother(params, sequence, &self.numerics)
    }

    /// One draw of the latent trajectory given the emissions
    pub fn posterior_sample(
        &self,
        key: RngKey,
        params: &LgssmParams,
        sequence: &LgssmSequence,
    ) -> Result<(Vec<DVector<f64>>, RngKey)> {
        posterior_sample(key, params, sequence, &self.numerics)
    }

    /// Simulate states and emissions
    pub fn sample(
        &self,
        key: RngKey,
        params: &LgssmParams,
        num_timesteps: usize,
        inputs: Option<&[DVector<f64>]>,
    ) -> Result<(LgssmSample, RngKey)> {
        sample(key, params, num_timesteps, inputs)
    }

    /// Run EM for exactly `num_iters` iterations
    pub fn fit_em(
        &self,
        params: LgssmParams,
        props: &LgssmProps,
        data: &[LgssmSequence],
        num_iters: usize,
    ) -> std::result::Result<EmFit<LgssmParams>, FitError<LgssmParams>> {
        self.fit_em_with(params, props, data, &EmConfig::fixed(num_iters), NoOpReporter)
    }

    /// Run EM with a full configuration and a reporter
    pub fn fit_em_with<R: FitReporter>(
        &self,
        params: LgssmParams,
        props: &LgssmProps,
        data: &[LgssmSequence],
        config: &EmConfig,
        reporter: R,
    ) -> std::result::Result<EmFit<LgssmParams>, FitError<LgssmParams>> {
        fit_em(self, params, props, data, config, reporter)
    }

    /// Draw `sample_size` parameter samples with blocked Gibbs
    pub fn fit_blocked_gibbs(
        &self,
        key: RngKey,
        params: LgssmParams,
        props: &LgssmProps,
        data: &[LgssmSequence],
        sample_size: usize,
    ) -> std::result::Result<GibbsChain, FitError<LgssmParams>> {
        self.fit_blocked_gibbs_with(
            key,
            params,
            props,
            data,
            &GibbsConfig::new(sample_size),
            NoOpReporter,
        )
    }

    /// Blocked Gibbs with a full configuration and a reporter
    pub fn fit_blocked_gibbs_with<R: FitReporter>(
        &self,
        key: RngKey,
        params: LgssmParams,
        props: &LgssmProps,
        data: &[LgssmSequence],
        config: &GibbsConfig,
        reporter: R,
    ) -> std::result::Result<GibbsChain, FitError<LgssmParams>> {
        fit_blocked_gibbs(key, params, props, data, config, &self.numerics, reporter)
    }

    /// Independent Gibbs chains from split keys
    pub fn fit_blocked_gibbs_chains(
        &self,
        key: RngKey,
        params: &LgssmParams,
        props: &LgssmProps,
        data: &[LgssmSequence],
        config: &GibbsConfig,
        num_chains: usize,
    ) -> std::result::Result<Vec<GibbsChain>, FitError<LgssmParams>> {
        fit_blocked_gibbs_chains(key, params, props, data, config, &self.numerics, num_chains)
    }
}

impl EmModel for Lgssm {
    type Params = LgssmParams;
    type Props = LgssmProps;
    type Sequence = LgssmSequence;
    type Stats = LgssmStats;

    fn e_step(
        &self,
        params: &LgssmParams,
        sequence: &LgssmSequence,
    ) -> Result<(LgssmStats, f64)> {
        let posterior = smoother(params, sequence, &self.numerics)?;
        let stats = stats::expected_stats(params, sequence, &posterior);
        Ok((stats, posterior.marginal_loglik()))
    }

    fn log_prior(&self, params: &LgssmParams, props: &LgssmProps) -> Result<f64> {
        learning::log_prior(params, props, self.numerics.jitter)
    }

    fn m_step(
        &self,
        params: &LgssmParams,
        props: &LgssmProps,
        stats: LgssmStats,
    ) -> Result<LgssmParams> {
        learning::m_step(params, props, &stats, self.numerics.jitter)
    }

    fn validate(
        &self,
        params: &LgssmParams,
        props: &LgssmProps,
        data: &[LgssmSequence],
    ) -> Result<()> {
        self.numerics.validate()?;
        params.validate()?;
        props.validate(params)?;
        for sequence in data {
            sequence.validate(params)?;
        }
        Ok(())
    }
}
