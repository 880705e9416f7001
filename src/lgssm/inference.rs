//! Kalman filter and Rauch-Tung-Striebel smoother
//!
//! Both are pure functions of the parameters and one sequence. Gains are
//! computed with Cholesky solves, never explicit inverses, and the filtered
//! covariance uses the Joseph form followed by symmetrization.

use nalgebra::{DMatrix, DVector};

use super::params::{DynamicsParams, LgssmParams, LgssmSequence};
use crate::common::linalg::{
    cholesky_with_retry, log_gaussian_density, select, select_entries, select_rows, symmetrize,
};
use crate::config::NumericConfig;
use crate::errors::{InferenceError, MatrixRole, Result};

/// Output of the forward (filtering) pass
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredPosterior {
    /// `log p(y_{0:T-1})`
    pub marginal_loglik: f64,
    /// `E[x_t | y_{0:t-1}]`
    pub predicted_means: Vec<DVector<f64>>,
    /// `Cov[x_t | y_{0:t-1}]`
    pub predicted_covariances: Vec<DMatrix<f64>>,
    /// `E[x_t | y_{0:t}]`
    pub filtered_means: Vec<DVector<f64>>,
    /// `Cov[x_t | y_{0:t}]`
    pub filtered_covariances: Vec<DMatrix<f64>>,
}

impl FilteredPosterior {
    /// Number of timesteps
    pub fn len(&self) -> usize {
        self.filtered_means.len()
    }

    /// Whether the posterior covers no timesteps
    pub fn is_empty(&self) -> bool {
        self.filtered_means.is_empty()
    }
}

/// Output of the forward-backward (smoothing) pass
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedPosterior {
    /// The forward pass the smoother ran on
    pub filtered: FilteredPosterior,
    /// `E[x_t | y_{0:T-1}]`
    pub smoothed_means: Vec<DVector<f64>>,
    /// `Cov[x_t | y_{0:T-1}]`
    pub smoothed_covariances: Vec<DMatrix<f64>>,
    /// `Cov[x_t, x_{t+1} | y_{0:T-1}]` for `t = 0 .. T-2`
    pub smoothed_cross_covariances: Vec<DMatrix<f64>>,
}

impl SmoothedPosterior {
    /// `log p(y_{0:T-1})`
    pub fn marginal_loglik(&self) -> f64 {
        self.filtered.marginal_loglik
    }

    /// Number of timesteps
    pub fn len(&self) -> usize {
        self.smoothed_means.len()
    }

    /// Whether the posterior covers no timesteps
    pub fn is_empty(&self) -> bool {
        self.smoothed_means.is_empty()
    }
}

// ============================================================================
// Single steps
// ============================================================================

/// Propagate a Gaussian through the dynamics: `(F m + B u + b, F P Fᵀ + Q)`
pub(crate) fn predict(
    mean: &DVector<f64>,
    cov: &DMatrix<f64>,
    dynamics: &DynamicsParams,
    input: Option<&DVector<f64>>,
) -> (DVector<f64>, DMatrix<f64>) {
    let f = &dynamics.weights;
    let mut pred_mean = f * mean + &dynamics.bias;
    if let Some(u) = input {
        pred_mean += &dynamics.input_weights * u;
    }
    let pred_cov = symmetrize(&(f * cov * f.transpose() + &dynamics.cov));
    (pred_mean, pred_cov)
}

/// Indices of the non-missing components of an emission
pub(crate) fn observed_indices(y: &DVector<f64>) -> Vec<usize> {
    y.iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .map(|(i, _)| i)
        .collect()
}

/// Expected emission `H_t m + D u + d`
pub(crate) fn emission_mean(
    params: &LgssmParams,
    t: usize,
    state: &DVector<f64>,
    input: Option<&DVector<f64>>,
) -> DVector<f64> {
    let mut mean = params.emissions.weights.at(t) * state + &params.emissions.bias;
    if let Some(u) = input {
        mean += &params.emissions.input_weights * u;
    }
    mean
}

/// Condition a predicted Gaussian on the emission at timestep `t`
///
/// Only the observed components of `y` enter the update. Returns the
/// filtered mean and covariance and the log-likelihood contribution, which
/// is zero for a fully missing emission.
///
/// # Arguments
/// * `mean` - Predicted mean
/// * `cov` - Predicted covariance
/// * `params` - Model parameters
/// * `t` - Timestep (selects `H_t` and labels errors)
/// * `y` - Emission, NaN for missing components
/// * `input` - Input at `t`, if any
/// * `jitter` - Jitter for the Cholesky retry
pub(crate) fn condition_on(
    mean: &DVector<f64>,
    cov: &DMatrix<f64>,
    params: &LgssmParams,
    t: usize,
    y: &DVector<f64>,
    input: Option<&DVector<f64>>,
    jitter: f64,
) -> Result<(DVector<f64>, DMatrix<f64>, f64)> {
    let observed = observed_indices(y);
    if observed.is_empty() {
        return Ok((mean.clone(), cov.clone(), 0.0));
    }

    let predicted_y = emission_mean(params, t, mean, input);
    let h = select_rows(params.emissions.weights.at(t), &observed);
    let r = select(&params.emissions.cov, &observed, &observed);
    let residual = select_entries(y, &observed) - select_entries(&predicted_y, &observed);

    let s = symmetrize(&(&h * cov * h.transpose() + &r));
    let chol = cholesky_with_retry(&s, jitter)
        .ok_or_else(|| InferenceError::instability_at(t, MatrixRole::InnovationCovariance))?;
    let loglik = log_gaussian_density(&residual, &chol);

    // Kᵀ = S⁻¹ H P
    let gain = chol.solve(&(&h * cov)).transpose();
    let filtered_mean = mean + &gain * residual;

    let n = mean.len();
    let i_minus_kh = DMatrix::identity(n, n) - &gain * &h;
    let filtered_cov = symmetrize(
        &(&i_minus_kh * cov * i_minus_kh.transpose() + &gain * r * gain.transpose()),
    );

    Ok((filtered_mean, filtered_cov, loglik))
}

// ============================================================================
// Filter and smoother
// ============================================================================

/// Kalman filter
///
/// Runs the predict/update recursion over the whole sequence and accumulates
/// the marginal log-likelihood. Emissions with NaN components are handled by
/// conditioning on the observed components only.
///
/// # Arguments
/// * `params` - Model parameters
/// * `sequence` - Emissions and optional inputs
/// * `numerics` - Jitter for the Cholesky retry
///
/// # Errors
/// `DimensionMismatch` or `NonFinite` for malformed input, and
/// `NumericalInstability` naming the timestep when the innovation covariance
/// cannot be factorized.
pub fn filter(
    params: &LgssmParams,
    sequence: &LgssmSequence,
    numerics: &NumericConfig,
) -> Result<FilteredPosterior> {
    params.validate()?;
    sequence.validate(params)?;
    let params = params.regularized();
    let params = params.as_ref();

    let num_timesteps = sequence.len();
    let mut posterior = FilteredPosterior {
        marginal_loglik: 0.0,
        predicted_means: Vec::with_capacity(num_timesteps),
        predicted_covariances: Vec::with_capacity(num_timesteps),
        filtered_means: Vec::with_capacity(num_timesteps),
        filtered_covariances: Vec::with_capacity(num_timesteps),
    };

    let mut mean = params.initial.mean.clone();
    let mut cov = params.initial.cov.clone();
    for (t, y) in sequence.emissions.iter().enumerate() {
        let input = sequence.input(t);
        let (filtered_mean, filtered_cov, loglik) =
            condition_on(&mean, &cov, params, t, y, input, numerics.jitter)?;
        posterior.marginal_loglik += loglik;
        posterior.predicted_means.push(mean);
        posterior.predicted_covariances.push(cov);

        (mean, cov) = predict(&filtered_mean, &filtered_cov, &params.dynamics, input);
        posterior.filtered_means.push(filtered_mean);
        posterior.filtered_covariances.push(filtered_cov);
    }

    if !posterior.marginal_loglik.is_finite() {
        return Err(InferenceError::NonFinite {
            context: "marginal log-likelihood".to_string(),
        });
    }
    Ok(posterior)
}

/// Smoother gain `J_t = P_{t|t} Fᵀ P_{t+1|t}⁻¹`
pub(crate) fn smoother_gain(
    filtered_cov: &DMatrix<f64>,
    predicted_cov_next: &DMatrix<f64>,
    dynamics_weights: &DMatrix<f64>,
    t: usize,
    jitter: f64,
) -> Result<DMatrix<f64>> {
    let chol = cholesky_with_retry(predicted_cov_next, jitter)
        .ok_or_else(|| InferenceError::instability_at(t + 1, MatrixRole::PredictedCovariance))?;
    // Jᵀ = P_{t+1|t}⁻¹ F P_{t|t}
    Ok(chol.solve(&(dynamics_weights * filtered_cov)).transpose())
}

/// Rauch-Tung-Striebel smoother
///
/// Runs [`filter`] and then the backward recursion. The last smoothed moment
/// equals the last filtered moment exactly.
///
/// # Errors
/// Everything [`filter`] returns, and `NumericalInstability` naming the
/// timestep when a predicted covariance cannot be factorized.
pub fn smoother(
    params: &LgssmParams,
    sequence: &LgssmSequence,
    numerics: &NumericConfig,
) -> Result<SmoothedPosterior> {
    let filtered = filter(params, sequence, numerics)?;
    let num_timesteps = filtered.len();
    if num_timesteps == 0 {
        return Ok(SmoothedPosterior {
            filtered,
            smoothed_means: Vec::new(),
            smoothed_covariances: Vec::new(),
            smoothed_cross_covariances: Vec::new(),
        });
    }

    let mut means = Vec::with_capacity(num_timesteps);
    let mut covs = Vec::with_capacity(num_timesteps);
    let mut cross = Vec::with_capacity(num_timesteps - 1);

    let mut next_mean = filtered.filtered_means[num_timesteps - 1].clone();
    let mut next_cov = filtered.filtered_covariances[num_timesteps - 1].clone();
    means.push(next_mean.clone());
    covs.push(next_cov.clone());

    for t in (0..num_timesteps - 1).rev() {
        let filtered_mean = &filtered.filtered_means[t];
        let filtered_cov = &filtered.filtered_covariances[t];
        let pred_mean = &filtered.predicted_means[t + 1];
        let pred_cov = &filtered.predicted_covariances[t + 1];

        let gain = smoother_gain(
            filtered_cov,
            pred_cov,
            &params.dynamics.weights,
            t,
            numerics.jitter,
        )?;
        let mean = filtered_mean + &gain * (&next_mean - pred_mean);
        let cov = symmetrize(&(filtered_cov + &gain * (&next_cov - pred_cov) * gain.transpose()));
        cross.push(&gain * &next_cov);

        means.push(mean.clone());
        covs.push(cov.clone());
        next_mean = mean;
        next_cov = cov;
    }

    means.reverse();
    covs.reverse();
    cross.reverse();

    Ok(SmoothedPosterior {
        filtered,
        smoothed_means: means,
        smoothed_covariances: covs,
        smoothed_cross_covariances: cross,
    })
}
