//! Scaled forward-backward for discrete HMMs
//!
//! Forward messages are normalized at every step and the log normalizers are
//! accumulated into the marginal log-likelihood. Emission log-likelihoods are
//! shifted by their per-step maximum before exponentiation, so even very
//! unlikely observations do not underflow. Backward messages are normalized
//! as well; smoothed marginals are renormalized to sum to one.

use nalgebra::{DMatrix, DVector};

use super::params::{DiscreteObservations, HmmParams};
use crate::errors::{InferenceError, Result};

/// Output of the forward pass
#[derive(Debug, Clone, PartialEq)]
pub struct HmmFilterPosterior {
    /// `log p(y_{0:T-1})`
    pub marginal_loglik: f64,
    /// Row `t` is `p(z_t | y_{0:t})` (`T × K`)
    pub filtered_probs: DMatrix<f64>,
    /// Row `t` is `p(z_t | y_{0:t-1})` (`T × K`)
    pub predicted_probs: DMatrix<f64>,
}

impl HmmFilterPosterior {
    /// Number of timesteps
    pub fn len(&self) -> usize {
        self.filtered_probs.nrows()
    }

    /// Whether the posterior covers no timesteps
    pub fn is_empty(&self) -> bool {
        self.filtered_probs.nrows() == 0
    }
}

/// Output of the forward-backward pass
#[derive(Debug, Clone, PartialEq)]
pub struct HmmPosterior {
    /// `log p(y_{0:T-1})`
    pub marginal_loglik: f64,
    /// Row `t` is `p(z_t | y_{0:t})`
    pub filtered_probs: DMatrix<f64>,
    /// Row `t` is `p(z_t | y_{0:t-1})`
    pub predicted_probs: DMatrix<f64>,
    /// Row `t` is `p(z_t | y_{0:T-1})`
    pub smoothed_probs: DMatrix<f64>,
    /// `Σ_t p(z_t = i, z_{t+1} = j | y_{0:T-1})` (`K × K`)
    pub expected_transitions: DMatrix<f64>,
}

impl HmmPosterior {
    /// Number of timesteps
    pub fn len(&self) -> usize {
        self.smoothed_probs.nrows()
    }

    /// Whether the posterior covers no timesteps
    pub fn is_empty(&self) -> bool {
        self.smoothed_probs.nrows() == 0
    }
}

/// Per-step likelihoods shifted by their maximum, with the shifts
///
/// A step where every state has zero likelihood is a model mismatch.
pub(super) fn shifted_likelihoods(
    log_likelihoods: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, Vec<f64>)> {
    let mut likelihoods = DMatrix::zeros(log_likelihoods.nrows(), log_likelihoods.ncols());
    let mut shifts = Vec::with_capacity(log_likelihoods.nrows());
    for (t, row) in log_likelihoods.row_iter().enumerate() {
        let shift = row.max();
        if !shift.is_finite() {
            return Err(InferenceError::ModelMismatch { timestep: t });
        }
        for (k, &ll) in row.iter().enumerate() {
            likelihoods[(t, k)] = (ll - shift).exp();
        }
        shifts.push(shift);
    }
    Ok((likelihoods, shifts))
}

fn normalize(v: &mut DVector<f64>) -> f64 {
    let total = v.sum();
    if total > 0.0 {
        *v /= total;
    }
    total
}

/// Forward pass on precomputed shifted likelihoods
fn forward(
    params: &HmmParams,
    likelihoods: &DMatrix<f64>,
    shifts: &[f64],
) -> Result<HmmFilterPosterior> {
    let num_timesteps = likelihoods.nrows();
    let k = params.num_states();
    let mut filtered_probs = DMatrix::zeros(num_timesteps, k);
    let mut predicted_probs = DMatrix::zeros(num_timesteps, k);
    let mut marginal_loglik = 0.0;

    let mut predicted = params.initial_probs.clone();
    for t in 0..num_timesteps {
        predicted_probs.set_row(t, &predicted.transpose());
        let mut alpha = predicted.component_mul(&likelihoods.row(t).transpose());
        let norm = normalize(&mut alpha);
        if !(norm > 0.0) || !norm.is_finite() {
            return Err(InferenceError::ModelMismatch { timestep: t });
        }
        marginal_loglik += norm.ln() + shifts[t];
        filtered_probs.set_row(t, &alpha.transpose());
        predicted = params.transition_matrix.tr_mul(&alpha);
    }

    Ok(HmmFilterPosterior {
        marginal_loglik,
        filtered_probs,
        predicted_probs,
    })
}

/// Forward filter
///
/// # Errors
/// `DimensionMismatch` for observations that do not match the emission
/// classes, `ModelMismatch` naming the first timestep whose observation has
/// zero probability given the past.
pub fn filter(
    params: &HmmParams,
    observations: &DiscreteObservations,
) -> Result<HmmFilterPosterior> {
    observations.validate(params.num_classes())?;
    let log_likelihoods = observations.log_likelihoods(&params.emission_probs);
    let (likelihoods, shifts) = shifted_likelihoods(&log_likelihoods)?;
    forward(params, &likelihoods, &shifts)
}

/// Forward-backward smoother
///
/// Also returns the expected transition counts used by the M-step.
pub fn smoother(params: &HmmParams, observations: &DiscreteObservations) -> Result<HmmPosterior> {
    observations.validate(params.num_classes())?;
    let log_likelihoods = observations.log_likelihoods(&params.emission_probs);
    let (likelihoods, shifts) = shifted_likelihoods(&log_likelihoods)?;
    let filtered = forward(params, &likelihoods, &shifts)?;

    let num_timesteps = likelihoods.nrows();
    let k = params.num_states();
    let a = &params.transition_matrix;
    let mut smoothed_probs = DMatrix::zeros(num_timesteps, k);
    let mut expected_transitions = DMatrix::zeros(k, k);
    if num_timesteps == 0 {
        return Ok(HmmPosterior {
            marginal_loglik: filtered.marginal_loglik,
            filtered_probs: filtered.filtered_probs,
            predicted_probs: filtered.predicted_probs,
            smoothed_probs,
            expected_transitions,
        });
    }

    let last = num_timesteps - 1;
    let mut beta = DVector::from_element(k, 1.0);
    smoothed_probs.set_row(last, &filtered.filtered_probs.row(last));

    for t in (0..last).rev() {
        // β_{t+1} ∘ lik_{t+1}, shared by the new β_t and the two-slice marginal
        let weighted = beta.component_mul(&likelihoods.row(t + 1).transpose());
        let alpha = filtered.filtered_probs.row(t).transpose();

        let mut xi = DMatrix::from_fn(k, k, |i, j| alpha[i] * a[(i, j)] * weighted[j]);
        let xi_total = xi.sum();
        if xi_total > 0.0 {
            xi /= xi_total;
        }
        expected_transitions += &xi;

        beta = a * weighted;
        normalize(&mut beta);

        let mut gamma = alpha.component_mul(&beta);
        normalize(&mut gamma);
        smoothed_probs.set_row(t, &gamma.transpose());
    }

    Ok(HmmPosterior {
        marginal_loglik: filtered.marginal_loglik,
        filtered_probs: filtered.filtered_probs,
        predicted_probs: filtered.predicted_probs,
        smoothed_probs,
        expected_transitions,
    })
}
