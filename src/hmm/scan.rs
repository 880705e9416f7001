//! Parallel-in-time forward-backward for discrete HMMs
//!
//! The forward pass is an associative scan over conditional transition
//! matrices (Hassan, Särkkä and García-Fernández, 2021). The element for
//! timesteps `s..=t` holds `p(z_t | z_{s-1} = i, y_{s:t})` in row `i` and
//! `log p(y_{s:t} | z_{s-1} = i)` in entry `i` of a log-normalizer vector.
//! Rows are renormalized at every combination, so long sequences do not
//! underflow.
//!
//! The backward pass is a reverse scan of column-stochastic matrices
//! `p(z_t = i | z_{t+1} = j, y_{0:t})`, whose suffix products give the
//! smoothed marginals. Both passes match [`filter`](super::inference::filter)
//! and [`smoother`](super::inference::smoother) up to round-off.

use nalgebra::{DMatrix, DVector};

use super::inference::{shifted_likelihoods, HmmFilterPosterior, HmmPosterior};
use super::params::{DiscreteObservations, HmmParams};
use crate::common::scan::{inclusive_scan, map_indices};
use crate::errors::{InferenceError, Result};

#[derive(Debug, Clone)]
struct FilterElement {
    probs: DMatrix<f64>,
    log_norms: DVector<f64>,
}

/// Multiply every row of `probs` by `weights` and renormalize
///
/// `weights` are likelihoods scaled by `exp(-shift)`. A row with zero mass
/// stays zero and gets a log normalizer of `-∞`.
fn condition(probs: &DMatrix<f64>, weights: &DVector<f64>, shift: f64) -> FilterElement {
    let k = probs.nrows();
    let mut conditioned = DMatrix::zeros(k, probs.ncols());
    let mut log_norms = DVector::from_element(k, f64::NEG_INFINITY);
    for i in 0..k {
        let row = probs.row(i).component_mul(&weights.transpose());
        let norm = row.sum();
        if norm > 0.0 {
            conditioned.set_row(i, &(row / norm));
            log_norms[i] = norm.ln() + shift;
        }
    }
    FilterElement {
        probs: conditioned,
        log_norms,
    }
}

fn filter_element(
    params: &HmmParams,
    likelihoods: &DMatrix<f64>,
    shifts: &[f64],
    t: usize,
) -> FilterElement {
    let k = params.num_states();
    let weights = likelihoods.row(t).transpose();
    if t == 0 {
        // no previous state: every row is the initial distribution
        let initial = DMatrix::from_fn(k, k, |_, j| params.initial_probs[j]);
        condition(&initial, &weights, shifts[t])
    } else {
        condition(&params.transition_matrix, &weights, shifts[t])
    }
}

fn combine_filter(first: &FilterElement, second: &FilterElement) -> FilterElement {
    let k = first.probs.nrows();
    let shift = second.log_norms.max();
    if !shift.is_finite() {
        return FilterElement {
            probs: DMatrix::zeros(k, second.probs.ncols()),
            log_norms: DVector::from_element(k, f64::NEG_INFINITY),
        };
    }
    let weights = second.log_norms.map(|l| (l - shift).exp());
    let conditioned = condition(&first.probs, &weights, shift);
    FilterElement {
        probs: conditioned.probs * &second.probs,
        log_norms: &first.log_norms + conditioned.log_norms,
    }
}

/// Forward filter as an associative scan
///
/// # Errors
/// Same as [`filter`](super::inference::filter): `DimensionMismatch` for
/// observations outside the emission classes, `ModelMismatch` naming the
/// first timestep whose observation has zero probability given the past.
pub fn parallel_filter(
    params: &HmmParams,
    observations: &DiscreteObservations,
) -> Result<HmmFilterPosterior> {
    observations.validate(params.num_classes())?;
    let log_likelihoods = observations.log_likelihoods(&params.emission_probs);
    let (likelihoods, shifts) = shifted_likelihoods(&log_likelihoods)?;

    let num_timesteps = likelihoods.nrows();
    let k = params.num_states();
    if num_timesteps == 0 {
        return Ok(HmmFilterPosterior {
            marginal_loglik: 0.0,
            filtered_probs: DMatrix::zeros(0, k),
            predicted_probs: DMatrix::zeros(0, k),
        });
    }

    let elements = map_indices(num_timesteps, |t| {
        Ok(filter_element(params, &likelihoods, &shifts, t))
    })?;
    let scanned = inclusive_scan(elements, |a, b| Ok(combine_filter(a, b)), false)?;

    // the prefix likelihood is non-increasing, so the first zero is the culprit
    let mut filtered_probs = DMatrix::zeros(num_timesteps, k);
    for (t, element) in scanned.iter().enumerate() {
        if !element.log_norms[0].is_finite() {
            return Err(InferenceError::ModelMismatch { timestep: t });
        }
        let total = element.probs.row(0).sum();
        filtered_probs.set_row(t, &(element.probs.row(0) / total));
    }
    let marginal_loglik = scanned[num_timesteps - 1].log_norms[0];

    let mut predicted_probs = DMatrix::zeros(num_timesteps, k);
    predicted_probs.set_row(0, &params.initial_probs.transpose());
    if num_timesteps > 1 {
        let propagated =
            filtered_probs.rows(0, num_timesteps - 1) * &params.transition_matrix;
        predicted_probs
            .rows_mut(1, num_timesteps - 1)
            .copy_from(&propagated);
    }

    Ok(HmmFilterPosterior {
        marginal_loglik,
        filtered_probs,
        predicted_probs,
    })
}

/// Backward element `p(z_t = i | z_{t+1} = j, y_{0:t})`
///
/// The last timestep has no successor, so every column is its filtered
/// distribution. Columns for successor states with zero predicted mass are
/// never weighted and are filled the same way.
fn smooth_element(params: &HmmParams, filtered: &HmmFilterPosterior, t: usize) -> DMatrix<f64> {
    let k = params.num_states();
    let alpha = filtered.filtered_probs.row(t).transpose();
    if t + 1 == filtered.len() {
        return DMatrix::from_fn(k, k, |i, _| alpha[i]);
    }
    let a = &params.transition_matrix;
    let predicted = filtered.predicted_probs.row(t + 1).transpose();
    DMatrix::from_fn(k, k, |i, j| {
        if predicted[j] > 0.0 {
            alpha[i] * a[(i, j)] / predicted[j]
        } else {
            alpha[i]
        }
    })
}

/// Forward-backward smoother as a pair of associative scans
///
/// Returns the same fields as [`smoother`](super::inference::smoother),
/// including the expected transition counts.
pub fn parallel_smoother(
    params: &HmmParams,
    observations: &DiscreteObservations,
) -> Result<HmmPosterior> {
    let filtered = parallel_filter(params, observations)?;
    let num_timesteps = filtered.len();
    let k = params.num_states();
    if num_timesteps == 0 {
        return Ok(HmmPosterior {
            marginal_loglik: filtered.marginal_loglik,
            filtered_probs: filtered.filtered_probs,
            predicted_probs: filtered.predicted_probs,
            smoothed_probs: DMatrix::zeros(0, k),
            expected_transitions: DMatrix::zeros(k, k),
        });
    }

    let elements = map_indices(num_timesteps, |t| Ok(smooth_element(params, &filtered, t)))?;
    let scanned = inclusive_scan(elements.clone(), |a, b| Ok(a * b), true)?;

    let mut smoothed_probs = DMatrix::zeros(num_timesteps, k);
    for (t, product) in scanned.iter().enumerate() {
        let column = product.column(0);
        smoothed_probs.set_row(t, &(column.transpose() / column.sum()));
    }

    // ξ_t(i, j) = p(z_t = i | z_{t+1} = j, y_{0:t}) p(z_{t+1} = j | y)
    let slices = map_indices(num_timesteps - 1, |t| {
        let mut xi =
            DMatrix::from_fn(k, k, |i, j| elements[t][(i, j)] * smoothed_probs[(t + 1, j)]);
        let total = xi.sum();
        if total > 0.0 {
            xi /= total;
        }
        Ok(xi)
    })?;
    let expected_transitions = slices
        .iter()
        .fold(DMatrix::zeros(k, k), |acc, xi| acc + xi);

    Ok(HmmPosterior {
        marginal_loglik: filtered.marginal_loglik,
        filtered_probs: filtered.filtered_probs,
        predicted_probs: filtered.predicted_probs,
        smoothed_probs,
        expected_transitions,
    })
}
