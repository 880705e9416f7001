//! Parallel-in-time Kalman filter and RTS smoother
//!
//! Filtering and smoothing written as associative scans (Särkkä and
//! García-Fernández, 2021). Every timestep contributes one element built
//! independently of the others, and the elements are combined with an
//! inclusive scan in `O(log T)` rounds. With the `rayon` feature both the
//! element construction and every scan round run on the thread pool.
//!
//! The results equal the sequential [`filter`](super::inference::filter) and
//! [`smoother`](super::inference::smoother) up to round-off. Biases and
//! per-timestep emission weights are supported; inputs and missing emissions
//! are not.

use nalgebra::{DMatrix, DVector};

use super::inference::{predict, smoother_gain, FilteredPosterior, SmoothedPosterior};
use super::params::{LgssmParams, LgssmSequence};
use crate::common::linalg::{cholesky_with_retry, log_gaussian_density, symmetrize};
use crate::common::scan::{inclusive_scan, map_indices};
use crate::config::NumericConfig;
use crate::errors::{InferenceError, MatrixRole, Result};

/// Filtering element: `p(x_t | x_{t-1}, y_t) = N(A x_{t-1} + b, C)` together
/// with the likelihood of `y_t` as a function of `x_{t-1}`, kept in
/// information form `(J, η)`
#[derive(Debug, Clone)]
struct FilterElement {
    a: DMatrix<f64>,
    b: DVector<f64>,
    c: DMatrix<f64>,
    j: DMatrix<f64>,
    eta: DVector<f64>,
    /// Last timestep covered by the element
    last: usize,
}

/// Smoothing element: `p(x_t | x_{t+1}, y_{0:t}) = N(E x_{t+1} + g, L)`
#[derive(Debug, Clone)]
struct SmoothElement {
    e: DMatrix<f64>,
    g: DVector<f64>,
    l: DMatrix<f64>,
}

fn check_supported(params: &LgssmParams, sequence: &LgssmSequence) -> Result<()> {
    params.validate()?;
    sequence.validate(params)?;
    if sequence.inputs.is_some() {
        return Err(InferenceError::configuration(
            "the parallel filter does not support inputs",
        ));
    }
    if sequence.emissions.iter().any(|y| y.iter().any(|v| v.is_nan())) {
        return Err(InferenceError::configuration(
            "the parallel filter does not support missing emissions",
        ));
    }
    Ok(())
}

// ============================================================================
// Filtering
// ============================================================================

fn filter_element(
    params: &LgssmParams,
    t: usize,
    y: &DVector<f64>,
    jitter: f64,
) -> Result<FilterElement> {
    let d = params.state_dim();
    let h = params.emissions.weights.at(t);
    let r = &params.emissions.cov;
    let identity = DMatrix::<f64>::identity(d, d);

    // the first element conditions the initial distribution on y_0; later
    // ones condition the transition from x_{t-1} on y_t
    let (cov, offset) = if t == 0 {
        (&params.initial.cov, &params.initial.mean)
    } else {
        (&params.dynamics.cov, &params.dynamics.bias)
    };

    let s = symmetrize(&(h * cov * h.transpose() + r));
    let chol = cholesky_with_retry(&s, jitter)
        .ok_or_else(|| InferenceError::instability_at(t, MatrixRole::InnovationCovariance))?;
    let gain = chol.solve(&(h * cov)).transpose();
    let residual = y - &params.emissions.bias - h * offset;
    let i_minus_kh = &identity - &gain * h;

    let b = offset + &gain * &residual;
    let c = symmetrize(&(&i_minus_kh * cov * i_minus_kh.transpose() + &gain * r * gain.transpose()));

    if t == 0 {
        return Ok(FilterElement {
            a: DMatrix::zeros(d, d),
            b,
            c,
            j: DMatrix::zeros(d, d),
            eta: DVector::zeros(d),
            last: t,
        });
    }

    let f = &params.dynamics.weights;
    let hf = h * f;
    Ok(FilterElement {
        a: &i_minus_kh * f,
        b,
        c,
        j: symmetrize(&(hf.transpose() * chol.solve(&hf))),
        eta: hf.transpose() * chol.solve(&residual),
        last: t,
    })
}

fn combine_filter(first: &FilterElement, second: &FilterElement) -> Result<FilterElement> {
    let d = first.b.len();
    let identity = DMatrix::<f64>::identity(d, d);
    let singular = || InferenceError::instability_at(second.last, MatrixRole::PredictedCovariance);

    // N = I + C_1 J_2 and Nᵀ = I + J_2 C_1; products with N⁻¹ are solves
    let n = &identity + &first.c * &second.j;
    let n_t = &identity + &second.j * &first.c;

    // A_2 N⁻¹ = (N⁻ᵀ A_2ᵀ)ᵀ
    let am = n_t
        .lu()
        .solve(&second.a.transpose())
        .ok_or_else(singular)?
        .transpose();
    let a = &am * &first.a;
    let b = &am * (&first.b + &first.c * &second.eta) + &second.b;
    let c = symmetrize(&(&am * &first.c * second.a.transpose() + &second.c));

    // A_1ᵀ N⁻ᵀ = (N⁻¹ A_1)ᵀ
    let at_mt = n.lu().solve(&first.a).ok_or_else(singular)?.transpose();
    let eta = &at_mt * (&second.eta - &second.j * &first.b) + &first.eta;
    let j = symmetrize(&(&at_mt * &second.j * &first.a + &first.j));

    Ok(FilterElement {
        a,
        b,
        c,
        j,
        eta,
        last: second.last,
    })
}

/// Kalman filter as an associative scan
///
/// Predicted moments and the marginal log-likelihood are recovered from the
/// filtered moments afterwards, one timestep per task.
///
/// # Errors
/// `Configuration` for sequences with inputs or missing emissions, otherwise
/// the same errors as the sequential filter.
pub fn parallel_filter(
    params: &LgssmParams,
    sequence: &LgssmSequence,
    numerics: &NumericConfig,
) -> Result<FilteredPosterior> {
    check_supported(params, sequence)?;
    let params = params.regularized();
    let params = params.as_ref();
    let num_timesteps = sequence.len();
    let jitter = numerics.jitter;

    let elements = map_indices(num_timesteps, |t| {
        filter_element(params, t, &sequence.emissions[t], jitter)
    })?;
    let scanned = inclusive_scan(elements, combine_filter, false)?;
    let (filtered_means, filtered_covariances): (Vec<_>, Vec<_>) =
        scanned.into_iter().map(|e| (e.b, e.c)).unzip();

    let predicted = map_indices(num_timesteps, |t| {
        let moments = if t == 0 {
            (params.initial.mean.clone(), params.initial.cov.clone())
        } else {
            predict(
                &filtered_means[t - 1],
                &filtered_covariances[t - 1],
                &params.dynamics,
                None,
            )
        };
        let (mean, cov) = &moments;
        let h = params.emissions.weights.at(t);
        let s = symmetrize(&(h * cov * h.transpose() + &params.emissions.cov));
        let chol = cholesky_with_retry(&s, jitter)
            .ok_or_else(|| InferenceError::instability_at(t, MatrixRole::InnovationCovariance))?;
        let residual = &sequence.emissions[t] - h * mean - &params.emissions.bias;
        Ok((moments, log_gaussian_density(&residual, &chol)))
    })?;

    let mut marginal_loglik = 0.0;
    let mut predicted_means = Vec::with_capacity(num_timesteps);
    let mut predicted_covariances = Vec::with_capacity(num_timesteps);
    for ((mean, cov), loglik) in predicted {
        marginal_loglik += loglik;
        predicted_means.push(mean);
        predicted_covariances.push(cov);
    }
    if !marginal_loglik.is_finite() {
        return Err(InferenceError::NonFinite {
            context: "marginal log-likelihood".to_string(),
        });
    }

    Ok(FilteredPosterior {
        marginal_loglik,
        predicted_means,
        predicted_covariances,
        filtered_means,
        filtered_covariances,
    })
}

// ============================================================================
// Smoothing
// ============================================================================

fn smooth_element(
    params: &LgssmParams,
    filtered: &FilteredPosterior,
    t: usize,
    jitter: f64,
) -> Result<SmoothElement> {
    let d = params.state_dim();
    let mean = &filtered.filtered_means[t];
    let cov = &filtered.filtered_covariances[t];
    if t + 1 == filtered.len() {
        return Ok(SmoothElement {
            e: DMatrix::zeros(d, d),
            g: mean.clone(),
            l: cov.clone(),
        });
    }

    let f = &params.dynamics.weights;
    let (pred_mean, pred_cov) = predict(mean, cov, &params.dynamics, None);
    let e = smoother_gain(cov, &pred_cov, f, t, jitter)?;
    let g = mean - &e * pred_mean;
    let l = symmetrize(&(cov - &e * f * cov));
    Ok(SmoothElement { e, g, l })
}

fn combine_smooth(first: &SmoothElement, second: &SmoothElement) -> Result<SmoothElement> {
    Ok(SmoothElement {
        e: &first.e * &second.e,
        g: &first.e * &second.g + &first.g,
        l: symmetrize(&(&first.e * &second.l * first.e.transpose() + &first.l)),
    })
}

/// RTS smoother as a reverse associative scan over [`parallel_filter`]
///
/// The last smoothed moment is the last filtered moment exactly, and the
/// cross-covariances are `E_t P_{t+1|T}` as in the sequential smoother.
pub fn parallel_smoother(
    params: &LgssmParams,
    sequence: &LgssmSequence,
    numerics: &NumericConfig,
) -> Result<SmoothedPosterior> {
    let filtered = parallel_filter(params, sequence, numerics)?;
    let num_timesteps = filtered.len();
    let jitter = numerics.jitter;

    let elements = map_indices(num_timesteps, |t| smooth_element(params, &filtered, t, jitter))?;
    let gains: Vec<DMatrix<f64>> = elements.iter().map(|e| e.e.clone()).collect();
    let scanned = inclusive_scan(elements, combine_smooth, true)?;
    let (smoothed_means, smoothed_covariances): (Vec<_>, Vec<_>) =
        scanned.into_iter().map(|e| (e.g, e.l)).unzip();

    let smoothed_cross_covariances = (0..num_timesteps.saturating_sub(1))
        .map(|t| &gains[t] * &smoothed_covariances[t + 1])
        .collect();

    Ok(SmoothedPosterior {
        filtered,
        smoothed_means,
        smoothed_covariances,
        smoothed_cross_covariances,
    })
}
