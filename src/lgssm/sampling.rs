//! Sampling for linear-Gaussian SSMs
//!
//! Forward-filter backward-sample (FFBS) draws latent trajectories from the
//! exact joint posterior; [`sample`] simulates states and emissions from the
//! model. Both take an [`RngKey`] and return the key to use next.

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use super::inference::{emission_mean, filter, predict, smoother_gain, FilteredPosterior};
use super::params::{LgssmParams, LgssmSequence};
use crate::common::linalg::{clamp_psd, psd_factor, sample_gaussian, standard_normal_vector};
use crate::common::rng::RngKey;
use crate::config::NumericConfig;
use crate::errors::{InferenceError, Result};

/// Simulated latent states and emissions
#[derive(Debug, Clone, PartialEq)]
pub struct LgssmSample {
    /// `x_0 .. x_{T-1}`
    pub states: Vec<DVector<f64>>,
    /// `y_0 .. y_{T-1}`
    pub emissions: Vec<DVector<f64>>,
}

impl LgssmSample {
    /// Emissions as a sequence, without inputs
    pub fn to_sequence(&self) -> LgssmSequence {
        LgssmSequence::new(self.emissions.clone())
    }
}

/// Backward pass of FFBS over a completed forward pass
///
/// Draws `x_{T-1}` from the last filtered marginal, then each `x_t` from
/// `p(x_t | x_{t+1}, y_{0:t})` with mean `m_t + J_t (x_{t+1} − m_{t+1|t})` and
/// covariance `P_t − J_t P_{t+1|t} J_tᵀ`.
pub(crate) fn backward_sample<R: Rng + ?Sized>(
    rng: &mut R,
    params: &LgssmParams,
    filtered: &FilteredPosterior,
    jitter: f64,
) -> Result<Vec<DVector<f64>>> {
    let num_timesteps = filtered.len();
    if num_timesteps == 0 {
        return Ok(Vec::new());
    }

    let mut states = Vec::with_capacity(num_timesteps);
    let last = num_timesteps - 1;
    let mut next = sample_gaussian(
        rng,
        &filtered.filtered_means[last],
        &filtered.filtered_covariances[last],
    );
    states.push(next.clone());

    for t in (0..last).rev() {
        let filtered_cov = &filtered.filtered_covariances[t];
        let pred_cov = &filtered.predicted_covariances[t + 1];
        let gain = smoother_gain(filtered_cov, pred_cov, &params.dynamics.weights, t, jitter)?;

        let mean = &filtered.filtered_means[t] + &gain * (&next - &filtered.predicted_means[t + 1]);
        let (cov, _) = clamp_psd(&(filtered_cov - &gain * pred_cov * gain.transpose()));
        next = sample_gaussian(rng, &mean, &cov);
        states.push(next.clone());
    }

    states.reverse();
    Ok(states)
}

/// Draw one latent trajectory from `p(x_{0:T-1} | y_{0:T-1})`
///
/// # Returns
/// Tuple of (trajectory, next key)
pub fn posterior_sample(
    key: RngKey,
    params: &LgssmParams,
    sequence: &LgssmSequence,
    numerics: &NumericConfig,
) -> Result<(Vec<DVector<f64>>, RngKey)> {
    let (next_key, sample_key) = key.split();
    let filtered = filter(params, sequence, numerics)?;
    let mut rng = sample_key.rng();
    let states = backward_sample(&mut rng, params, &filtered, numerics.jitter)?;
    Ok((states, next_key))
}

/// Simulate `num_timesteps` states and emissions from the model
///
/// # Arguments
/// * `key` - Random key
/// * `params` - Model parameters
/// * `num_timesteps` - Length of the simulated sequence
/// * `inputs` - Inputs `u_0 .. u_{T-1}`, or `None` for zero inputs
///
/// # Returns
/// Tuple of (sample, next key)
pub fn sample(
    key: RngKey,
    params: &LgssmParams,
    num_timesteps: usize,
    inputs: Option<&[DVector<f64>]>,
) -> Result<(LgssmSample, RngKey)> {
    params.validate()?;
    if let Some(u) = inputs {
        if u.len() != num_timesteps {
            return Err(InferenceError::dimension(
                num_timesteps,
                u.len(),
                "input sequence length",
            ));
        }
        let input_dim = params.input_dim();
        if let Some(bad) = u.iter().find(|input| input.len() != input_dim) {
            return Err(InferenceError::dimension(input_dim, bad.len(), "input dimension"));
        }
    }
    if let Some(steps) = params.emissions.weights.num_timesteps() {
        if steps < num_timesteps {
            return Err(InferenceError::dimension(
                num_timesteps,
                steps,
                "time-varying emission weights",
            ));
        }
    }

    let (next_key, sample_key) = key.split();
    let mut rng = sample_key.rng();
    let dynamics_factor = psd_factor(&params.dynamics.cov);
    let emission_factor = psd_factor(&params.emissions.cov);
    let zero_cov = DMatrix::zeros(params.state_dim(), params.state_dim());

    let mut states = Vec::with_capacity(num_timesteps);
    let mut emissions = Vec::with_capacity(num_timesteps);
    let mut state = sample_gaussian(&mut rng, &params.initial.mean, &params.initial.cov);
    for t in 0..num_timesteps {
        let input = inputs.map(|u| &u[t]);
        let noise = &emission_factor * standard_normal_vector(&mut rng, params.emission_dim());
        emissions.push(emission_mean(params, t, &state, input) + noise);

        let (mean, _) = predict(&state, &zero_cov, &params.dynamics, input);
        let noise = &dynamics_factor * standard_normal_vector(&mut rng, params.state_dim());
        states.push(std::mem::replace(&mut state, mean + noise));
    }

    Ok((LgssmSample { states, emissions }, next_key))
}
