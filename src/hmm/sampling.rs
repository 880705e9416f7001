//! Sampling for discrete HMMs
//!
//! Ancestral simulation of states and observations, and forward-filter
//! backward-sample draws of the state path. Every routine takes an
//! [`RngKey`] and returns the key to use next.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use super::inference::filter;
use super::params::{DiscreteObservations, HmmParams};
use crate::common::constants::DEFAULT_PROBABILITY_TOLERANCE;
use crate::common::rng::RngKey;
use crate::errors::{InferenceError, Result};

/// Simulated states and observations
#[derive(Debug, Clone, PartialEq)]
pub struct HmmSample {
    /// `z_0 .. z_{T-1}`
    pub states: Vec<usize>,
    /// `y_0 .. y_{T-1}`
    pub observations: DiscreteObservations,
}

/// Draw an index with probability proportional to `weights`
fn categorical<'a, R: Rng + ?Sized>(
    rng: &mut R,
    weights: impl IntoIterator<Item = &'a f64>,
    context: &str,
    row: usize,
) -> Result<usize> {
    let weights: Vec<f64> = weights.into_iter().copied().collect();
    let dist = WeightedIndex::new(&weights).map_err(|_| InferenceError::InvalidProbability {
        context: context.to_string(),
        row,
        sum: weights.iter().sum(),
    })?;
    Ok(dist.sample(rng))
}

/// Ancestral state path of length `num_timesteps`
fn sample_states<R: Rng + ?Sized>(
    rng: &mut R,
    params: &HmmParams,
    num_timesteps: usize,
) -> Result<Vec<usize>> {
    let mut states = Vec::with_capacity(num_timesteps);
    if num_timesteps == 0 {
        return Ok(states);
    }
    let mut state = categorical(rng, params.initial_probs.iter(), "initial probabilities", 0)?;
    states.push(state);
    for _ in 1..num_timesteps {
        state = categorical(
            rng,
            params.transition_matrix.row(state).iter(),
            "transition matrix",
            state,
        )?;
        states.push(state);
    }
    Ok(states)
}

/// One emission class drawn for state `z`
fn emit<R: Rng + ?Sized>(rng: &mut R, params: &HmmParams, z: usize) -> Result<usize> {
    categorical(rng, params.emission_probs.row(z).iter(), "emission probabilities", z)
}

/// Simulate `num_timesteps` states with one categorical observation each
///
/// # Returns
/// Tuple of (sample, next key)
pub fn sample(
    key: RngKey,
    params: &HmmParams,
    num_timesteps: usize,
) -> Result<(HmmSample, RngKey)> {
    params.validate(DEFAULT_PROBABILITY_TOLERANCE)?;
    let (next_key, sample_key) = key.split();
    let mut rng = sample_key.rng();

    let states = sample_states(&mut rng, params, num_timesteps)?;
    let observations = states
        .iter()
        .map(|&z| emit(&mut rng, params, z))
        .collect::<Result<Vec<_>>>()?;

    Ok((
        HmmSample {
            states,
            observations: DiscreteObservations::Categorical(observations),
        },
        next_key,
    ))
}

/// Simulate `num_timesteps` states with `num_trials` multinomial draws each
///
/// # Returns
/// Tuple of (sample, next key)
pub fn sample_multinomial(
    key: RngKey,
    params: &HmmParams,
    num_timesteps: usize,
    num_trials: u32,
) -> Result<(HmmSample, RngKey)> {
    params.validate(DEFAULT_PROBABILITY_TOLERANCE)?;
    let (next_key, sample_key) = key.split();
    let mut rng = sample_key.rng();

    let states = sample_states(&mut rng, params, num_timesteps)?;
    let num_classes = params.num_classes();
    let mut observations = Vec::with_capacity(num_timesteps);
    for &z in &states {
        let mut counts = vec![0u32; num_classes];
        for _ in 0..num_trials {
            counts[emit(&mut rng, params, z)?] += 1;
        }
        observations.push(counts);
    }

    Ok((
        HmmSample {
            states,
            observations: DiscreteObservations::Multinomial(observations),
        },
        next_key,
    ))
}

/// Draw one state path from `p(z_{0:T-1} | y_{0:T-1})`
///
/// Samples `z_{T-1}` from the last filtered distribution, then each earlier
/// state from `p(z_t | z_{t+1}, y_{0:t}) ∝ α_t(i) A[i, z_{t+1}]`.
///
/// # Returns
/// Tuple of (state path, next key)
pub fn posterior_sample(
    key: RngKey,
    params: &HmmParams,
    observations: &DiscreteObservations,
) -> Result<(Vec<usize>, RngKey)> {
    let (next_key, sample_key) = key.split();
    let filtered = filter(params, observations)?;
    let num_timesteps = filtered.len();
    if num_timesteps == 0 {
        return Ok((Vec::new(), next_key));
    }

    let mut rng = sample_key.rng();
    let last = num_timesteps - 1;
    let mut states = vec![0; num_timesteps];
    states[last] = categorical(
        &mut rng,
        filtered.filtered_probs.row(last).iter(),
        "filtered probabilities",
        last,
    )?;
    for t in (0..last).rev() {
        let next = states[t + 1];
        let weights: Vec<f64> = filtered
            .filtered_probs
            .row(t)
            .iter()
            .zip(params.transition_matrix.column(next).iter())
            .map(|(alpha, a)| alpha * a)
            .collect();
        states[t] = categorical(&mut rng, weights.iter(), "backward sampling weights", t)?;
    }
    Ok((states, next_key))
}
