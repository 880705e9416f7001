//! Most likely state path (Viterbi)

use nalgebra::DMatrix;

use super::params::{DiscreteObservations, HmmParams};
use crate::errors::{InferenceError, Result};

/// Index of the largest value; the lowest index wins ties
fn argmax(values: impl IntoIterator<Item = f64>) -> (usize, f64) {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, v) in values.into_iter().enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best
}

/// Most likely hidden state sequence
///
/// Max-sum recursion in the log domain with backpointers. Ties are broken in
/// favor of the lowest state index, both in the recursion and at the final
/// step.
///
/// # Errors
/// `ModelMismatch` naming the first timestep at which no state sequence has
/// positive probability.
pub fn most_likely_states(
    params: &HmmParams,
    observations: &DiscreteObservations,
) -> Result<Vec<usize>> {
    observations.validate(params.num_classes())?;
    let log_likelihoods = observations.log_likelihoods(&params.emission_probs);
    let num_timesteps = log_likelihoods.nrows();
    if num_timesteps == 0 {
        return Ok(Vec::new());
    }

    let k = params.num_states();
    let log_a = params.transition_matrix.map(f64::ln);
    let mut backpointers = DMatrix::<usize>::zeros(num_timesteps, k);

    let mut scores: Vec<f64> = (0..k)
        .map(|j| params.initial_probs[j].ln() + log_likelihoods[(0, j)])
        .collect();
    if argmax(scores.iter().copied()).1 == f64::NEG_INFINITY {
        return Err(InferenceError::ModelMismatch { timestep: 0 });
    }

    for t in 1..num_timesteps {
        let mut next = vec![f64::NEG_INFINITY; k];
        for j in 0..k {
            let (from, best) = argmax((0..k).map(|i| scores[i] + log_a[(i, j)]));
            backpointers[(t, j)] = from;
            next[j] = best + log_likelihoods[(t, j)];
        }
        if argmax(next.iter().copied()).1 == f64::NEG_INFINITY {
            return Err(InferenceError::ModelMismatch { timestep: t });
        }
        scores = next;
    }

    let mut path = vec![0; num_timesteps];
    path[num_timesteps - 1] = argmax(scores.iter().copied()).0;
    for t in (1..num_timesteps).rev() {
        path[t - 1] = backpointers[(t, path[t])];
    }
    Ok(path)
}
