//! Expected counts, M-step and log prior of discrete HMMs

use nalgebra::{DMatrix, DVector};

use super::inference::HmmPosterior;
use super::params::{DiscreteObservations, HmmParams, HmmProps, ProbabilityProps};
use crate::em::SufficientStatistics;
use crate::errors::Result;

/// Expected counts of one or more sequences
#[derive(Debug, Clone, PartialEq)]
pub struct HmmStats {
    /// `Σ p(z_0 = k | y)` (`K`)
    pub initial: DVector<f64>,
    /// `Σ_t p(z_t = i, z_{t+1} = j | y)` (`K × K`)
    pub transitions: DMatrix<f64>,
    /// `Σ_t p(z_t = k | y) n_{t,c}` (`K × C`)
    pub emissions: DMatrix<f64>,
}

impl HmmStats {
    /// Empty counts
    pub fn zeros(num_states: usize, num_classes: usize) -> Self {
        Self {
            initial: DVector::zeros(num_states),
            transitions: DMatrix::zeros(num_states, num_states),
            emissions: DMatrix::zeros(num_states, num_classes),
        }
    }
}

impl SufficientStatistics for HmmStats {
    fn combine(mut self, other: Self) -> Self {
        self.initial += other.initial;
        self.transitions += other.transitions;
        self.emissions += other.emissions;
        self
    }
}

/// Expected counts under a smoothed posterior
///
/// Emission counts weight each observed class count vector (a one-hot
/// vector for categorical observations) by the smoothed state marginals.
pub fn expected_stats(
    posterior: &HmmPosterior,
    observations: &DiscreteObservations,
    num_classes: usize,
) -> HmmStats {
    let k = posterior.smoothed_probs.ncols();
    let mut stats = HmmStats::zeros(k, num_classes);
    if posterior.is_empty() {
        return stats;
    }

    stats.initial = posterior.smoothed_probs.row(0).transpose();
    stats.transitions = posterior.expected_transitions.clone();
    for t in 0..posterior.len() {
        let gamma = posterior.smoothed_probs.row(t).transpose();
        let counts = observations.counts(t, num_classes);
        stats.emissions += gamma * counts.transpose();
    }
    stats
}

/// `1 × K` matrix holding the entries of `v`
fn as_row(v: &DVector<f64>) -> DMatrix<f64> {
    DMatrix::from_row_slice(1, v.len(), v.as_slice())
}

/// Row-wise Dirichlet MAP: each row is `max(counts + α − 1, 0)` normalized
///
/// A row with no mass left keeps its previous value.
fn normalized_rows(
    counts: &DMatrix<f64>,
    props: &ProbabilityProps,
    previous: &DMatrix<f64>,
) -> DMatrix<f64> {
    let mut updated = counts.clone();
    if let Some(prior) = &props.prior {
        updated += &prior.concentration;
        updated.add_scalar_mut(-1.0);
    }
    updated.apply(|v| *v = v.max(0.0));

    for (i, mut row) in updated.row_iter_mut().enumerate() {
        let total = row.sum();
        if total > 0.0 {
            row /= total;
        } else {
            log::debug!("row {} has no expected counts; previous probabilities kept", i);
            row.copy_from(&previous.row(i));
        }
    }
    updated
}

/// Closed-form M-step
///
/// Trainable blocks get the Dirichlet MAP update (the maximum-likelihood
/// update without a prior); frozen blocks are carried over. The result is
/// re-validated against `tolerance`.
pub fn m_step(
    params: &HmmParams,
    props: &HmmProps,
    stats: &HmmStats,
    tolerance: f64,
) -> Result<HmmParams> {
    let mut updated = params.clone();
    if props.initial.trainable {
        let counts = as_row(&stats.initial);
        let previous = as_row(&params.initial_probs);
        let row = normalized_rows(&counts, &props.initial, &previous);
        updated.initial_probs = DVector::from_iterator(row.ncols(), row.iter().copied());
    }
    if props.transitions.trainable {
        updated.transition_matrix =
            normalized_rows(&stats.transitions, &props.transitions, &params.transition_matrix);
    }
    if props.emissions.trainable {
        updated.emission_probs =
            normalized_rows(&stats.emissions, &props.emissions, &params.emission_probs);
    }
    updated.validate(tolerance)?;
    Ok(updated)
}

/// Dirichlet log density of every trainable block that has a prior
pub fn log_prior(params: &HmmParams, props: &HmmProps) -> f64 {
    let mut lp = 0.0;
    if let (true, Some(prior)) = (props.initial.trainable, &props.initial.prior) {
        lp += prior.log_prob(&as_row(&params.initial_probs));
    }
    if let (true, Some(prior)) = (props.transitions.trainable, &props.transitions.prior) {
        lp += prior.log_prob(&params.transition_matrix);
    }
    if let (true, Some(prior)) = (props.emissions.trainable, &props.emissions.prior) {
        lp += prior.log_prob(&params.emission_probs);
    }
    lp
}
