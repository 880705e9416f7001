//! Sufficient statistics of the three LG-SSM regressions
//!
//! Every block is a linear regression `target = W z + noise`:
//!
//! | block     | target    | features `z`      |
//! |-----------|-----------|-------------------|
//! | initial   | `x_0`     | `[1]`             |
//! | dynamics  | `x_{t+1}` | `[x_t; u_t; 1]`   |
//! | emissions | `y_t`     | `[x_t; u_t; 1]`   |
//!
//! The statistics are the (expected) moments `Σ z zᵀ`, `Σ y zᵀ`, `Σ y yᵀ`
//! and the number of terms. They are computed either in expectation under a
//! smoothed posterior (EM) or exactly from a sampled trajectory (Gibbs).

use nalgebra::{DMatrix, DVector};

use super::inference::{observed_indices, SmoothedPosterior};
use super::params::{LgssmParams, LgssmSequence};
use crate::em::SufficientStatistics;

/// Moments of one regression block
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionStats {
    /// `Σ E[z zᵀ]`
    pub szz: DMatrix<f64>,
    /// `Σ E[y zᵀ]`
    pub syz: DMatrix<f64>,
    /// `Σ E[y yᵀ]`
    pub syy: DMatrix<f64>,
    /// Number of terms
    pub count: f64,
}

impl RegressionStats {
    /// Empty statistics
    pub fn zeros(output_dim: usize, feature_dim: usize) -> Self {
        Self {
            szz: DMatrix::zeros(feature_dim, feature_dim),
            syz: DMatrix::zeros(output_dim, feature_dim),
            syy: DMatrix::zeros(output_dim, output_dim),
            count: 0.0,
        }
    }

    fn add(&mut self, szz: &DMatrix<f64>, syz: &DMatrix<f64>, syy: &DMatrix<f64>) {
        self.szz += szz;
        self.syz += syz;
        self.syy += syy;
        self.count += 1.0;
    }
}

impl SufficientStatistics for RegressionStats {
    fn combine(mut self, other: Self) -> Self {
        self.szz += other.szz;
        self.syz += other.syz;
        self.syy += other.syy;
        self.count += other.count;
        self
    }
}

/// Statistics of all three blocks of an LG-SSM
#[derive(Debug, Clone, PartialEq)]
pub struct LgssmStats {
    /// Initial-state block
    pub initial: RegressionStats,
    /// Dynamics block
    pub dynamics: RegressionStats,
    /// Emission block
    pub emissions: RegressionStats,
}

impl LgssmStats {
    /// Empty statistics for the dimensions of `params`
    pub fn zeros(params: &LgssmParams) -> Self {
        let d = params.state_dim();
        let features = d + params.input_dim() + 1;
        Self {
            initial: RegressionStats::zeros(d, 1),
            dynamics: RegressionStats::zeros(d, features),
            emissions: RegressionStats::zeros(params.emission_dim(), features),
        }
    }
}

impl SufficientStatistics for LgssmStats {
    fn combine(self, other: Self) -> Self {
        Self {
            initial: self.initial.combine(other.initial),
            dynamics: self.dynamics.combine(other.dynamics),
            emissions: self.emissions.combine(other.emissions),
        }
    }
}

/// Mean of `[x; u; 1]`
fn feature_mean(
    state: &DVector<f64>,
    input: Option<&DVector<f64>>,
    input_dim: usize,
) -> DVector<f64> {
    let d = state.len();
    let mut z = DVector::zeros(d + input_dim + 1);
    z.rows_mut(0, d).copy_from(state);
    if let Some(u) = input {
        z.rows_mut(d, input_dim).copy_from(u);
    }
    z[d + input_dim] = 1.0;
    z
}

/// `E[z zᵀ]` given the mean and covariance of the state part
fn feature_second_moment(z: &DVector<f64>, state_cov: Option<&DMatrix<f64>>) -> DMatrix<f64> {
    let mut szz = z * z.transpose();
    if let Some(p) = state_cov {
        let d = p.nrows();
        let mut block = szz.view_mut((0, 0), (d, d));
        block += p;
    }
    szz
}

/// Accumulate block statistics from per-timestep state moments
///
/// `covs` and `cross` are the smoothed covariances and `Cov[x_t, x_{t+1}]`;
/// both are `None` for a sampled trajectory, whose moments are exact.
/// Emissions with any missing component are left out of the emission block.
fn accumulate(
    params: &LgssmParams,
    sequence: &LgssmSequence,
    means: &[DVector<f64>],
    covs: Option<&[DMatrix<f64>]>,
    cross: Option<&[DMatrix<f64>]>,
) -> LgssmStats {
    let d = params.state_dim();
    let input_dim = params.input_dim();
    let mut stats = LgssmStats::zeros(params);
    let num_timesteps = means.len();
    if num_timesteps == 0 {
        return stats;
    }

    let cov_at = |t: usize| covs.map(|c| &c[t]);
    let second_moment = |t: usize| {
        let m = &means[t];
        let mut mm = m * m.transpose();
        if let Some(p) = cov_at(t) {
            mm += p;
        }
        mm
    };

    // initial: x_0 on [1]
    let m0 = &means[0];
    stats.initial.add(
        &DMatrix::from_element(1, 1, 1.0),
        &DMatrix::from_column_slice(d, 1, m0.as_slice()),
        &second_moment(0),
    );

    for t in 0..num_timesteps {
        let input = sequence.input(t);
        let z = feature_mean(&means[t], input, input_dim);
        let szz = feature_second_moment(&z, cov_at(t));

        // emissions: y_t on [x_t; u_t; 1]
        let y = &sequence.emissions[t];
        if observed_indices(y).len() == y.len() {
            stats.emissions.add(&szz, &(y * z.transpose()), &(y * y.transpose()));
        }

        // dynamics: x_{t+1} on [x_t; u_t; 1]
        if t + 1 < num_timesteps {
            let next = &means[t + 1];
            let mut syz = next * z.transpose();
            if let Some(c) = cross {
                // Cov[x_{t+1}, x_t] = Cov[x_t, x_{t+1}]ᵀ
                let mut block = syz.view_mut((0, 0), (d, d));
                block += c[t].transpose();
            }
            stats.dynamics.add(&szz, &syz, &second_moment(t + 1));
        }
    }
    stats
}

/// Expected statistics under a smoothed posterior (E-step)
pub fn expected_stats(
    params: &LgssmParams,
    sequence: &LgssmSequence,
    posterior: &SmoothedPosterior,
) -> LgssmStats {
    accumulate(
        params,
        sequence,
        &posterior.smoothed_means,
        Some(&posterior.smoothed_covariances),
        Some(&posterior.smoothed_cross_covariances),
    )
}

/// Exact statistics of a sampled trajectory (Gibbs)
pub fn trajectory_stats(
    params: &LgssmParams,
    sequence: &LgssmSequence,
    states: &[DVector<f64>],
) -> LgssmStats {
    accumulate(params, sequence, states, None, None)
}
