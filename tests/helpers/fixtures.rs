//! Model fixtures shared by the integration tests

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use ssm_inference::hmm::HmmParams;
use ssm_inference::lgssm::{
    DynamicsParams, EmissionParams, EmissionWeights, InitialParams, LgssmParams, LgssmSequence,
};
use ssm_inference::RngKey;

//=============================================================================
// Linear-Gaussian fixtures
//=============================================================================

/// Scalar model `x_{t+1} = f x_t + N(0, q)`, `y_t = h x_t + N(0, r)`
pub fn scalar_model(f: f64, q: f64, h: f64, r: f64, m0: f64, p0: f64) -> LgssmParams {
    LgssmParams::from_matrices(
        DVector::from_element(1, m0),
        DMatrix::from_element(1, 1, p0),
        DMatrix::from_element(1, 1, f),
        DMatrix::from_element(1, 1, q),
        DMatrix::from_element(1, 1, h),
        DMatrix::from_element(1, 1, r),
    )
    .unwrap()
}

/// One-dimensional emissions from plain values; NaN marks a missing value
pub fn scalar_sequence(ys: &[f64]) -> LgssmSequence {
    LgssmSequence::new(ys.iter().map(|&y| DVector::from_element(1, y)).collect())
}

/// Random stable model with `state_dim` states and `emission_dim` emissions
///
/// Dynamics are a damped rotation plus small random perturbations, emission
/// weights are standard normal.
pub fn random_model(seed: u64, state_dim: usize, emission_dim: usize) -> LgssmParams {
    let mut rng = RngKey::new(seed).rng();
    let mut normal = |rows: usize, cols: usize| {
        DMatrix::from_fn(rows, cols, |_, _| rng.sample::<f64, _>(StandardNormal))
    };

    let perturbation = normal(state_dim, state_dim) * 0.05;
    let mut weights = DMatrix::identity(state_dim, state_dim) * 0.85 + perturbation;
    if state_dim >= 2 {
        weights[(0, 1)] += 0.2;
        weights[(1, 0)] -= 0.2;
    }
    let emission_weights = normal(emission_dim, state_dim);

    LgssmParams::new(
        InitialParams {
            mean: DVector::zeros(state_dim),
            cov: DMatrix::identity(state_dim, state_dim),
        },
        DynamicsParams {
            weights,
            bias: DVector::from_element(state_dim, 0.1),
            input_weights: DMatrix::zeros(state_dim, 0),
            cov: DMatrix::identity(state_dim, state_dim) * 0.1,
        },
        EmissionParams {
            weights: EmissionWeights::Static(emission_weights),
            bias: DVector::zeros(emission_dim),
            input_weights: DMatrix::zeros(emission_dim, 0),
            cov: DMatrix::identity(emission_dim, emission_dim) * 0.5,
        },
    )
    .unwrap()
}

/// Two states and two emissions driven by two exogenous inputs
pub fn input_model() -> LgssmParams {
    LgssmParams::new(
        InitialParams {
            mean: DVector::from_vec(vec![0.5, -0.5]),
            cov: DMatrix::from_row_slice(2, 2, &[1.0, 0.2, 0.2, 0.8]),
        },
        DynamicsParams {
            weights: DMatrix::from_row_slice(2, 2, &[0.9, 0.1, -0.1, 0.8]),
            bias: DVector::from_vec(vec![0.05, -0.02]),
            input_weights: DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.2, -0.3]),
            cov: DMatrix::from_row_slice(2, 2, &[0.1, 0.02, 0.02, 0.2]),
        },
        EmissionParams {
            weights: EmissionWeights::Static(DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.5, 1.0])),
            bias: DVector::from_vec(vec![0.1, -0.1]),
            input_weights: DMatrix::from_row_slice(2, 2, &[0.3, 0.1, 0.0, 0.4]),
            cov: DMatrix::from_row_slice(2, 2, &[0.3, 0.0, 0.0, 0.2]),
        },
    )
    .unwrap()
}

/// Smooth two-dimensional inputs `u_t = [sin(0.3 t), cos(0.17 t)]`
pub fn sinusoidal_inputs(num_timesteps: usize) -> Vec<DVector<f64>> {
    (0..num_timesteps)
        .map(|t| {
            let t = t as f64;
            DVector::from_vec(vec![(0.3 * t).sin(), (0.17 * t).cos()])
        })
        .collect()
}

/// Covariates and responses of a small linear regression
///
/// `y_i = 0.5 + 2 x_i` plus a fixed deterministic perturbation, for 21
/// evenly spaced `x_i` in `[-1, 1]`.
pub fn regression_data() -> (Vec<f64>, Vec<f64>) {
    let xs: Vec<f64> = (0..21).map(|i| -1.0 + 0.1 * i as f64).collect();
    let ys = xs
        .iter()
        .enumerate()
        .map(|(i, &x)| 0.5 + 2.0 * x + 0.3 * (3.0 * i as f64).sin())
        .collect();
    (xs, ys)
}

/// Bayesian linear regression as a state-space model
///
/// The constant state `β` has prior `N(0, prior_var · I)`, each emission row
/// is `[1, x_t]` and the observation noise variance is `noise_var`.
pub fn regression_model(xs: &[f64], prior_var: f64, noise_var: f64) -> LgssmParams {
    LgssmParams::new(
        InitialParams {
            mean: DVector::zeros(2),
            cov: DMatrix::identity(2, 2) * prior_var,
        },
        DynamicsParams {
            weights: DMatrix::identity(2, 2),
            bias: DVector::zeros(2),
            input_weights: DMatrix::zeros(2, 0),
            cov: DMatrix::zeros(2, 2),
        },
        EmissionParams {
            weights: EmissionWeights::TimeVarying(
                xs.iter()
                    .map(|&x| DMatrix::from_row_slice(1, 2, &[1.0, x]))
                    .collect(),
            ),
            bias: DVector::zeros(1),
            input_weights: DMatrix::zeros(1, 0),
            cov: DMatrix::from_element(1, 1, noise_var),
        },
    )
    .unwrap()
}

//=============================================================================
// HMM fixtures
//=============================================================================

/// Three states with well separated four-class emissions
pub fn three_state_hmm() -> HmmParams {
    #[rustfmt::skip]
    let transitions = DMatrix::from_row_slice(3, 3, &[
        0.90, 0.05, 0.05,
        0.10, 0.80, 0.10,
        0.05, 0.15, 0.80,
    ]);
    #[rustfmt::skip]
    let emissions = DMatrix::from_row_slice(3, 4, &[
        0.70, 0.10, 0.10, 0.10,
        0.10, 0.70, 0.10, 0.10,
        0.05, 0.05, 0.30, 0.60,
    ]);
    HmmParams::new(DVector::from_vec(vec![0.5, 0.3, 0.2]), transitions, emissions).unwrap()
}
