//! Parameters, parameter properties and observation sequences of a
//! linear-Gaussian state-space model
//!
//! ```text
//! x_0     ~ N(μ_0, Σ_0)
//! x_{t+1} = F x_t + B u_t + b + w_t,   w_t ~ N(0, Q)
//! y_t     = H_t x_t + D u_t + d + v_t, v_t ~ N(0, R)
//! ```

use std::borrow::Cow;

use nalgebra::{DMatrix, DVector};

use crate::common::conjugate::MatrixNormalInverseWishart;
use crate::common::linalg::{all_finite, all_finite_vector, clamp_psd};
use crate::errors::{InferenceError, Result};

// ============================================================================
// Parameters
// ============================================================================

/// Emission matrix, either shared by all timesteps or given per timestep
#[derive(Debug, Clone, PartialEq)]
pub enum EmissionWeights {
    /// One `E × D` matrix for every timestep
    Static(DMatrix<f64>),
    /// One `E × D` matrix per timestep
    TimeVarying(Vec<DMatrix<f64>>),
}

impl EmissionWeights {
    /// Emission matrix at timestep `t`
    ///
    /// Time-varying weights must cover `t`; sequences are validated against
    /// the number of matrices before any recursion runs.
    #[inline]
    pub fn at(&self, t: usize) -> &DMatrix<f64> {
        match self {
            EmissionWeights::Static(h) => h,
            EmissionWeights::TimeVarying(hs) => &hs[t],
        }
    }

    /// Whether a single matrix is shared by all timesteps
    pub fn is_static(&self) -> bool {
        matches!(self, EmissionWeights::Static(_))
    }

    /// Number of timesteps covered, `None` for static weights
    pub fn num_timesteps(&self) -> Option<usize> {
        match self {
            EmissionWeights::Static(_) => None,
            EmissionWeights::TimeVarying(hs) => Some(hs.len()),
        }
    }

    fn first(&self) -> Option<&DMatrix<f64>> {
        match self {
            EmissionWeights::Static(h) => Some(h),
            EmissionWeights::TimeVarying(hs) => hs.first(),
        }
    }

    fn matrices(&self) -> &[DMatrix<f64>] {
        match self {
            EmissionWeights::Static(h) => std::slice::from_ref(h),
            EmissionWeights::TimeVarying(hs) => hs,
        }
    }
}

/// Distribution of the first latent state
#[derive(Debug, Clone, PartialEq)]
pub struct InitialParams {
    /// Mean `μ_0`
    pub mean: DVector<f64>,
    /// Covariance `Σ_0`
    pub cov: DMatrix<f64>,
}

/// Latent dynamics `x_{t+1} = F x_t + B u_t + b + w_t`
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicsParams {
    /// `F` (`D × D`)
    pub weights: DMatrix<f64>,
    /// `b` (`D`)
    pub bias: DVector<f64>,
    /// `B` (`D × U`)
    pub input_weights: DMatrix<f64>,
    /// `Q` (`D × D`)
    pub cov: DMatrix<f64>,
}

/// Emission model `y_t = H_t x_t + D u_t + d + v_t`
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionParams {
    /// `H_t` (`E × D`)
    pub weights: EmissionWeights,
    /// `d` (`E`)
    pub bias: DVector<f64>,
    /// `D` (`E × U`)
    pub input_weights: DMatrix<f64>,
    /// `R` (`E × E`)
    pub cov: DMatrix<f64>,
}

/// Full parameter set of a linear-Gaussian SSM
#[derive(Debug, Clone, PartialEq)]
pub struct LgssmParams {
    /// Initial state distribution
    pub initial: InitialParams,
    /// Latent dynamics
    pub dynamics: DynamicsParams,
    /// Emission model
    pub emissions: EmissionParams,
}

impl LgssmParams {
    /// Create a validated parameter set
    ///
    /// Every covariance is symmetrized. A covariance with a negative
    /// eigenvalue is projected onto the PSD cone and a warning is logged.
    pub fn new(
        initial: InitialParams,
        dynamics: DynamicsParams,
        emissions: EmissionParams,
    ) -> Result<Self> {
        let mut params = Self {
            initial,
            dynamics,
            emissions,
        };
        params.validate()?;
        params.regularize();
        Ok(params)
    }

    /// Model without inputs and without biases
    pub fn from_matrices(
        initial_mean: DVector<f64>,
        initial_cov: DMatrix<f64>,
        dynamics_weights: DMatrix<f64>,
        dynamics_cov: DMatrix<f64>,
        emission_weights: DMatrix<f64>,
        emission_cov: DMatrix<f64>,
    ) -> Result<Self> {
        let state_dim = initial_mean.len();
        let emission_dim = emission_weights.nrows();
        Self::new(
            InitialParams {
                mean: initial_mean,
                cov: initial_cov,
            },
            DynamicsParams {
                weights: dynamics_weights,
                bias: DVector::zeros(state_dim),
                input_weights: DMatrix::zeros(state_dim, 0),
                cov: dynamics_cov,
            },
            EmissionParams {
                weights: EmissionWeights::Static(emission_weights),
                bias: DVector::zeros(emission_dim),
                input_weights: DMatrix::zeros(emission_dim, 0),
                cov: emission_cov,
            },
        )
    }

    /// One-dimensional constant-velocity model observing position
    ///
    /// State `[position, velocity]`, white-noise acceleration with standard
    /// deviation `process_noise_std`, position measured with standard
    /// deviation `measurement_std`.
    pub fn constant_velocity_1d(dt: f64, process_noise_std: f64, measurement_std: f64) -> Self {
        let q = process_noise_std * process_noise_std;
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        #[rustfmt::skip]
        let f = DMatrix::from_row_slice(2, 2, &[
            1.0, dt,
            0.0, 1.0,
        ]);
        #[rustfmt::skip]
        let cov = DMatrix::from_row_slice(2, 2, &[
            q * dt3 / 3.0, q * dt2 / 2.0,
            q * dt2 / 2.0, q * dt,
        ]);

        Self {
            initial: InitialParams {
                mean: DVector::zeros(2),
                cov: DMatrix::identity(2, 2),
            },
            dynamics: DynamicsParams {
                weights: f,
                bias: DVector::zeros(2),
                input_weights: DMatrix::zeros(2, 0),
                cov,
            },
            emissions: EmissionParams {
                weights: EmissionWeights::Static(DMatrix::from_row_slice(1, 2, &[1.0, 0.0])),
                bias: DVector::zeros(1),
                input_weights: DMatrix::zeros(1, 0),
                cov: DMatrix::from_element(1, 1, measurement_std * measurement_std),
            },
        }
    }

    /// Latent state dimension `D`
    #[inline]
    pub fn state_dim(&self) -> usize {
        self.initial.mean.len()
    }

    /// Emission dimension `E`
    #[inline]
    pub fn emission_dim(&self) -> usize {
        self.emissions.bias.len()
    }

    /// Input dimension `U`
    #[inline]
    pub fn input_dim(&self) -> usize {
        self.dynamics.input_weights.ncols()
    }

    /// Check shapes and finiteness of every parameter
    pub fn validate(&self) -> Result<()> {
        let d = self.state_dim();
        let e = self.emission_dim();
        let u = self.input_dim();

        check_square(&self.initial.cov, d, "initial covariance")?;
        check_shape(&self.dynamics.weights, d, d, "dynamics weights")?;
        check_len(&self.dynamics.bias, d, "dynamics bias")?;
        check_shape(&self.dynamics.input_weights, d, u, "dynamics input weights")?;
        check_square(&self.dynamics.cov, d, "dynamics covariance")?;

        if self.emissions.weights.first().is_none() {
            return Err(InferenceError::configuration(
                "time-varying emission weights must contain at least one matrix",
            ));
        }
        for h in self.emissions.weights.matrices() {
            check_shape(h, e, d, "emission weights")?;
        }
        check_shape(&self.emissions.input_weights, e, u, "emission input weights")?;
        check_square(&self.emissions.cov, e, "emission covariance")?;

        let matrices_finite = all_finite(&self.initial.cov)
            && all_finite(&self.dynamics.weights)
            && all_finite(&self.dynamics.input_weights)
            && all_finite(&self.dynamics.cov)
            && self.emissions.weights.matrices().iter().all(all_finite)
            && all_finite(&self.emissions.input_weights)
            && all_finite(&self.emissions.cov);
        let vectors_finite = all_finite_vector(&self.initial.mean)
            && all_finite_vector(&self.dynamics.bias)
            && all_finite_vector(&self.emissions.bias);
        if !matrices_finite || !vectors_finite {
            return Err(InferenceError::NonFinite {
                context: "model parameters".to_string(),
            });
        }
        Ok(())
    }

    /// Parameters with every covariance symmetric PSD
    ///
    /// Borrows `self` when nothing needs fixing, so callers that mutated a
    /// covariance field directly get the same treatment as [`LgssmParams::new`].
    pub fn regularized(&self) -> Cow<'_, Self> {
        let needs_fix = [&self.initial.cov, &self.dynamics.cov, &self.emissions.cov]
            .into_iter()
            .any(|cov| {
                let (fixed, clamped) = clamp_psd(cov);
                clamped || fixed != *cov
            });
        if needs_fix {
            let mut params = self.clone();
            params.regularize();
            Cow::Owned(params)
        } else {
            Cow::Borrowed(self)
        }
    }

    /// Symmetrize every covariance and clamp negative eigenvalues
    pub(crate) fn regularize(&mut self) {
        regularize_cov(&mut self.initial.cov, "initial");
        regularize_cov(&mut self.dynamics.cov, "dynamics");
        regularize_cov(&mut self.emissions.cov, "emission");
    }
}

pub(crate) fn regularize_cov(cov: &mut DMatrix<f64>, name: &str) {
    let (fixed, clamped) = clamp_psd(cov);
    if clamped {
        log::warn!("{} covariance was not PSD; negative eigenvalues clamped", name);
    }
    *cov = fixed;
}

fn check_shape(m: &DMatrix<f64>, rows: usize, cols: usize, context: &str) -> Result<()> {
    if m.nrows() != rows {
        return Err(InferenceError::dimension(rows, m.nrows(), format!("{} rows", context)));
    }
    if m.ncols() != cols {
        return Err(InferenceError::dimension(cols, m.ncols(), format!("{} columns", context)));
    }
    Ok(())
}

fn check_square(m: &DMatrix<f64>, dim: usize, context: &str) -> Result<()> {
    check_shape(m, dim, dim, context)
}

fn check_len(v: &DVector<f64>, len: usize, context: &str) -> Result<()> {
    if v.len() != len {
        return Err(InferenceError::dimension(len, v.len(), context));
    }
    Ok(())
}

// ============================================================================
// Parameter properties
// ============================================================================

/// Trainability and prior of the initial-state block
///
/// The prior is a Normal-Inverse-Wishart, expressed as a one-column
/// [`MatrixNormalInverseWishart`] over `[μ_0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialProps {
    /// Learn `μ_0`
    pub mean: bool,
    /// Learn `Σ_0`
    pub cov: bool,
    /// Optional conjugate prior
    pub prior: Option<MatrixNormalInverseWishart>,
}

/// Trainability and prior of a regression block (dynamics or emissions)
///
/// The prior is over the stacked weights `[W  W_u  w_b]` (state columns, then
/// input columns, then the bias column) and the block covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionProps {
    /// Learn the state weights (`F` or `H`)
    pub weights: bool,
    /// Learn the bias
    pub bias: bool,
    /// Learn the input weights
    pub input_weights: bool,
    /// Learn the covariance
    pub cov: bool,
    /// Optional conjugate prior
    pub prior: Option<MatrixNormalInverseWishart>,
}

impl RegressionProps {
    /// Everything trainable, no prior
    pub fn trainable() -> Self {
        Self {
            weights: true,
            bias: true,
            input_weights: true,
            cov: true,
            prior: None,
        }
    }

    /// Nothing trainable
    pub fn frozen() -> Self {
        Self {
            weights: false,
            bias: false,
            input_weights: false,
            cov: false,
            prior: None,
        }
    }

    /// Attach a prior
    pub fn with_prior(mut self, prior: MatrixNormalInverseWishart) -> Self {
        self.prior = Some(prior);
        self
    }

    /// Whether anything in the block is learned
    pub fn any_trainable(&self) -> bool {
        self.weights || self.bias || self.input_weights || self.cov
    }

    /// Columns of `[W  W_u  w_b]` that are learned
    pub(crate) fn trainable_columns(&self, state_dim: usize, input_dim: usize) -> Vec<usize> {
        let mut cols = Vec::with_capacity(state_dim + input_dim + 1);
        if self.weights {
            cols.extend(0..state_dim);
        }
        if self.input_weights {
            cols.extend(state_dim..state_dim + input_dim);
        }
        if self.bias {
            cols.push(state_dim + input_dim);
        }
        cols
    }
}

/// Trainability masks and priors for every parameter of an LG-SSM
#[derive(Debug, Clone, PartialEq)]
pub struct LgssmProps {
    /// Initial-state block
    pub initial: InitialProps,
    /// Dynamics block
    pub dynamics: RegressionProps,
    /// Emission block
    pub emissions: RegressionProps,
}

impl LgssmProps {
    /// Everything trainable, no priors (maximum likelihood)
    pub fn trainable() -> Self {
        Self {
            initial: InitialProps {
                mean: true,
                cov: true,
                prior: None,
            },
            dynamics: RegressionProps::trainable(),
            emissions: RegressionProps::trainable(),
        }
    }

    /// Everything trainable with weakly informative conjugate priors
    ///
    /// Zero prior means, identity column precisions and scales, and
    /// `df = output dimension + 0.1` for every block.
    pub fn with_weak_priors(state_dim: usize, emission_dim: usize, input_dim: usize) -> Self {
        let features = state_dim + input_dim + 1;
        Self {
            initial: InitialProps {
                mean: true,
                cov: true,
                prior: Some(MatrixNormalInverseWishart::weak(state_dim, 1)),
            },
            dynamics: RegressionProps::trainable()
                .with_prior(MatrixNormalInverseWishart::weak(state_dim, features)),
            emissions: RegressionProps::trainable()
                .with_prior(MatrixNormalInverseWishart::weak(emission_dim, features)),
        }
    }

    /// Check that every prior matches the dimensions of `params`
    pub fn validate(&self, params: &LgssmParams) -> Result<()> {
        let d = params.state_dim();
        let e = params.emission_dim();
        let features = d + params.input_dim() + 1;

        if let Some(prior) = &self.initial.prior {
            check_prior(prior, d, 1, "initial prior")?;
        }
        if let Some(prior) = &self.dynamics.prior {
            check_prior(prior, d, features, "dynamics prior")?;
        }
        if let Some(prior) = &self.emissions.prior {
            check_prior(prior, e, features, "emission prior")?;
        }
        if !params.emissions.weights.is_static() && self.emissions.any_trainable() {
            return Err(InferenceError::configuration(
                "emission parameters can only be learned with static emission weights",
            ));
        }
        Ok(())
    }
}

impl Default for LgssmProps {
    fn default() -> Self {
        Self::trainable()
    }
}

fn check_prior(
    prior: &MatrixNormalInverseWishart,
    output_dim: usize,
    feature_dim: usize,
    context: &str,
) -> Result<()> {
    if prior.output_dim() != output_dim {
        return Err(InferenceError::dimension(
            output_dim,
            prior.output_dim(),
            format!("{} output dimension", context),
        ));
    }
    if prior.feature_dim() != feature_dim {
        return Err(InferenceError::dimension(
            feature_dim,
            prior.feature_dim(),
            format!("{} feature dimension", context),
        ));
    }
    Ok(())
}

// ============================================================================
// Observation sequences
// ============================================================================

/// One observation sequence with optional inputs
///
/// NaN entries of an emission mark missing components. Missing inputs are
/// treated as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct LgssmSequence {
    /// Emissions `y_0 .. y_{T-1}`
    pub emissions: Vec<DVector<f64>>,
    /// Inputs `u_0 .. u_{T-1}`
    pub inputs: Option<Vec<DVector<f64>>>,
}

impl LgssmSequence {
    /// Sequence without inputs
    pub fn new(emissions: Vec<DVector<f64>>) -> Self {
        Self {
            emissions,
            inputs: None,
        }
    }

    /// Attach inputs
    pub fn with_inputs(mut self, inputs: Vec<DVector<f64>>) -> Self {
        self.inputs = Some(inputs);
        self
    }

    /// Number of timesteps
    pub fn len(&self) -> usize {
        self.emissions.len()
    }

    /// Whether the sequence has no timesteps
    pub fn is_empty(&self) -> bool {
        self.emissions.is_empty()
    }

    /// Input at timestep `t`, if inputs were given
    #[inline]
    pub fn input(&self, t: usize) -> Option<&DVector<f64>> {
        self.inputs.as_ref().map(|u| &u[t])
    }

    /// Check the sequence against the model dimensions
    pub fn validate(&self, params: &LgssmParams) -> Result<()> {
        let e = params.emission_dim();
        for y in &self.emissions {
            if y.len() != e {
                return Err(InferenceError::dimension(e, y.len(), "emission dimension"));
            }
            if y.iter().any(|v| v.is_infinite()) {
                return Err(InferenceError::NonFinite {
                    context: "emissions".to_string(),
                });
            }
        }
        if let Some(inputs) = &self.inputs {
            if inputs.len() != self.len() {
                return Err(InferenceError::dimension(
                    self.len(),
                    inputs.len(),
                    "input sequence length",
                ));
            }
            let u = params.input_dim();
            for input in inputs {
                if input.len() != u {
                    return Err(InferenceError::dimension(u, input.len(), "input dimension"));
                }
                if !all_finite_vector(input) {
                    return Err(InferenceError::NonFinite {
                        context: "inputs".to_string(),
                    });
                }
            }
        }
        if let Some(steps) = params.emissions.weights.num_timesteps() {
            if steps < self.len() {
                return Err(InferenceError::dimension(
                    self.len(),
                    steps,
                    "time-varying emission weights",
                ));
            }
        }
        Ok(())
    }
}

impl From<Vec<DVector<f64>>> for LgssmSequence {
    fn from(emissions: Vec<DVector<f64>>) -> Self {
        Self::new(emissions)
    }
}
