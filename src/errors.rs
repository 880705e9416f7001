//! Error types for inference and learning
//!
//! Every fallible operation returns [`InferenceError`]. The iterative fitting
//! loops wrap it in [`FitError`] so that callers keep the partial
//! log-probability trace and the last parameters that were valid.

use std::fmt;

/// Which matrix failed a factorization or a positive-definiteness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixRole {
    /// `S = H P Hᵀ + R` in the Kalman update
    InnovationCovariance,
    /// `P_{t+1|t}` inverted by the RTS smoother gain
    PredictedCovariance,
    /// Backward-sampling conditional covariance
    ConditionalCovariance,
    /// Column precision of a Matrix-Normal posterior
    PosteriorPrecision,
    /// Scale matrix of an Inverse-Wishart distribution
    InverseWishartScale,
    /// A covariance parameter of the model
    ModelCovariance,
}

impl fmt::Display for MatrixRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatrixRole::InnovationCovariance => "innovation covariance",
            MatrixRole::PredictedCovariance => "predicted covariance",
            MatrixRole::ConditionalCovariance => "conditional covariance",
            MatrixRole::PosteriorPrecision => "posterior precision",
            MatrixRole::InverseWishartScale => "inverse-Wishart scale",
            MatrixRole::ModelCovariance => "model covariance",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during inference or learning
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// Dimension mismatch between expected and actual
    DimensionMismatch {
        /// What was expected
        expected: usize,
        /// What was received
        actual: usize,
        /// Context (e.g., "emission dimension", "input sequence length")
        context: String,
    },

    /// A covariance could not be factorized even after the jitter retry
    NumericalInstability {
        /// Timestep at which the failure happened, if it happened inside a recursion
        timestep: Option<usize>,
        /// Matrix that failed
        role: MatrixRole,
    },

    /// The observation sequence has zero probability under the model
    ModelMismatch {
        /// First timestep with zero likelihood
        timestep: usize,
    },

    /// A probability vector or matrix row is negative or does not sum to one
    InvalidProbability {
        /// Which parameter (e.g., "transition matrix")
        context: String,
        /// Offending row (0 for vectors)
        row: usize,
        /// Actual sum of the row
        sum: f64,
    },

    /// A value that must be finite is NaN or infinite
    NonFinite {
        /// Description of the value
        context: String,
    },

    /// Configuration error
    Configuration {
        /// Description of the configuration issue
        description: String,
    },
}

impl InferenceError {
    /// Shorthand for a [`InferenceError::DimensionMismatch`]
    pub fn dimension(expected: usize, actual: usize, context: impl Into<String>) -> Self {
        InferenceError::DimensionMismatch {
            expected,
            actual,
            context: context.into(),
        }
    }

    /// Shorthand for a [`InferenceError::Configuration`]
    pub fn configuration(description: impl Into<String>) -> Self {
        InferenceError::Configuration {
            description: description.into(),
        }
    }

    /// Shorthand for a [`InferenceError::NumericalInstability`] at a timestep
    pub fn instability_at(timestep: usize, role: MatrixRole) -> Self {
        InferenceError::NumericalInstability {
            timestep: Some(timestep),
            role,
        }
    }

    /// Shorthand for a [`InferenceError::NumericalInstability`] outside a recursion
    pub fn instability(role: MatrixRole) -> Self {
        InferenceError::NumericalInstability {
            timestep: None,
            role,
        }
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::DimensionMismatch {
                expected,
                actual,
                context,
            } => {
                write!(
                    f,
                    "Dimension mismatch for {}: expected {}, got {}",
                    context, expected, actual
                )
            }
            InferenceError::NumericalInstability { timestep, role } => match timestep {
                Some(t) => write!(
                    f,
                    "Numerical instability at timestep {}: {} is not positive definite",
                    t, role
                ),
                None => write!(f, "Numerical instability: {} is not positive definite", role),
            },
            InferenceError::ModelMismatch { timestep } => {
                write!(
                    f,
                    "Observation at timestep {} has zero probability under the model",
                    timestep
                )
            }
            InferenceError::InvalidProbability { context, row, sum } => {
                write!(
                    f,
                    "Invalid probabilities in {} (row {}): entries must be non-negative and sum to 1, got sum {}",
                    context, row, sum
                )
            }
            InferenceError::NonFinite { context } => write!(f, "Non-finite value in {}", context),
            InferenceError::Configuration { description } => {
                write!(f, "Configuration error: {}", description)
            }
        }
    }
}

impl std::error::Error for InferenceError {}

/// Failure of an iterative fitting loop
///
/// Carries the parameters of the last completed iteration and the
/// log-probability trace up to the failure.
#[derive(Debug, Clone)]
pub struct FitError<P> {
    /// The error that aborted the loop
    pub source: InferenceError,
    /// Iteration at which the loop aborted
    pub iteration: usize,
    /// Last parameters that passed through a full iteration
    pub params: P,
    /// Log-probabilities recorded before the failure
    pub log_probs: Vec<f64>,
}

impl<P> FitError<P> {
    /// Drop the partial results and keep only the underlying error
    pub fn into_inner(self) -> InferenceError {
        self.source
    }
}

impl<P> fmt::Display for FitError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fitting aborted at iteration {} after {} recorded values: {}",
            self.iteration,
            self.log_probs.len(),
            self.source
        )
    }
}

impl<P: fmt::Debug> std::error::Error for FitError<P> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Result type for inference operations
pub type Result<T> = std::result::Result<T, InferenceError>;
