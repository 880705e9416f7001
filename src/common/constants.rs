//! Numerical constants used throughout the inference routines
//!
//! These are defaults. Anything a caller may reasonably want to tune is also
//! exposed through [`NumericConfig`](crate::config::NumericConfig).

/// `ln(2π)`, used by every Gaussian log density.
pub const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Default diagonal jitter for the single retry of a failed Cholesky factorization
///
/// Added as `jitter · I` after re-symmetrizing the matrix. Only one retry is
/// attempted; a second failure is reported as numerical instability.
pub const DEFAULT_JITTER: f64 = 1e-9;

/// Default tolerance when checking that a probability vector sums to one
pub const DEFAULT_PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Relative tolerance below which an EM log-probability decrease is treated as
/// round-off rather than a non-monotone step
///
/// Compared against `1 + |previous|`.
pub const MONOTONICITY_TOLERANCE: f64 = 1e-6;

/// Eigenvalues below `-PSD_EIGEN_TOLERANCE · max(1, |λ_max|)` mark a matrix as
/// not positive semi-definite
pub const PSD_EIGEN_TOLERANCE: f64 = 1e-10;
