//! Configuration types for inference and learning
//!
//! Numerical safeguards live in [`NumericConfig`] and are carried by the model
//! objects; the fitting loops take an [`EmConfig`] or a [`GibbsConfig`]. All
//! of them serialize with serde so a run can be reproduced from a stored
//! configuration. A [`CancellationToken`] is runtime-only state and is skipped.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::common::constants::{DEFAULT_JITTER, DEFAULT_PROBABILITY_TOLERANCE};
use crate::errors::{InferenceError, Result};

/// Numerical safeguards shared by every routine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericConfig {
    /// Diagonal jitter for the one retry of a failed Cholesky factorization
    pub jitter: f64,
    /// Allowed deviation from one when validating probability rows
    pub probability_tolerance: f64,
}

impl NumericConfig {
    /// Create a new numeric configuration
    pub fn new(jitter: f64, probability_tolerance: f64) -> Self {
        Self {
            jitter,
            probability_tolerance,
        }
    }

    /// Check that both tolerances are positive and finite
    pub fn validate(&self) -> Result<()> {
        if !(self.jitter > 0.0) || !self.jitter.is_finite() {
            return Err(InferenceError::configuration(format!(
                "jitter must be positive and finite, got {}",
                self.jitter
            )));
        }
        if !(self.probability_tolerance > 0.0) || !self.probability_tolerance.is_finite() {
            return Err(InferenceError::configuration(format!(
                "probability tolerance must be positive and finite, got {}",
                self.probability_tolerance
            )));
        }
        Ok(())
    }
}

impl Default for NumericConfig {
    fn default() -> Self {
        Self::new(DEFAULT_JITTER, DEFAULT_PROBABILITY_TOLERANCE)
    }
}

/// Cooperative cancellation flag
///
/// Cloned tokens share the flag. Fitting loops check it between iterations
/// only, so an iteration that has started always completes.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Configuration of an EM run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmConfig {
    /// Number of EM iterations
    pub num_iters: usize,
    /// Optional early stop on relative improvement
    ///
    /// Stops once `|ℓ_i − ℓ_{i−1}| / (1 + |ℓ_{i−1}|) ≤ tolerance`. `None` runs
    /// exactly `num_iters` iterations.
    pub tolerance: Option<f64>,
    /// Keep the parameters of every iteration
    pub keep_history: bool,
    /// Checked before each iteration
    #[serde(skip)]
    pub cancellation: Option<CancellationToken>,
}

impl EmConfig {
    /// Fixed number of iterations, no early stop
    pub fn fixed(num_iters: usize) -> Self {
        Self {
            num_iters,
            ..Self::default()
        }
    }

    /// Enable the relative-improvement stop
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Attach a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Drop the per-iteration parameter history
    pub fn without_history(mut self) -> Self {
        self.keep_history = false;
        self
    }

    /// Whether the attached token (if any) was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(tol) = self.tolerance {
            if !(tol >= 0.0) || !tol.is_finite() {
                return Err(InferenceError::configuration(format!(
                    "EM tolerance must be non-negative and finite, got {}",
                    tol
                )));
            }
        }
        Ok(())
    }
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            num_iters: 50,
            tolerance: None,
            keep_history: true,
            cancellation: None,
        }
    }
}

/// Configuration of a blocked Gibbs run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GibbsConfig {
    /// Number of sweeps (one parameter draw per sweep)
    pub sample_size: usize,
    /// Checked before each sweep
    #[serde(skip)]
    pub cancellation: Option<CancellationToken>,
}

impl GibbsConfig {
    /// Create a configuration drawing `sample_size` samples
    pub fn new(sample_size: usize) -> Self {
        Self {
            sample_size,
            cancellation: None,
        }
    }

    /// Attach a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Whether the attached token (if any) was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

impl Default for GibbsConfig {
    fn default() -> Self {
        Self::new(500)
    }
}
