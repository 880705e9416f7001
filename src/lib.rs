/*!
# ssm-inference - State-space model inference and learning

Exact inference and parameter learning for two families of state-space
models over discrete time.

## Features

- Linear-Gaussian SSMs: Kalman filter, RTS smoother, parallel-in-time
  associative-scan filter and smoother, forward-filter backward-sample
- Discrete HMMs: scaled forward-backward and its associative-scan form,
  Viterbi, posterior path sampling
- Learning: generic EM driver with conjugate MAP M-steps, blocked Gibbs
  sampling for linear-Gaussian SSMs
- Missing emission components, time-varying emission weights and exogenous
  inputs
- Splittable random keys, so every draw is reproducible from a seed

## Modules

- [`lgssm`] - Linear-Gaussian state-space models
- [`hmm`] - Discrete hidden Markov models
- [`em`] - Model-agnostic EM loop
- [`common`] - Linear algebra, random keys, conjugate priors, constants,
  the shared associative scan
- [`config`] - Numerical, EM and Gibbs settings
- [`reporter`] - Callbacks from the fitting loops

## Example

```rust
use ssm_inference::common::rng::RngKey;
use ssm_inference::lgssm::{Lgssm, LgssmParams, LgssmProps};

let model = Lgssm::default();
let truth = LgssmParams::constant_velocity_1d(1.0, 0.1, 0.5);
let (data, _) = model.sample(RngKey::new(0), &truth, 100, None).unwrap();
let sequence = data.to_sequence();

// exact posterior
let posterior = model.smoother(&truth, &sequence).unwrap();
assert_eq!(posterior.len(), 100);

// learn from a perturbed starting point
let mut start = truth.clone();
start.emissions.cov *= 4.0;
let fit = model.fit_em(start, &LgssmProps::trainable(), &[sequence], 20).unwrap();
assert!(fit.log_probs[19] >= fit.log_probs[0]);
```
*/

// ============================================================================
// Core modules
// ============================================================================

/// Low-level utilities (linear algebra, RNG, priors, constants)
pub mod common;

/// Configuration of numerics, EM and Gibbs runs
pub mod config;

/// Generic expectation-maximization driver
pub mod em;

/// Error types
pub mod errors;

/// Observability for fitting loops
pub mod reporter;

/// Linear-Gaussian state-space models
pub mod lgssm;

/// Discrete hidden Markov models
pub mod hmm;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// Shared types
pub use common::conjugate::{DirichletPrior, MatrixNormalInverseWishart};
pub use common::rng::RngKey;
pub use config::{CancellationToken, EmConfig, GibbsConfig, NumericConfig};
pub use em::{fit_em, EmFit, EmModel, StopReason, SufficientStatistics};
pub use errors::{FitError, InferenceError, MatrixRole};
pub use reporter::{DebugReporter, FitReporter, LoggingReporter, NoOpReporter};

// Models
pub use hmm::{DiscreteHmm, DiscreteObservations, HmmParams, HmmProps};
pub use lgssm::{Lgssm, LgssmParams, LgssmProps, LgssmSequence};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
