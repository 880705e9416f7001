//! Parameters, parameter properties and observations of a discrete HMM

use nalgebra::{DMatrix, DVector};
use statrs::function::gamma::ln_gamma;

use crate::common::conjugate::DirichletPrior;
use crate::common::constants::DEFAULT_PROBABILITY_TOLERANCE;
use crate::errors::{InferenceError, Result};

// ============================================================================
// Parameters
// ============================================================================

/// Parameters of a hidden Markov model with `K` states and `C` emission classes
#[derive(Debug, Clone, PartialEq)]
pub struct HmmParams {
    /// `π` (`K`)
    pub initial_probs: DVector<f64>,
    /// `A[i, j] = p(z_{t+1} = j | z_t = i)` (`K × K`)
    pub transition_matrix: DMatrix<f64>,
    /// `B[k, c] = p(class c | z = k)` (`K × C`)
    pub emission_probs: DMatrix<f64>,
}

impl HmmParams {
    /// Create parameters, validated with the default probability tolerance
    pub fn new(
        initial_probs: DVector<f64>,
        transition_matrix: DMatrix<f64>,
        emission_probs: DMatrix<f64>,
    ) -> Result<Self> {
        let params = Self {
            initial_probs,
            transition_matrix,
            emission_probs,
        };
        params.validate(DEFAULT_PROBABILITY_TOLERANCE)?;
        Ok(params)
    }

    /// Uniform initial and emission distributions with a sticky transition
    /// matrix that stays in the same state with probability `stickiness`
    pub fn sticky(num_states: usize, num_classes: usize, stickiness: f64) -> Result<Self> {
        if num_states == 0 || num_classes == 0 {
            return Err(InferenceError::configuration(
                "an HMM needs at least one state and one emission class",
            ));
        }
        let transition_matrix = if num_states == 1 {
            DMatrix::identity(1, 1)
        } else {
            let off = (1.0 - stickiness) / (num_states - 1) as f64;
            DMatrix::from_fn(num_states, num_states, |i, j| {
                if i == j {
                    stickiness
                } else {
                    off
                }
            })
        };
        Self::new(
            DVector::from_element(num_states, 1.0 / num_states as f64),
            transition_matrix,
            DMatrix::from_element(num_states, num_classes, 1.0 / num_classes as f64),
        )
    }

    /// Number of hidden states `K`
    #[inline]
    pub fn num_states(&self) -> usize {
        self.initial_probs.len()
    }

    /// Number of emission classes `C`
    #[inline]
    pub fn num_classes(&self) -> usize {
        self.emission_probs.ncols()
    }

    /// Check shapes, signs and row sums
    ///
    /// # Errors
    /// `DimensionMismatch` for inconsistent shapes and `InvalidProbability`
    /// for a negative entry or a row whose sum is more than `tolerance` away
    /// from one.
    pub fn validate(&self, tolerance: f64) -> Result<()> {
        let k = self.num_states();
        if k == 0 {
            return Err(InferenceError::configuration("an HMM needs at least one state"));
        }
        if self.transition_matrix.shape() != (k, k) {
            return Err(InferenceError::dimension(
                k,
                self.transition_matrix.nrows(),
                "transition matrix",
            ));
        }
        if self.emission_probs.nrows() != k {
            return Err(InferenceError::dimension(
                k,
                self.emission_probs.nrows(),
                "emission probability rows",
            ));
        }

        check_row(self.initial_probs.iter(), "initial probabilities", 0, tolerance)?;
        for (i, row) in self.transition_matrix.row_iter().enumerate() {
            check_row(row.iter(), "transition matrix", i, tolerance)?;
        }
        for (i, row) in self.emission_probs.row_iter().enumerate() {
            check_row(row.iter(), "emission probabilities", i, tolerance)?;
        }
        Ok(())
    }
}

fn check_row<'a>(
    row: impl Iterator<Item = &'a f64>,
    context: &str,
    index: usize,
    tolerance: f64,
) -> Result<()> {
    let mut sum = 0.0;
    let mut valid = true;
    for &p in row {
        valid &= p >= 0.0 && p.is_finite();
        sum += p;
    }
    if !valid || (sum - 1.0).abs() > tolerance {
        return Err(InferenceError::InvalidProbability {
            context: context.to_string(),
            row: index,
            sum,
        });
    }
    Ok(())
}

// ============================================================================
// Parameter properties
// ============================================================================

/// Trainability and optional Dirichlet prior of one probability block
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityProps {
    /// Learn this block
    pub trainable: bool,
    /// Row-wise Dirichlet prior
    pub prior: Option<DirichletPrior>,
}

impl ProbabilityProps {
    /// Trainable, no prior
    pub fn trainable() -> Self {
        Self {
            trainable: true,
            prior: None,
        }
    }

    /// Not trainable
    pub fn frozen() -> Self {
        Self {
            trainable: false,
            prior: None,
        }
    }

    /// Attach a prior
    pub fn with_prior(mut self, prior: DirichletPrior) -> Self {
        self.prior = Some(prior);
        self
    }
}

/// Trainability masks and priors for every block of an HMM
///
/// The initial-distribution prior has a single row of `K` concentrations.
#[derive(Debug, Clone, PartialEq)]
pub struct HmmProps {
    /// Initial distribution
    pub initial: ProbabilityProps,
    /// Transition matrix
    pub transitions: ProbabilityProps,
    /// Emission probabilities
    pub emissions: ProbabilityProps,
}

impl HmmProps {
    /// Everything trainable, no priors
    pub fn trainable() -> Self {
        Self {
            initial: ProbabilityProps::trainable(),
            transitions: ProbabilityProps::trainable(),
            emissions: ProbabilityProps::trainable(),
        }
    }

    /// Everything trainable with symmetric Dirichlet priors of concentration `alpha`
    pub fn with_symmetric_priors(
        num_states: usize,
        num_classes: usize,
        alpha: f64,
    ) -> Result<Self> {
        Ok(Self {
            initial: ProbabilityProps::trainable()
                .with_prior(DirichletPrior::symmetric(1, num_states, alpha)?),
            transitions: ProbabilityProps::trainable()
                .with_prior(DirichletPrior::symmetric(num_states, num_states, alpha)?),
            emissions: ProbabilityProps::trainable()
                .with_prior(DirichletPrior::symmetric(num_states, num_classes, alpha)?),
        })
    }

    /// Check that every prior is well formed and matches the dimensions of `params`
    pub fn validate(&self, params: &HmmParams) -> Result<()> {
        let k = params.num_states();
        let c = params.num_classes();
        check_prior(&self.initial.prior, (1, k), "initial prior")?;
        check_prior(&self.transitions.prior, (k, k), "transition prior")?;
        check_prior(&self.emissions.prior, (k, c), "emission prior")
    }
}

impl Default for HmmProps {
    fn default() -> Self {
        Self::trainable()
    }
}

fn check_prior(
    prior: &Option<DirichletPrior>,
    shape: (usize, usize),
    context: &str,
) -> Result<()> {
    if let Some(prior) = prior {
        prior.validate()?;
        let (rows, cols) = prior.concentration.shape();
        if rows != shape.0 {
            return Err(InferenceError::dimension(shape.0, rows, format!("{} rows", context)));
        }
        if cols != shape.1 {
            return Err(InferenceError::dimension(shape.1, cols, format!("{} columns", context)));
        }
    }
    Ok(())
}

// ============================================================================
// Observations
// ============================================================================

/// One observation sequence of a discrete HMM
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscreteObservations {
    /// One class index per timestep
    Categorical(Vec<usize>),
    /// One vector of class counts per timestep
    Multinomial(Vec<Vec<u32>>),
}

impl DiscreteObservations {
    /// Number of timesteps
    pub fn len(&self) -> usize {
        match self {
            DiscreteObservations::Categorical(ys) => ys.len(),
            DiscreteObservations::Multinomial(ys) => ys.len(),
        }
    }

    /// Whether the sequence has no timesteps
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check class indices or count-vector lengths against `num_classes`
    pub fn validate(&self, num_classes: usize) -> Result<()> {
        match self {
            DiscreteObservations::Categorical(ys) => {
                if let Some(&bad) = ys.iter().find(|&&y| y >= num_classes) {
                    return Err(InferenceError::dimension(
                        num_classes,
                        bad,
                        "categorical observation index",
                    ));
                }
            }
            DiscreteObservations::Multinomial(ys) => {
                if let Some(bad) = ys.iter().find(|y| y.len() != num_classes) {
                    return Err(InferenceError::dimension(
                        num_classes,
                        bad.len(),
                        "multinomial count vector",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Emission log-likelihoods `ln p(y_t | z_t = k)` as a `T × K` matrix
    ///
    /// Multinomial observations include the multinomial coefficient. A class
    /// with zero count contributes nothing even where its probability is zero.
    pub fn log_likelihoods(&self, emission_probs: &DMatrix<f64>) -> DMatrix<f64> {
        let k = emission_probs.nrows();
        match self {
            DiscreteObservations::Categorical(ys) => {
                DMatrix::from_fn(ys.len(), k, |t, s| emission_probs[(s, ys[t])].ln())
            }
            DiscreteObservations::Multinomial(ys) => {
                let coefficients: Vec<f64> = ys
                    .iter()
                    .map(|y| log_multinomial_coefficient(y))
                    .collect();
                DMatrix::from_fn(ys.len(), k, |t, s| {
                    let mut ll = coefficients[t];
                    for (c, &n) in ys[t].iter().enumerate() {
                        if n > 0 {
                            ll += f64::from(n) * emission_probs[(s, c)].ln();
                        }
                    }
                    ll
                })
            }
        }
    }

    /// Class counts observed at timestep `t` (`C`)
    pub(crate) fn counts(&self, t: usize, num_classes: usize) -> DVector<f64> {
        match self {
            DiscreteObservations::Categorical(ys) => {
                let mut counts = DVector::zeros(num_classes);
                counts[ys[t]] = 1.0;
                counts
            }
            DiscreteObservations::Multinomial(ys) => {
                DVector::from_iterator(num_classes, ys[t].iter().map(|&n| f64::from(n)))
            }
        }
    }
}

impl From<Vec<usize>> for DiscreteObservations {
    fn from(ys: Vec<usize>) -> Self {
        DiscreteObservations::Categorical(ys)
    }
}

/// `ln (N! / Π n_c!)`
fn log_multinomial_coefficient(counts: &[u32]) -> f64 {
    let total: u32 = counts.iter().sum();
    ln_gamma(f64::from(total) + 1.0)
        - counts
            .iter()
            .map(|&n| ln_gamma(f64::from(n) + 1.0))
            .sum::<f64>()
}
