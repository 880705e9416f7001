//! Conjugate priors
//!
//! The Matrix-Normal-Inverse-Wishart (MNIW) prior covers every Gaussian
//! regression block of a linear-Gaussian SSM. The Normal-Inverse-Wishart
//! prior of the initial state is the one-column special case. Categorical
//! parameters use row-wise Dirichlet priors.
//!
//! Priors are always given explicitly by the caller; nothing here is inferred
//! from data.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{ChiSquared, Distribution, StandardNormal};
use statrs::function::gamma::ln_gamma;
use std::f64::consts::{LN_2, PI};

use super::constants::LN_2PI;
use super::linalg::{
    all_finite, cholesky_with_retry, clamp_psd, log_det, select, select_columns,
    standard_normal_matrix, symmetrize,
};
use crate::errors::{InferenceError, MatrixRole, Result};

/// `ln Γ_p(a)`, the log of the multivariate gamma function
pub fn ln_multivariate_gamma(a: f64, p: usize) -> f64 {
    let p_f = p as f64;
    p_f * (p_f - 1.0) / 4.0 * PI.ln() + (0..p).map(|j| ln_gamma(a - j as f64 / 2.0)).sum::<f64>()
}

// ============================================================================
// Inverse-Wishart
// ============================================================================

/// Draw `Σ ~ IW(df, scale)` with the Bartlett decomposition
///
/// With `Ψ = U Uᵀ` and the Bartlett factor `A`, `Σ = (U A⁻ᵀ)(U A⁻ᵀ)ᵀ`, which
/// avoids forming any explicit inverse.
pub fn sample_inverse_wishart<R: Rng + ?Sized>(
    rng: &mut R,
    df: f64,
    scale: &DMatrix<f64>,
    jitter: f64,
) -> Result<DMatrix<f64>> {
    let p = scale.nrows();
    if df <= p as f64 - 1.0 {
        return Err(InferenceError::configuration(format!(
            "inverse-Wishart degrees of freedom {} must exceed dimension - 1 = {}",
            df,
            p as f64 - 1.0
        )));
    }
    let u = cholesky_with_retry(scale, jitter)
        .ok_or_else(|| InferenceError::instability(MatrixRole::InverseWishartScale))?
        .l();

    let mut a = DMatrix::<f64>::zeros(p, p);
    for i in 0..p {
        let chi2 = ChiSquared::new(df - i as f64)
            .map_err(|e| InferenceError::configuration(format!("chi-squared draw: {}", e)))?;
        a[(i, i)] = chi2.sample(rng).sqrt();
        for j in 0..i {
            a[(i, j)] = rng.sample::<f64, _>(StandardNormal);
        }
    }

    let a_inv_t = a
        .transpose()
        .solve_upper_triangular(&DMatrix::identity(p, p))
        .ok_or_else(|| InferenceError::instability(MatrixRole::InverseWishartScale))?;
    let b = u * a_inv_t;
    Ok(symmetrize(&(&b * b.transpose())))
}

/// Log density of `IW(Σ | df, scale)`
pub fn inverse_wishart_log_prob(
    cov: &DMatrix<f64>,
    df: f64,
    scale: &DMatrix<f64>,
    jitter: f64,
) -> Result<f64> {
    let p = cov.nrows() as f64;
    let cov_chol = cholesky_with_retry(cov, jitter)
        .ok_or_else(|| InferenceError::instability(MatrixRole::ModelCovariance))?;
    let scale_chol = cholesky_with_retry(scale, jitter)
        .ok_or_else(|| InferenceError::instability(MatrixRole::InverseWishartScale))?;
    let trace = cov_chol.solve(scale).trace();

    Ok(0.5 * df * log_det(&scale_chol)
        - 0.5 * df * p * LN_2
        - ln_multivariate_gamma(0.5 * df, cov.nrows())
        - 0.5 * (df + p + 1.0) * log_det(&cov_chol)
        - 0.5 * trace)
}

// ============================================================================
// Matrix-Normal-Inverse-Wishart
// ============================================================================

/// Matrix-Normal-Inverse-Wishart prior over a regression block `y = W z + ε`
///
/// `Σ ~ IW(df, scale)` and `W | Σ ~ MN(loc, Σ, col_precision⁻¹)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixNormalInverseWishart {
    /// Prior mean of the weights (`output_dim × feature_dim`)
    pub loc: DMatrix<f64>,
    /// Precision across weight columns (`feature_dim × feature_dim`)
    pub col_precision: DMatrix<f64>,
    /// Inverse-Wishart degrees of freedom
    pub df: f64,
    /// Inverse-Wishart scale (`output_dim × output_dim`)
    pub scale: DMatrix<f64>,
}

impl MatrixNormalInverseWishart {
    /// Create a prior, validating shapes and the degrees of freedom
    pub fn new(
        loc: DMatrix<f64>,
        col_precision: DMatrix<f64>,
        df: f64,
        scale: DMatrix<f64>,
    ) -> Result<Self> {
        let (output_dim, feature_dim) = loc.shape();
        if col_precision.nrows() != feature_dim || col_precision.ncols() != feature_dim {
            return Err(InferenceError::dimension(
                feature_dim,
                col_precision.nrows(),
                "MNIW column precision",
            ));
        }
        if scale.nrows() != output_dim || scale.ncols() != output_dim {
            return Err(InferenceError::dimension(output_dim, scale.nrows(), "MNIW scale"));
        }
        if !(df > output_dim as f64 - 1.0) {
            return Err(InferenceError::configuration(format!(
                "MNIW degrees of freedom {} must exceed output dimension - 1",
                df
            )));
        }
        if !all_finite(&loc) || !all_finite(&col_precision) || !all_finite(&scale) {
            return Err(InferenceError::NonFinite {
                context: "MNIW prior".to_string(),
            });
        }
        if symmetrize(&scale).cholesky().is_none() {
            return Err(InferenceError::instability(MatrixRole::InverseWishartScale));
        }
        if feature_dim > 0 && symmetrize(&col_precision).cholesky().is_none() {
            return Err(InferenceError::instability(MatrixRole::PosteriorPrecision));
        }

        Ok(Self {
            loc,
            col_precision: symmetrize(&col_precision),
            df,
            scale: symmetrize(&scale),
        })
    }

    /// Normal-Inverse-Wishart prior over a mean and covariance
    ///
    /// `Σ ~ IW(df, scale)` and `μ | Σ ~ N(loc, Σ / mean_precision)`.
    pub fn normal_inverse_wishart(
        loc: DVector<f64>,
        mean_precision: f64,
        df: f64,
        scale: DMatrix<f64>,
    ) -> Result<Self> {
        let dim = loc.len();
        Self::new(
            DMatrix::from_column_slice(dim, 1, loc.as_slice()),
            DMatrix::from_element(1, 1, mean_precision),
            df,
            scale,
        )
    }

    /// Weakly informative prior: zero mean, identity precision and scale,
    /// `df = output_dim + 0.1`
    pub fn weak(output_dim: usize, feature_dim: usize) -> Self {
        Self {
            loc: DMatrix::zeros(output_dim, feature_dim),
            col_precision: DMatrix::identity(feature_dim, feature_dim),
            df: output_dim as f64 + 0.1,
            scale: DMatrix::identity(output_dim, output_dim),
        }
    }

    /// Number of rows of the weights
    pub fn output_dim(&self) -> usize {
        self.loc.nrows()
    }

    /// Number of columns of the weights
    pub fn feature_dim(&self) -> usize {
        self.loc.ncols()
    }

    /// Prior over a subset of the weight columns
    ///
    /// Used when some columns of a block are fixed: the remaining columns keep
    /// their prior mean and the matching block of the column precision.
    pub fn restrict(&self, cols: &[usize]) -> Self {
        Self {
            loc: select_columns(&self.loc, cols),
            col_precision: select(&self.col_precision, cols, cols),
            df: self.df,
            scale: self.scale.clone(),
        }
    }

    /// Conjugate posterior after observing regression moments
    ///
    /// # Arguments
    /// * `szz` - `Σ z zᵀ`
    /// * `syz` - `Σ y zᵀ`
    /// * `syy` - `Σ y yᵀ`
    /// * `count` - number of observations
    pub fn posterior(
        &self,
        szz: &DMatrix<f64>,
        syz: &DMatrix<f64>,
        syy: &DMatrix<f64>,
        count: f64,
        jitter: f64,
    ) -> Result<Self> {
        let precision = symmetrize(&(&self.col_precision + szz));
        let weighted = &self.loc * &self.col_precision + syz;
        let loc = if self.feature_dim() == 0 {
            DMatrix::zeros(self.output_dim(), 0)
        } else {
            cholesky_with_retry(&precision, jitter)
                .ok_or_else(|| InferenceError::instability(MatrixRole::PosteriorPrecision))?
                .solve(&weighted.transpose())
                .transpose()
        };

        let scale = &self.scale + syy + &self.loc * &self.col_precision * self.loc.transpose()
            - &loc * &precision * loc.transpose();
        let (scale, _) = clamp_psd(&scale);

        Ok(Self {
            loc,
            col_precision: precision,
            df: self.df + count,
            scale,
        })
    }

    /// Joint mode `(W, Σ)` of the distribution
    pub fn mode(&self) -> (DMatrix<f64>, DMatrix<f64>) {
        let denom = self.df + self.output_dim() as f64 + 1.0 + self.feature_dim() as f64;
        (self.loc.clone(), &self.scale / denom)
    }

    /// Draw `(W, Σ)`: first `Σ` from the inverse-Wishart, then `W` given `Σ`
    pub fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        jitter: f64,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
        let cov = sample_inverse_wishart(rng, self.df, &self.scale, jitter)?;
        let weights = self.sample_weights(rng, &cov, jitter)?;
        Ok((weights, cov))
    }

    /// Draw `W ~ MN(loc, Σ, col_precision⁻¹)` for a given row covariance
    pub fn sample_weights<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        cov: &DMatrix<f64>,
        jitter: f64,
    ) -> Result<DMatrix<f64>> {
        let (rows, cols) = self.loc.shape();
        if cols == 0 {
            return Ok(self.loc.clone());
        }
        let row_factor = cholesky_with_retry(cov, jitter)
            .ok_or_else(|| InferenceError::instability(MatrixRole::ModelCovariance))?
            .l();
        let col_chol = cholesky_with_retry(&self.col_precision, jitter)
            .ok_or_else(|| InferenceError::instability(MatrixRole::PosteriorPrecision))?;

        // Z C⁻¹ has column covariance (C Cᵀ)⁻¹ when Z is standard normal
        let z = standard_normal_matrix(rng, rows, cols);
        let z_c_inv = col_chol
            .l()
            .transpose()
            .solve_upper_triangular(&z.transpose())
            .ok_or_else(|| InferenceError::instability(MatrixRole::PosteriorPrecision))?
            .transpose();

        Ok(&self.loc + row_factor * z_c_inv)
    }

    /// Log density of the inverse-Wishart part at `Σ`
    pub fn cov_log_prob(&self, cov: &DMatrix<f64>, jitter: f64) -> Result<f64> {
        inverse_wishart_log_prob(cov, self.df, &self.scale, jitter)
    }

    /// Log density of the Matrix-Normal part at `W` given `Σ`
    pub fn weights_log_prob(
        &self,
        weights: &DMatrix<f64>,
        cov: &DMatrix<f64>,
        jitter: f64,
    ) -> Result<f64> {
        let (p, q) = self.loc.shape();
        if q == 0 {
            return Ok(0.0);
        }
        let cov_chol = cholesky_with_retry(cov, jitter)
            .ok_or_else(|| InferenceError::instability(MatrixRole::ModelCovariance))?;
        let precision_chol = cholesky_with_retry(&self.col_precision, jitter)
            .ok_or_else(|| InferenceError::instability(MatrixRole::PosteriorPrecision))?;
        let diff = weights - &self.loc;
        let quad = (&self.col_precision * diff.transpose() * cov_chol.solve(&diff)).trace();

        Ok(-0.5 * (p * q) as f64 * LN_2PI - 0.5 * q as f64 * log_det(&cov_chol)
            + 0.5 * p as f64 * log_det(&precision_chol)
            - 0.5 * quad)
    }

    /// Joint log density at `(W, Σ)`
    pub fn log_prob(&self, weights: &DMatrix<f64>, cov: &DMatrix<f64>, jitter: f64) -> Result<f64> {
        Ok(self.cov_log_prob(cov, jitter)? + self.weights_log_prob(weights, cov, jitter)?)
    }
}

// ============================================================================
// Dirichlet
// ============================================================================

/// Row-wise Dirichlet prior: row `i` of a probability matrix has
/// concentration `concentration.row(i)`
#[derive(Debug, Clone, PartialEq)]
pub struct DirichletPrior {
    /// Concentration parameters, one row per probability vector
    pub concentration: DMatrix<f64>,
}

impl DirichletPrior {
    /// Create a prior; every concentration must be finite and at least 1
    ///
    /// The row-wise MAP update `counts + α − 1` has an interior mode only for
    /// `α ≥ 1`; smaller concentrations put the mode on the simplex boundary
    /// where the log density is unbounded.
    pub fn new(concentration: DMatrix<f64>) -> Result<Self> {
        let prior = Self { concentration };
        prior.validate()?;
        Ok(prior)
    }

    /// Check that every concentration is finite and at least 1
    pub fn validate(&self) -> Result<()> {
        if self.concentration.iter().any(|&a| !(a >= 1.0) || !a.is_finite()) {
            return Err(InferenceError::configuration(
                "Dirichlet concentrations must be finite and at least 1",
            ));
        }
        Ok(())
    }

    /// Same concentration for every entry
    pub fn symmetric(rows: usize, cols: usize, alpha: f64) -> Result<Self> {
        Self::new(DMatrix::from_element(rows, cols, alpha))
    }

    /// Log density of each row of `probs`, summed
    pub fn log_prob(&self, probs: &DMatrix<f64>) -> f64 {
        let mut lp = 0.0;
        for (alpha, p) in self.concentration.row_iter().zip(probs.row_iter()) {
            let total: f64 = alpha.sum();
            lp += ln_gamma(total) - alpha.iter().map(|&a| ln_gamma(a)).sum::<f64>();
            for (&a, &pi) in alpha.iter().zip(p.iter()) {
                if a != 1.0 {
                    lp += (a - 1.0) * pi.ln();
                }
            }
        }
        lp
    }
}
