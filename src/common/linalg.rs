//! Linear algebra utilities
//!
//! Cholesky-based solves with a single jitter retry, PSD regularization,
//! Gaussian log densities and multivariate normal sampling shared by the
//! Kalman recursions, the samplers and the conjugate updates.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn, SymmetricEigen};
use rand::Rng;
use rand_distr::StandardNormal;

use super::constants::{LN_2PI, PSD_EIGEN_TOLERANCE};

/// Return `(M + Mᵀ) / 2`
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// True when every entry is finite
pub fn all_finite(m: &DMatrix<f64>) -> bool {
    m.iter().all(|v| v.is_finite())
}

/// True when every entry of the vector is finite
pub fn all_finite_vector(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Cholesky factorization with one recovery attempt
///
/// On failure the matrix is re-symmetrized and `jitter · I` is added before a
/// second and last attempt. Non-finite input is never factorized.
///
/// # Arguments
/// * `m` - Symmetric matrix to factorize
/// * `jitter` - Diagonal term added on the retry
///
/// # Returns
/// The factorization, or `None` when both attempts fail
pub fn cholesky_with_retry(m: &DMatrix<f64>, jitter: f64) -> Option<Cholesky<f64, Dyn>> {
    if !all_finite(m) {
        return None;
    }
    if let Some(chol) = m.clone().cholesky() {
        return Some(chol);
    }

    let n = m.nrows();
    let retried = symmetrize(m) + DMatrix::identity(n, n) * jitter;
    let chol = retried.cholesky();
    if chol.is_some() {
        log::warn!(
            "Cholesky factorization of a {}x{} matrix needed jitter {:e}",
            n,
            n,
            jitter
        );
    }
    chol
}

/// Log-determinant from a Cholesky factor: `2 Σ ln L_ii`
pub fn log_det(chol: &Cholesky<f64, Dyn>) -> f64 {
    2.0 * chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>()
}

/// Solve `A X = B` for symmetric positive-definite `A`
///
/// Uses [`cholesky_with_retry`]; `None` if `A` cannot be factorized.
pub fn solve_psd(a: &DMatrix<f64>, b: &DMatrix<f64>, jitter: f64) -> Option<DMatrix<f64>> {
    cholesky_with_retry(a, jitter).map(|chol| chol.solve(b))
}

/// Gaussian log density of a residual under a factorized covariance
///
/// # Arguments
/// * `residual` - `x − μ`
/// * `chol` - Cholesky factor of the covariance
///
/// # Returns
/// `−½ (n ln 2π + ln|Σ| + rᵀ Σ⁻¹ r)`
pub fn log_gaussian_density(residual: &DVector<f64>, chol: &Cholesky<f64, Dyn>) -> f64 {
    let n = residual.len() as f64;
    let solved = chol.solve(residual);
    let mahalanobis = residual.dot(&solved);
    -0.5 * (n * LN_2PI + log_det(chol) + mahalanobis)
}

/// Project a symmetric matrix onto the PSD cone
///
/// Symmetrizes the input. When an eigenvalue is negative beyond round-off,
/// every negative eigenvalue is clamped to zero and the matrix rebuilt.
///
/// # Returns
/// Tuple of (regularized matrix, whether the eigenvalues were clamped)
pub fn clamp_psd(m: &DMatrix<f64>) -> (DMatrix<f64>, bool) {
    let sym = symmetrize(m);
    if sym.nrows() == 0 || sym.clone().cholesky().is_some() {
        return (sym, false);
    }

    let eig = SymmetricEigen::new(sym.clone());
    let scale = eig.eigenvalues.amax().max(1.0);
    let min = eig.eigenvalues.min();
    if min >= -PSD_EIGEN_TOLERANCE * scale {
        return (sym, false);
    }

    let clamped = eig.eigenvalues.map(|v| v.max(0.0));
    let rebuilt =
        &eig.eigenvectors * DMatrix::from_diagonal(&clamped) * eig.eigenvectors.transpose();
    (symmetrize(&rebuilt), true)
}

/// Square-root factor `L` with `L Lᵀ = M` for a PSD matrix
///
/// Uses the Cholesky factor when it exists and falls back to the symmetric
/// eigendecomposition (negative eigenvalues clamped) for singular matrices,
/// such as a zero process noise.
pub fn psd_factor(m: &DMatrix<f64>) -> DMatrix<f64> {
    if let Some(chol) = m.clone().cholesky() {
        return chol.l();
    }
    let eig = SymmetricEigen::new(symmetrize(m));
    let roots = eig.eigenvalues.map(|v| v.max(0.0).sqrt());
    &eig.eigenvectors * DMatrix::from_diagonal(&roots)
}

/// Vector of independent standard normal draws
pub fn standard_normal_vector<R: Rng + ?Sized>(rng: &mut R, n: usize) -> DVector<f64> {
    DVector::from_fn(n, |_, _| rng.sample::<f64, _>(StandardNormal))
}

/// Matrix of independent standard normal draws
pub fn standard_normal_matrix<R: Rng + ?Sized>(
    rng: &mut R,
    rows: usize,
    cols: usize,
) -> DMatrix<f64> {
    DMatrix::from_fn(rows, cols, |_, _| rng.sample::<f64, _>(StandardNormal))
}

/// Draw from `N(mean, cov)` for a PSD (possibly singular) covariance
pub fn sample_gaussian<R: Rng + ?Sized>(
    rng: &mut R,
    mean: &DVector<f64>,
    cov: &DMatrix<f64>,
) -> DVector<f64> {
    let factor = psd_factor(cov);
    let z = standard_normal_vector(rng, mean.len());
    mean + factor * z
}

/// Sub-matrix with the given rows and columns, in the given order
pub fn select(m: &DMatrix<f64>, rows: &[usize], cols: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), cols.len(), |i, j| m[(rows[i], cols[j])])
}

/// Sub-matrix with the given rows and all columns
pub fn select_rows(m: &DMatrix<f64>, rows: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), m.ncols(), |i, j| m[(rows[i], j)])
}

/// Sub-matrix with all rows and the given columns
pub fn select_columns(m: &DMatrix<f64>, cols: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), cols.len(), |i, j| m[(i, cols[j])])
}

/// Sub-vector with the given entries
pub fn select_entries(v: &DVector<f64>, idx: &[usize]) -> DVector<f64> {
    DVector::from_fn(idx.len(), |i, _| v[idx[i]])
}
