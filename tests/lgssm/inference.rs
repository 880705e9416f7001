//! Kalman filter and RTS smoother against closed-form posteriors

use nalgebra::{DMatrix, DVector};

use ssm_inference::common::constants::LN_2PI;
use ssm_inference::lgssm::Lgssm;
use ssm_inference::{InferenceError, RngKey};

use crate::helpers::assertions::{assert_dmatrix_close, assert_dvector_close, assert_scalar_close};
use crate::helpers::fixtures::{
    regression_data, regression_model, scalar_model, scalar_sequence,
};

/// Exact posterior of a scalar model by conditioning the joint Gaussian of
/// all states and all observed emissions
struct JointPosterior {
    mean: DVector<f64>,
    cov: DMatrix<f64>,
    loglik: f64,
}

fn joint_posterior(f: f64, q: f64, h: f64, r: f64, m0: f64, p0: f64, ys: &[f64]) -> JointPosterior {
    let n = ys.len();
    let mut prior_mean = DVector::zeros(n);
    let mut var = vec![0.0; n];
    prior_mean[0] = m0;
    var[0] = p0;
    for t in 1..n {
        prior_mean[t] = f * prior_mean[t - 1];
        var[t] = f * f * var[t - 1] + q;
    }
    // Cov(x_s, x_t) = f^{t-s} Var(x_s) for s ≤ t
    let sxx = DMatrix::from_fn(n, n, |s, t| {
        let (lo, hi) = (s.min(t), s.max(t));
        f.powi((hi - lo) as i32) * var[lo]
    });

    let observed: Vec<usize> = (0..n).filter(|&t| !ys[t].is_nan()).collect();
    let k = observed.len();
    let sxy = DMatrix::from_fn(n, k, |s, j| h * sxx[(s, observed[j])]);
    let syy = DMatrix::from_fn(k, k, |i, j| {
        h * h * sxx[(observed[i], observed[j])] + if i == j { r } else { 0.0 }
    });
    let resid = DVector::from_fn(k, |i, _| ys[observed[i]] - h * prior_mean[observed[i]]);

    let chol = syy.cholesky().unwrap();
    let gain = chol.solve(&sxy.transpose()).transpose();
    let mean = &prior_mean + &gain * &resid;
    let cov = &sxx - &gain * sxy.transpose();
    let log_det: f64 = chol.l().diagonal().iter().map(|d| 2.0 * d.ln()).sum();
    let loglik = -0.5 * (k as f64 * LN_2PI + log_det + resid.dot(&chol.solve(&resid)));

    JointPosterior { mean, cov, loglik }
}

#[test]
fn test_smoother_matches_joint_gaussian() {
    let (f, q, h, r, m0, p0) = (0.9, 0.4, 1.5, 0.7, 0.3, 2.0);
    let ys = [0.8, 1.1, -0.2, f64::NAN, 0.4, 1.9, 2.2, 1.0];
    let params = scalar_model(f, q, h, r, m0, p0);
    let post = Lgssm::default()
        .smoother(&params, &scalar_sequence(&ys))
        .unwrap();
    let exact = joint_posterior(f, q, h, r, m0, p0, &ys);

    assert_scalar_close(post.marginal_loglik(), exact.loglik, 1e-9, "marginal loglik");
    for t in 0..ys.len() {
        assert_scalar_close(post.smoothed_means[t][0], exact.mean[t], 1e-9, &format!("mean t={}", t));
        assert_scalar_close(
            post.smoothed_covariances[t][(0, 0)],
            exact.cov[(t, t)],
            1e-9,
            &format!("cov t={}", t),
        );
    }
    for t in 0..ys.len() - 1 {
        assert_scalar_close(
            post.smoothed_cross_covariances[t][(0, 0)],
            exact.cov[(t, t + 1)],
            1e-9,
            &format!("cross cov t={}", t),
        );
    }
}

#[test]
fn test_filter_matches_prefix_posteriors() {
    let (f, q, h, r, m0, p0) = (1.0, 0.2, 1.0, 0.5, 0.0, 1.0);
    let ys = [0.3, 0.1, f64::NAN, f64::NAN, 0.9, 1.4];
    let params = scalar_model(f, q, h, r, m0, p0);
    let filtered = Lgssm::default()
        .filter(&params, &scalar_sequence(&ys))
        .unwrap();

    for t in 0..ys.len() {
        let exact = joint_posterior(f, q, h, r, m0, p0, &ys[..=t]);
        assert_scalar_close(filtered.filtered_means[t][0], exact.mean[t], 1e-9, "filtered mean");
        assert_scalar_close(
            filtered.filtered_covariances[t][(0, 0)],
            exact.cov[(t, t)],
            1e-9,
            "filtered cov",
        );
    }
    assert_scalar_close(
        filtered.marginal_loglik,
        joint_posterior(f, q, h, r, m0, p0, &ys).loglik,
        1e-9,
        "marginal loglik",
    );
}

#[test]
fn test_all_missing_propagates_prior() {
    let params = scalar_model(0.5, 1.0, 1.0, 1.0, 4.0, 1.0);
    let post = Lgssm::default()
        .smoother(&params, &scalar_sequence(&[f64::NAN; 4]))
        .unwrap();
    assert_eq!(post.marginal_loglik(), 0.0);
    let expected_means = [4.0, 2.0, 1.0, 0.5];
    let expected_vars = [1.0, 1.25, 1.3125, 1.328125];
    for t in 0..4 {
        assert_scalar_close(post.smoothed_means[t][0], expected_means[t], 1e-12, "mean");
        assert_scalar_close(post.smoothed_covariances[t][(0, 0)], expected_vars[t], 1e-12, "var");
    }
}

#[test]
fn test_bayesian_linear_regression() {
    let (xs, ys) = regression_data();
    let prior_var = 10.0;
    let params = regression_model(&xs, prior_var, 1.0);
    let post = Lgssm::default()
        .smoother(&params, &scalar_sequence(&ys))
        .unwrap();

    // Posterior of β given y = Xβ + ε
    let design = DMatrix::from_fn(xs.len(), 2, |i, j| if j == 0 { 1.0 } else { xs[i] });
    let y = DVector::from_column_slice(&ys);
    let precision = DMatrix::identity(2, 2) / prior_var + design.transpose() * &design;
    let cov = precision.clone().try_inverse().unwrap();
    let mean = &cov * (design.transpose() * &y);

    for t in 0..xs.len() {
        assert_dvector_close(&post.smoothed_means[t], &mean, 1e-8, "smoothed β");
        assert_dmatrix_close(&post.smoothed_covariances[t], &cov, 1e-8, "smoothed cov");
    }
    assert_dvector_close(&post.filtered.filtered_means[xs.len() - 1], &mean, 1e-8, "filtered β");

    // y ~ N(0, prior_var X Xᵀ + I)
    let marginal = &design * design.transpose() * prior_var + DMatrix::identity(xs.len(), xs.len());
    let chol = marginal.cholesky().unwrap();
    let log_det: f64 = chol.l().diagonal().iter().map(|d| 2.0 * d.ln()).sum();
    let expected = -0.5 * (xs.len() as f64 * LN_2PI + log_det + y.dot(&chol.solve(&y)));
    assert_scalar_close(post.marginal_loglik(), expected, 1e-8, "evidence");
}

#[test]
fn test_time_varying_weights_must_cover_sequence() {
    let (xs, ys) = regression_data();
    let params = regression_model(&xs[..10], 10.0, 1.0);
    let err = Lgssm::default()
        .filter(&params, &scalar_sequence(&ys))
        .unwrap_err();
    assert!(matches!(err, InferenceError::DimensionMismatch { .. }));
}

#[test]
fn test_posterior_samples_respect_missing_steps() {
    // a missing step is smoothed from its neighbours, not from the data
    let params = scalar_model(1.0, 0.01, 1.0, 0.01, 0.0, 10.0);
    let seq = scalar_sequence(&[1.0, f64::NAN, 1.0]);
    let model = Lgssm::default();
    let post = model.smoother(&params, &seq).unwrap();

    let mut key = RngKey::new(21);
    let mut total = 0.0;
    let num_samples = 500;
    for _ in 0..num_samples {
        let (states, next) = model.posterior_sample(key, &params, &seq).unwrap();
        key = next;
        total += states[1][0];
    }
    let sd = post.smoothed_covariances[1][(0, 0)].sqrt();
    assert_scalar_close(
        total / num_samples as f64,
        post.smoothed_means[1][0],
        5.0 * sd / (num_samples as f64).sqrt(),
        "sampled mean at the missing step",
    );
    assert_scalar_close(post.smoothed_means[1][0], 1.0, 0.05, "smoothed mean at the missing step");
}
