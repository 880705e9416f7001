//! Parallel-in-time filter and smoother against the sequential recursions

use ssm_inference::lgssm::{Lgssm, LgssmSequence};
use ssm_inference::{InferenceError, RngKey};

use crate::helpers::assertions::{assert_dmatrices_close, assert_dvectors_close, assert_scalar_close};
use crate::helpers::fixtures::{random_model, regression_data, regression_model, scalar_sequence};

#[test]
fn test_parallel_smoother_matches_sequential_random_model() {
    let model = Lgssm::default();
    let params = random_model(7, 3, 4);
    // not a power of two, so the scan has ragged levels
    let (data, _) = model.sample(RngKey::new(8), &params, 257, None).unwrap();
    let seq = data.to_sequence();

    let sequential = model.smoother(&params, &seq).unwrap();
    let parallel = model.parallel_smoother(&params, &seq).unwrap();

    assert_scalar_close(
        parallel.marginal_loglik(),
        sequential.marginal_loglik(),
        1e-6,
        "marginal loglik",
    );
    assert_dvectors_close(
        &parallel.filtered.filtered_means,
        &sequential.filtered.filtered_means,
        1e-7,
        "filtered means",
    );
    assert_dmatrices_close(
        &parallel.filtered.filtered_covariances,
        &sequential.filtered.filtered_covariances,
        1e-7,
        "filtered covariances",
    );
    assert_dvectors_close(
        &parallel.filtered.predicted_means,
        &sequential.filtered.predicted_means,
        1e-7,
        "predicted means",
    );
    assert_dvectors_close(
        &parallel.smoothed_means,
        &sequential.smoothed_means,
        1e-7,
        "smoothed means",
    );
    assert_dmatrices_close(
        &parallel.smoothed_covariances,
        &sequential.smoothed_covariances,
        1e-7,
        "smoothed covariances",
    );
    assert_dmatrices_close(
        &parallel.smoothed_cross_covariances,
        &sequential.smoothed_cross_covariances,
        1e-7,
        "cross covariances",
    );
}

#[test]
fn test_parallel_filter_regression_model() {
    let (xs, ys) = regression_data();
    let params = regression_model(&xs, 10.0, 1.0);
    let seq = scalar_sequence(&ys);
    let model = Lgssm::default();

    let sequential = model.filter(&params, &seq).unwrap();
    let parallel = model.parallel_filter(&params, &seq).unwrap();
    assert_scalar_close(parallel.marginal_loglik, sequential.marginal_loglik, 1e-8, "loglik");
    assert_dvectors_close(
        &parallel.filtered_means,
        &sequential.filtered_means,
        1e-8,
        "filtered means",
    );
}

#[test]
fn test_single_step_sequence() {
    let params = random_model(3, 2, 2);
    let model = Lgssm::default();
    let (data, _) = model.sample(RngKey::new(1), &params, 1, None).unwrap();
    let seq = data.to_sequence();
    let sequential = model.smoother(&params, &seq).unwrap();
    let parallel = model.parallel_smoother(&params, &seq).unwrap();
    assert_eq!(parallel.len(), 1);
    assert!(parallel.smoothed_cross_covariances.is_empty());
    assert_dvectors_close(
        &parallel.smoothed_means,
        &sequential.smoothed_means,
        1e-10,
        "smoothed means",
    );
}

#[test]
fn test_parallel_rejects_missing_values() {
    let params = random_model(3, 2, 1);
    let seq = scalar_sequence(&[0.1, f64::NAN, 0.3]);
    let err = Lgssm::default().parallel_filter(&params, &seq).unwrap_err();
    assert!(matches!(err, InferenceError::Configuration { .. }));

    let empty = LgssmSequence::new(Vec::new());
    assert!(Lgssm::default().parallel_smoother(&params, &empty).unwrap().is_empty());
}
