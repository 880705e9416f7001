//! Associative-scan forward-backward against the sequential passes

use ssm_inference::hmm::{sample_multinomial, DiscreteHmm, DiscreteObservations, HmmParams};
use ssm_inference::{InferenceError, RngKey};

use crate::helpers::assertions::{assert_dmatrix_close, assert_scalar_close};
use crate::helpers::fixtures::three_state_hmm;

fn assert_agree(params: &HmmParams, observations: &DiscreteObservations) {
    let model = DiscreteHmm::default();
    let parallel = model.parallel_smoother(params, observations).unwrap();
    let sequential = model.smoother(params, observations).unwrap();

    assert_scalar_close(
        parallel.marginal_loglik,
        sequential.marginal_loglik,
        1e-8,
        "marginal loglik",
    );
    let (p, s) = (&parallel, &sequential);
    assert_dmatrix_close(&p.filtered_probs, &s.filtered_probs, 1e-8, "filtered");
    assert_dmatrix_close(&p.predicted_probs, &s.predicted_probs, 1e-8, "predicted");
    assert_dmatrix_close(&p.smoothed_probs, &s.smoothed_probs, 1e-8, "smoothed");
    assert_dmatrix_close(
        &parallel.expected_transitions,
        &sequential.expected_transitions,
        1e-8,
        "expected transitions",
    );
}

#[test]
fn test_parallel_smoother_agrees_with_forward_backward() {
    let model = DiscreteHmm::default();
    let params = three_state_hmm();
    let mut key = RngKey::new(21);
    for &len in &[1, 2, 5, 64, 257] {
        let (data, next) = model.sample(key, &params, len).unwrap();
        key = next;
        assert_agree(&params, &data.observations);
    }
}

#[test]
fn test_parallel_smoother_on_long_sequence() {
    let model = DiscreteHmm::default();
    let params = three_state_hmm();
    let (data, _) = model.sample(RngKey::new(8), &params, 5000).unwrap();
    assert_agree(&params, &data.observations);

    let filtered = model.parallel_filter(&params, &data.observations).unwrap();
    assert!(filtered.marginal_loglik < -1000.0);
}

#[test]
fn test_parallel_smoother_with_multinomial_counts() {
    let params = three_state_hmm();
    let (data, _) = sample_multinomial(RngKey::new(2), &params, 80, 12).unwrap();
    assert_agree(&params, &data.observations);
}

#[test]
fn test_parallel_passes_reject_what_the_sequential_ones_reject() {
    let model = DiscreteHmm::default();
    let params = three_state_hmm();

    let out_of_range = DiscreteObservations::Categorical(vec![0, 4, 1]);
    assert!(matches!(
        model.parallel_smoother(&params, &out_of_range).unwrap_err(),
        InferenceError::DimensionMismatch { .. }
    ));

    let mut unnormalized = params.clone();
    unnormalized.initial_probs[0] += 0.1;
    let obs = DiscreteObservations::Categorical(vec![0, 1]);
    assert!(model.parallel_filter(&unnormalized, &obs).is_err());
}
