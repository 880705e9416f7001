//! Forward-backward, Viterbi and posterior sampling

use nalgebra::{DMatrix, DVector};

use ssm_inference::hmm::{DiscreteHmm, DiscreteObservations, HmmParams};
use ssm_inference::{InferenceError, RngKey};

use crate::helpers::assertions::assert_scalar_close;
use crate::helpers::fixtures::three_state_hmm;

/// Joint probability of a state path and the observations
fn path_probability(params: &HmmParams, path: &[usize], ys: &[usize]) -> f64 {
    let mut p = params.initial_probs[path[0]] * params.emission_probs[(path[0], ys[0])];
    for t in 1..ys.len() {
        p *= params.transition_matrix[(path[t - 1], path[t])]
            * params.emission_probs[(path[t], ys[t])];
    }
    p
}

/// Every state path of length `len` over `k` states
fn all_paths(k: usize, len: usize) -> Vec<Vec<usize>> {
    (0..k.pow(len as u32))
        .map(|mut code| {
            (0..len)
                .map(|_| {
                    let z = code % k;
                    code /= k;
                    z
                })
                .collect()
        })
        .collect()
}

#[test]
fn test_unscaled_forward_agrees_on_short_sequence() {
    let params = three_state_hmm();
    let ys = vec![0, 3, 3, 1, 2, 0];

    // plain α recursion without normalization
    let mut alpha = DVector::from_fn(3, |k, _| {
        params.initial_probs[k] * params.emission_probs[(k, ys[0])]
    });
    for &y in &ys[1..] {
        let predicted = params.transition_matrix.tr_mul(&alpha);
        alpha = DVector::from_fn(3, |k, _| predicted[k] * params.emission_probs[(k, y)]);
    }

    let post = DiscreteHmm::default()
        .filter(&params, &DiscreteObservations::Categorical(ys))
        .unwrap();
    assert_scalar_close(post.marginal_loglik, alpha.sum().ln(), 1e-12, "marginal loglik");
    let last = alpha.clone() / alpha.sum();
    for k in 0..3 {
        assert_scalar_close(post.filtered_probs[(5, k)], last[k], 1e-12, "last filtered");
    }
}

#[test]
fn test_smoothed_marginals_match_enumeration() {
    let params = three_state_hmm();
    let ys = vec![2, 3, 0, 0, 1];
    let post = DiscreteHmm::default()
        .smoother(&params, &DiscreteObservations::Categorical(ys.clone()))
        .unwrap();

    let mut marginals = DMatrix::zeros(ys.len(), 3);
    let mut transitions = DMatrix::zeros(3, 3);
    let mut evidence = 0.0;
    for path in all_paths(3, ys.len()) {
        let p = path_probability(&params, &path, &ys);
        evidence += p;
        for (t, &z) in path.iter().enumerate() {
            marginals[(t, z)] += p;
        }
        for pair in path.windows(2) {
            transitions[(pair[0], pair[1])] += p;
        }
    }
    marginals /= evidence;
    transitions /= evidence;

    assert_scalar_close(post.marginal_loglik, evidence.ln(), 1e-12, "marginal loglik");
    for t in 0..ys.len() {
        for k in 0..3 {
            assert_scalar_close(post.smoothed_probs[(t, k)], marginals[(t, k)], 1e-10, "smoothed");
        }
    }
    for i in 0..3 {
        for j in 0..3 {
            assert_scalar_close(
                post.expected_transitions[(i, j)],
                transitions[(i, j)],
                1e-10,
                "expected transitions",
            );
        }
    }
}

#[test]
fn test_long_sequence_does_not_underflow() {
    let model = DiscreteHmm::default();
    let params = three_state_hmm();
    let (data, _) = model.sample(RngKey::new(3), &params, 5000).unwrap();
    let post = model.smoother(&params, &data.observations).unwrap();

    assert!(post.marginal_loglik.is_finite());
    assert!(post.marginal_loglik < -1000.0);
    for row in post.smoothed_probs.row_iter() {
        assert_scalar_close(row.sum(), 1.0, 1e-9, "smoothed row sum");
    }
    for row in post.filtered_probs.row_iter() {
        assert_scalar_close(row.sum(), 1.0, 1e-9, "filtered row sum");
    }
}

#[test]
fn test_viterbi_matches_enumeration() {
    let params = three_state_hmm();
    let ys = vec![0, 0, 3, 2, 3, 1, 1];
    let path = DiscreteHmm::default()
        .most_likely_states(&params, &DiscreteObservations::Categorical(ys.clone()))
        .unwrap();

    let best = all_paths(3, ys.len())
        .into_iter()
        .map(|p| (path_probability(&params, &p, &ys), p))
        .fold((f64::NEG_INFINITY, Vec::new()), |best, cand| {
            if cand.0 > best.0 {
                cand
            } else {
                best
            }
        });
    assert_eq!(path, best.1);
}

#[test]
fn test_single_state_model() {
    let params = HmmParams::new(
        DVector::from_element(1, 1.0),
        DMatrix::from_element(1, 1, 1.0),
        DMatrix::from_row_slice(1, 2, &[0.25, 0.75]),
    )
    .unwrap();
    let ys = vec![1, 1, 0, 1];
    let obs = DiscreteObservations::Categorical(ys);
    let model = DiscreteHmm::default();

    assert_eq!(model.most_likely_states(&params, &obs).unwrap(), vec![0; 4]);
    let post = model.smoother(&params, &obs).unwrap();
    let expected = 3.0 * 0.75_f64.ln() + 0.25_f64.ln();
    assert_scalar_close(post.marginal_loglik, expected, 1e-12, "marginal loglik");
    assert_scalar_close(post.expected_transitions[(0, 0)], 3.0, 1e-12, "transitions");
}

#[test]
fn test_impossible_observation_names_timestep() {
    // state 2 is the only one emitting class 3 and it cannot be reached from state 0
    #[rustfmt::skip]
    let transitions = DMatrix::from_row_slice(3, 3, &[
        0.5, 0.5, 0.0,
        0.5, 0.5, 0.0,
        0.0, 0.0, 1.0,
    ]);
    #[rustfmt::skip]
    let emissions = DMatrix::from_row_slice(3, 4, &[
        0.5, 0.5, 0.0, 0.0,
        0.0, 0.5, 0.5, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]);
    let params =
        HmmParams::new(DVector::from_vec(vec![1.0, 0.0, 0.0]), transitions, emissions).unwrap();
    let obs = DiscreteObservations::Categorical(vec![0, 1, 2, 3]);
    let model = DiscreteHmm::default();

    let expected = InferenceError::ModelMismatch { timestep: 3 };
    assert_eq!(model.filter(&params, &obs).unwrap_err(), expected);
    assert_eq!(model.smoother(&params, &obs).unwrap_err(), expected);
    assert_eq!(model.most_likely_states(&params, &obs).unwrap_err(), expected);
}

#[test]
fn test_multinomial_with_one_trial_matches_categorical() {
    let params = three_state_hmm();
    let ys = vec![1, 3, 0, 2, 2];
    let counts: Vec<Vec<u32>> = ys
        .iter()
        .map(|&y| (0..4).map(|c| u32::from(c == y)).collect())
        .collect();
    let model = DiscreteHmm::default();
    let categorical = model
        .smoother(&params, &DiscreteObservations::Categorical(ys))
        .unwrap();
    let multinomial = model
        .smoother(&params, &DiscreteObservations::Multinomial(counts))
        .unwrap();
    assert_scalar_close(
        multinomial.marginal_loglik,
        categorical.marginal_loglik,
        1e-12,
        "marginal loglik",
    );
    for t in 0..5 {
        for k in 0..3 {
            assert_scalar_close(
                multinomial.smoothed_probs[(t, k)],
                categorical.smoothed_probs[(t, k)],
                1e-12,
                "smoothed",
            );
        }
    }
}
