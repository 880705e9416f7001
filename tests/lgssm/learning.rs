//! EM and blocked Gibbs on simulated data

use rand::Rng;

use ssm_inference::lgssm::{InitialProps, Lgssm, LgssmParams, LgssmProps, RegressionProps};
use ssm_inference::reporter::{DebugReporter, NoOpReporter};
use ssm_inference::{EmConfig, GibbsConfig, MatrixNormalInverseWishart, RngKey, StopReason};

use crate::helpers::assertions::{assert_non_decreasing, assert_scalar_close};
use crate::helpers::fixtures::{random_model, scalar_model};

fn frozen_initial() -> InitialProps {
    InitialProps {
        mean: false,
        cov: false,
        prior: None,
    }
}

#[test]
fn test_em_is_monotone_on_random_model() {
    let model = Lgssm::default();
    let truth = random_model(11, 2, 10);
    let (data, _) = model.sample(RngKey::new(12), &truth, 100, None).unwrap();
    let start = random_model(13, 2, 10);

    let mut reporter = DebugReporter::new();
    let fit = model
        .fit_em_with(
            start,
            &LgssmProps::trainable(),
            &[data.to_sequence()],
            &EmConfig::fixed(100),
            &mut reporter,
        )
        .unwrap();

    assert_eq!(fit.iterations(), 100);
    assert_eq!(fit.stop_reason, StopReason::Completed);
    assert_non_decreasing(&fit.log_probs, 1e-6, "EM log probs");
    assert!(reporter.non_monotone_events().is_empty());
    assert_eq!(reporter.em_events().len(), 100);
}

#[test]
fn test_em_with_weak_priors_is_monotone() {
    let model = Lgssm::default();
    let truth = scalar_model(0.8, 0.5, 1.0, 0.3, 0.0, 1.0);
    let (a, key) = model.sample(RngKey::new(1), &truth, 60, None).unwrap();
    let (b, _) = model.sample(key, &truth, 80, None).unwrap();
    let start = scalar_model(0.3, 1.0, 2.0, 1.0, 1.0, 2.0);

    let fit = model
        .fit_em(
            start,
            &LgssmProps::with_weak_priors(1, 1, 0),
            &[a.to_sequence(), b.to_sequence()],
            50,
        )
        .unwrap();
    assert_non_decreasing(&fit.log_probs, 1e-6, "MAP-EM log probs");
    assert_eq!(fit.history.len(), 50);
}

#[test]
fn test_em_recovers_emission_noise() {
    let model = Lgssm::default();
    let truth = scalar_model(1.0, 1.0, 1.0, 0.5, 0.0, 1.0);
    let (data, _) = model.sample(RngKey::new(2024), &truth, 1000, None).unwrap();

    let props = LgssmProps {
        initial: frozen_initial(),
        dynamics: RegressionProps::frozen(),
        emissions: RegressionProps {
            cov: true,
            ..RegressionProps::frozen()
        },
    };
    let start = scalar_model(1.0, 1.0, 1.0, 2.0, 0.0, 1.0);
    let fit = model.fit_em(start, &props, &[data.to_sequence()], 40).unwrap();

    assert_scalar_close(fit.params.emissions.cov[(0, 0)], 0.5, 0.15, "learned R");
    assert_eq!(fit.params.dynamics, truth.dynamics);
    assert_eq!(fit.params.initial, truth.initial);
}

#[test]
fn test_em_recovers_identifiable_parameters_from_random_start() {
    let model = Lgssm::default();
    // stationary initial variance q / (1 − f²)
    let (f, q, h, r) = (0.95, 0.3, 1.0, 0.5);
    let truth = scalar_model(f, q, h, r, 0.0, q / (1.0 - f * f));
    let mut key = RngKey::new(4242);
    let mut data = Vec::new();
    for _ in 0..4 {
        let (sample, next) = model.sample(key, &truth, 500, None).unwrap();
        key = next;
        data.push(sample.to_sequence());
    }

    let mut rng = RngKey::new(77).rng();
    let mut uniform = |lo: f64, hi: f64| rng.gen_range(lo..hi);
    let start = scalar_model(
        uniform(0.3, 0.7),
        uniform(0.5, 1.5),
        uniform(0.5, 1.5),
        uniform(0.5, 1.5),
        uniform(-1.0, 1.0),
        uniform(0.5, 2.0),
    );

    let fit = model
        .fit_em_with(
            start,
            &LgssmProps::trainable(),
            &data,
            &EmConfig::fixed(600).without_history(),
            NoOpReporter,
        )
        .unwrap();
    assert_non_decreasing(&fit.log_probs, 1e-6, "EM log probs");

    // H and Q trade off against the scale of the state; F and R do not
    assert_scalar_close(fit.params.dynamics.weights[(0, 0)], f, 0.05, "learned F");
    assert_scalar_close(fit.params.emissions.cov[(0, 0)], r, 0.15, "learned R");

    let loglik = |params: &LgssmParams| -> f64 {
        data.iter()
            .map(|seq| model.filter(params, seq).unwrap().marginal_loglik)
            .sum()
    };
    let fitted = loglik(&fit.params);
    let reference = loglik(&truth);
    assert!(
        fitted >= reference - 1.0,
        "fitted log likelihood {} is below the generating parameters' {}",
        fitted,
        reference
    );
}

#[test]
fn test_first_objective_is_sum_of_logliks() {
    let model = Lgssm::default();
    let params = scalar_model(0.9, 0.2, 1.0, 0.4, 0.0, 1.0);
    let (a, key) = model.sample(RngKey::new(5), &params, 30, None).unwrap();
    let (b, _) = model.sample(key, &params, 45, None).unwrap();
    let (a, b) = (a.to_sequence(), b.to_sequence());

    let expected = model.filter(&params, &a).unwrap().marginal_loglik
        + model.filter(&params, &b).unwrap().marginal_loglik;
    let fit = model
        .fit_em(params, &LgssmProps::trainable(), &[a, b], 1)
        .unwrap();
    assert_scalar_close(fit.log_probs[0], expected, 1e-9, "first EM objective");
}

#[test]
fn test_em_tolerance_stops_early() {
    let model = Lgssm::default();
    let truth = scalar_model(0.9, 0.2, 1.0, 0.4, 0.0, 1.0);
    let (data, _) = model.sample(RngKey::new(6), &truth, 100, None).unwrap();

    let props = LgssmProps {
        initial: frozen_initial(),
        ..LgssmProps::trainable()
    };
    let mut reporter = DebugReporter::new();
    let fit = model
        .fit_em_with(
            truth,
            &props,
            &[data.to_sequence()],
            &EmConfig::fixed(2000).with_tolerance(1e-8),
            &mut reporter,
        )
        .unwrap();
    assert_eq!(fit.stop_reason, StopReason::Converged);
    assert!(fit.iterations() < 2000);
    assert_eq!(
        reporter.completion(),
        Some((StopReason::Converged, fit.iterations()))
    );
}

#[test]
fn test_gibbs_posterior_mean_agrees_with_map() {
    let model = Lgssm::default();
    let truth = scalar_model(0.8, 0.5, 1.0, 0.3, 0.0, 1.0);
    let (data, _) = model.sample(RngKey::new(31), &truth, 400, None).unwrap();
    let data = vec![data.to_sequence()];

    // learn the dynamics and the emission noise; H and d stay fixed
    let props = LgssmProps {
        initial: frozen_initial(),
        dynamics: RegressionProps::trainable().with_prior(MatrixNormalInverseWishart::weak(1, 2)),
        emissions: RegressionProps {
            cov: true,
            ..RegressionProps::frozen()
        }
        .with_prior(MatrixNormalInverseWishart::weak(1, 2)),
    };
    let start = scalar_model(0.5, 1.0, 1.0, 1.0, 0.0, 1.0);

    let map = model.fit_em(start.clone(), &props, &data, 300).unwrap().params;

    let mut reporter = DebugReporter::new();
    let chain = model
        .fit_blocked_gibbs_with(
            RngKey::new(32),
            start,
            &props,
            &data,
            &GibbsConfig::new(800),
            &mut reporter,
        )
        .unwrap();
    assert_eq!(chain.len(), 800);
    assert_eq!(reporter.gibbs_events().len(), 800);

    let kept = &chain.samples[300..];
    let mean_f = kept.iter().map(|p| p.dynamics.weights[(0, 0)]).sum::<f64>() / kept.len() as f64;
    let mean_b = kept.iter().map(|p| p.dynamics.bias[0]).sum::<f64>() / kept.len() as f64;
    assert_scalar_close(mean_f, map.dynamics.weights[(0, 0)], 0.1, "posterior mean of F");
    assert_scalar_close(mean_b, map.dynamics.bias[0], 0.1, "posterior mean of b");
    assert_scalar_close(mean_f, 0.8, 0.15, "posterior mean of F vs truth");

    // fixed emission weights are never resampled
    assert!(kept.iter().all(|p| p.emissions.weights == truth.emissions.weights));
}
