//! Parameter updates for linear-Gaussian SSMs
//!
//! The three blocks (initial state, dynamics, emissions) are linear
//! regressions with stacked weights `[W  W_u  w_b]`. Every update works on a
//! block's sufficient statistics:
//!
//! - [`m_step`]: closed-form maximum likelihood, or the joint MAP under an
//!   MNIW prior when one is attached
//! - [`log_prior`]: prior log density of the trainable parameters
//! - [`sample_params`]: one draw from the conditional posterior of every
//!   trainable block given a sampled trajectory
//!
//! Columns that are not trainable are held at their current value by moving
//! their contribution to the target side of the regression before the update.

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use super::params::{EmissionWeights, LgssmParams, LgssmProps};
use super::stats::{LgssmStats, RegressionStats};
use crate::common::conjugate::MatrixNormalInverseWishart;
use crate::common::linalg::{cholesky_with_retry, clamp_psd, select, select_columns, symmetrize};
use crate::errors::{InferenceError, MatrixRole, Result};

// ============================================================================
// Blocks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Initial,
    Dynamics,
    Emissions,
}

/// Current value, trainability and prior of one regression block
struct Block<'a> {
    kind: BlockKind,
    /// Stacked weights `[W  W_u  w_b]`, or `[μ_0]` for the initial block
    weights: DMatrix<f64>,
    cov: &'a DMatrix<f64>,
    /// Trainable weight columns
    columns: Vec<usize>,
    learn_cov: bool,
    prior: Option<&'a MatrixNormalInverseWishart>,
}

impl Block<'_> {
    fn is_frozen(&self) -> bool {
        self.columns.is_empty() && !self.learn_cov
    }

    fn stats<'s>(&self, stats: &'s LgssmStats) -> &'s RegressionStats {
        match self.kind {
            BlockKind::Initial => &stats.initial,
            BlockKind::Dynamics => &stats.dynamics,
            BlockKind::Emissions => &stats.emissions,
        }
    }

    fn name(&self) -> &'static str {
        match self.kind {
            BlockKind::Initial => "initial",
            BlockKind::Dynamics => "dynamics",
            BlockKind::Emissions => "emission",
        }
    }
}

fn stack_weights(
    weights: &DMatrix<f64>,
    input_weights: &DMatrix<f64>,
    bias: &DVector<f64>,
) -> DMatrix<f64> {
    let d = weights.ncols();
    let u = input_weights.ncols();
    let mut stacked = DMatrix::zeros(weights.nrows(), d + u + 1);
    stacked.columns_mut(0, d).copy_from(weights);
    stacked.columns_mut(d, u).copy_from(input_weights);
    stacked.column_mut(d + u).copy_from(bias);
    stacked
}

fn unstack_weights(
    stacked: &DMatrix<f64>,
    state_dim: usize,
    input_dim: usize,
) -> (DMatrix<f64>, DMatrix<f64>, DVector<f64>) {
    (
        stacked.columns(0, state_dim).into_owned(),
        stacked.columns(state_dim, input_dim).into_owned(),
        stacked.column(state_dim + input_dim).into_owned(),
    )
}

/// Blocks of `params`; time-varying emission weights are never learned and
/// leave the emission block out
fn blocks<'a>(params: &'a LgssmParams, props: &'a LgssmProps) -> Vec<Block<'a>> {
    let d = params.state_dim();
    let u = params.input_dim();

    let mut blocks = vec![
        Block {
            kind: BlockKind::Initial,
            weights: DMatrix::from_column_slice(d, 1, params.initial.mean.as_slice()),
            cov: &params.initial.cov,
            columns: if props.initial.mean { vec![0] } else { Vec::new() },
            learn_cov: props.initial.cov,
            prior: props.initial.prior.as_ref(),
        },
        Block {
            kind: BlockKind::Dynamics,
            weights: stack_weights(
                &params.dynamics.weights,
                &params.dynamics.input_weights,
                &params.dynamics.bias,
            ),
            cov: &params.dynamics.cov,
            columns: props.dynamics.trainable_columns(d, u),
            learn_cov: props.dynamics.cov,
            prior: props.dynamics.prior.as_ref(),
        },
    ];

    if let EmissionWeights::Static(h) = &params.emissions.weights {
        blocks.push(Block {
            kind: BlockKind::Emissions,
            weights: stack_weights(h, &params.emissions.input_weights, &params.emissions.bias),
            cov: &params.emissions.cov,
            columns: props.emissions.trainable_columns(d, u),
            learn_cov: props.emissions.cov,
            prior: props.emissions.prior.as_ref(),
        });
    }
    blocks
}

fn write_block(
    params: &mut LgssmParams,
    kind: BlockKind,
    weights: DMatrix<f64>,
    cov: DMatrix<f64>,
) {
    let d = params.state_dim();
    let u = params.input_dim();
    match kind {
        BlockKind::Initial => {
            params.initial.mean = weights.column(0).into_owned();
            params.initial.cov = cov;
        }
        BlockKind::Dynamics => {
            let (w, w_u, b) = unstack_weights(&weights, d, u);
            params.dynamics.weights = w;
            params.dynamics.input_weights = w_u;
            params.dynamics.bias = b;
            params.dynamics.cov = cov;
        }
        BlockKind::Emissions => {
            let (w, w_u, b) = unstack_weights(&weights, d, u);
            params.emissions.weights = EmissionWeights::Static(w);
            params.emissions.input_weights = w_u;
            params.emissions.bias = b;
            params.emissions.cov = cov;
        }
    }
}

/// Statistics of the regression of `y − W_F z_F` on the trainable features `z_T`
///
/// # Returns
/// Tuple of (`Σ z_T z_Tᵀ`, `Σ y' z_Tᵀ`, `Σ y' y'ᵀ`)
fn condition_on_fixed(
    stats: &RegressionStats,
    weights: &DMatrix<f64>,
    trainable: &[usize],
) -> (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>) {
    let fixed: Vec<usize> = (0..weights.ncols())
        .filter(|c| !trainable.contains(c))
        .collect();
    let szz_tt = select(&stats.szz, trainable, trainable);
    let syz_t = select_columns(&stats.syz, trainable);
    if fixed.is_empty() {
        return (szz_tt, syz_t, stats.syy.clone());
    }

    let w_f = select_columns(weights, &fixed);
    let szz_ft = select(&stats.szz, &fixed, trainable);
    let szz_ff = select(&stats.szz, &fixed, &fixed);
    let syz_f = select_columns(&stats.syz, &fixed);

    let syz = syz_t - &w_f * szz_ft;
    let cross = &syz_f * w_f.transpose();
    let syy = &stats.syy - &cross - cross.transpose() + &w_f * szz_ff * w_f.transpose();
    (szz_tt, syz, symmetrize(&syy))
}

fn assemble(weights: &DMatrix<f64>, trainable: &[usize], learned: &DMatrix<f64>) -> DMatrix<f64> {
    let mut updated = weights.clone();
    for (j, &col) in trainable.iter().enumerate() {
        updated.column_mut(col).copy_from(&learned.column(j));
    }
    updated
}

// ============================================================================
// M-step
// ============================================================================

/// Maximize one block given its statistics
fn maximize_block(
    block: &Block<'_>,
    stats: &RegressionStats,
    jitter: f64,
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let (szz, syz, syy) = condition_on_fixed(stats, &block.weights, &block.columns);
    let output_dim = block.weights.nrows();

    let (learned, cov) = match block.prior {
        Some(prior) => prior
            .restrict(&block.columns)
            .posterior(&szz, &syz, &syy, stats.count, jitter)?
            .mode(),
        None => {
            if stats.count == 0.0 {
                log::debug!("no data for the {} block; parameters kept", block.name());
                return Ok((block.weights.clone(), block.cov.clone()));
            }
            let learned = if block.columns.is_empty() {
                DMatrix::zeros(output_dim, 0)
            } else {
                cholesky_with_retry(&szz, jitter)
                    .ok_or_else(|| InferenceError::instability(MatrixRole::PosteriorPrecision))?
                    .solve(&syz.transpose())
                    .transpose()
            };
            let fitted = &learned * syz.transpose();
            let resid =
                &syy - &fitted - fitted.transpose() + &learned * &szz * learned.transpose();
            (learned, resid / stats.count)
        }
    };

    let weights = assemble(&block.weights, &block.columns, &learned);
    let cov = if block.learn_cov {
        clamp_psd(&cov).0
    } else {
        block.cov.clone()
    };
    Ok((weights, cov))
}

/// Closed-form M-step
///
/// Each block without a prior gets its maximum-likelihood update; a block
/// with an MNIW prior gets the joint posterior mode. Non-trainable leaves
/// are carried over unchanged and learned covariances are projected onto
/// the PSD cone.
///
/// # Arguments
/// * `params` - Current parameters (source of the fixed leaves)
/// * `props` - Trainability masks and priors
/// * `stats` - Expected statistics summed over all sequences
/// * `jitter` - Cholesky retry jitter
pub fn m_step(
    params: &LgssmParams,
    props: &LgssmProps,
    stats: &LgssmStats,
    jitter: f64,
) -> Result<LgssmParams> {
    let mut updated = params.clone();
    for block in blocks(params, props) {
        if block.is_frozen() {
            continue;
        }
        let (weights, cov) = maximize_block(&block, block.stats(stats), jitter)?;
        write_block(&mut updated, block.kind, weights, cov);
    }
    Ok(updated)
}

/// Log prior density of the trainable parameters
///
/// Blocks without a prior contribute zero. A block's covariance term is
/// included when its covariance is trainable and its weight term when any
/// weight column is trainable.
pub fn log_prior(params: &LgssmParams, props: &LgssmProps, jitter: f64) -> Result<f64> {
    let mut lp = 0.0;
    for block in blocks(params, props) {
        let Some(prior) = block.prior else {
            continue;
        };
        if block.learn_cov {
            lp += prior.cov_log_prob(block.cov, jitter)?;
        }
        if !block.columns.is_empty() {
            let weights = select_columns(&block.weights, &block.columns);
            lp += prior
                .restrict(&block.columns)
                .weights_log_prob(&weights, block.cov, jitter)?;
        }
    }
    Ok(lp)
}

// ============================================================================
// Conditional sampling
// ============================================================================

/// Draw every trainable block from its conditional posterior
///
/// Blocks with a trainable covariance draw `(W_T, Σ)` jointly from the MNIW
/// posterior; blocks with a fixed covariance draw only `W_T | Σ`. Every
/// trainable block needs a prior.
pub fn sample_params<R: Rng + ?Sized>(
    rng: &mut R,
    params: &LgssmParams,
    props: &LgssmProps,
    stats: &LgssmStats,
    jitter: f64,
) -> Result<LgssmParams> {
    let mut updated = params.clone();
    for block in blocks(params, props) {
        if block.is_frozen() {
            continue;
        }
        let prior = block.prior.ok_or_else(|| {
            InferenceError::configuration(format!(
                "the {} block is trainable but has no prior",
                block.name()
            ))
        })?;
        let block_stats = block.stats(stats);
        let (szz, syz, syy) = condition_on_fixed(block_stats, &block.weights, &block.columns);
        let posterior = prior
            .restrict(&block.columns)
            .posterior(&szz, &syz, &syy, block_stats.count, jitter)?;

        let (learned, cov) = if block.learn_cov {
            posterior.sample(rng, jitter)?
        } else {
            (posterior.sample_weights(rng, block.cov, jitter)?, block.cov.clone())
        };
        let weights = assemble(&block.weights, &block.columns, &learned);
        write_block(&mut updated, block.kind, weights, cov);
    }
    Ok(updated)
}

/// Check that every trainable block carries a prior
pub(crate) fn require_priors(params: &LgssmParams, props: &LgssmProps) -> Result<()> {
    for block in blocks(params, props) {
        if !block.is_frozen() && block.prior.is_none() {
            return Err(InferenceError::configuration(format!(
                "blocked Gibbs needs a prior on the trainable {} block",
                block.name()
            )));
        }
    }
    Ok(())
}
