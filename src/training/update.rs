//! Weight update rule.
//!
//! Turns the averaged CD gradient of a batch into a parameter change:
//!
//! ```text
//! 1. decay      dW -= λ·W  (L2)   or   dW -= λ·sign(W)  (L1)
//!               full variants decay b and c with the bias cost
//! 2. momentum   Δ = m·Δ_prev + ε·d      (Δ = ε·d without momentum)
//! 3. clip       Δ *= min(1, threshold / ‖Δ‖) for each of ΔW, Δb, Δc
//! 4. sparsity   q = (1-ρ)·q + ρ·mean(h1_a),   Δb += ε·cost·(target - q)
//! 5. apply      W += ΔW,  b += Δb,  c += Δc
//! ```
//!
//! The momentum buffer keeps the clipped delta without the sparsity term.
//! The backup snapshot is refreshed after every update that leaves the
//! parameters finite, so it always holds the last good state. A non-finite
//! parameter after step 5 rolls back to it.

use ndarray::{Array1, ArrayBase, DataMut, Dimension};

use crate::config::{Config, DecayType, SparsityMethod};
use crate::core::{Params, Phase, Rbm, RbmError, RbmResult};
use crate::training::sparsity::SparsityState;
use crate::utils::{l2_norm, sign};

/// Subtract the weight decay penalty from averaged gradients.
pub fn apply_decay(config: &Config, params: &Params, grads: &mut Params) {
    let weight_cost = config.weight_cost;
    let bias_cost = config.bias_cost;
    match config.weight_decay {
        DecayType::None => {}
        DecayType::L1 | DecayType::L1Full => {
            grads.w.zip_mut_with(&params.w, |g, &w| *g -= weight_cost * sign(w));
            if config.weight_decay.decays_biases() {
                grads.b.zip_mut_with(&params.b, |g, &b| *g -= bias_cost * sign(b));
                grads.c.zip_mut_with(&params.c, |g, &c| *g -= bias_cost * sign(c));
            }
        }
        DecayType::L2 | DecayType::L2Full => {
            grads.w.scaled_add(-weight_cost, &params.w);
            if config.weight_decay.decays_biases() {
                grads.b.scaled_add(-bias_cost, &params.b);
                grads.c.scaled_add(-bias_cost, &params.c);
            }
        }
    }
}

/// Rescale `delta` so its Euclidean norm does not exceed `threshold`.
///
/// Returns whether the tensor was rescaled.
pub fn clip_norm<S, D>(delta: &mut ArrayBase<S, D>, threshold: f32) -> bool
where
    S: DataMut<Elem = f32>,
    D: Dimension,
{
    let norm = l2_norm(delta);
    if norm > threshold {
        *delta *= threshold / norm;
        true
    } else {
        false
    }
}

fn clip_params(delta: &mut Params, threshold: f32) -> bool {
    let w = clip_norm(&mut delta.w, threshold);
    let b = clip_norm(&mut delta.b, threshold);
    let c = clip_norm(&mut delta.c, threshold);
    w || b || c
}

/// Apply one update from the summed gradients of `rows` samples.
///
/// `grads` is consumed as scratch space. `hidden_activity` is the summed
/// positive-phase activity per hidden bias.
///
/// # Errors
/// `NumericDivergence` (after rollback, when a backup is kept) if any
/// parameter becomes non-finite.
pub fn apply_update(
    rbm: &mut Rbm,
    grads: &mut Params,
    hidden_activity: &Array1<f32>,
    rows: usize,
    epoch: usize,
) -> RbmResult<()> {
    if rows == 0 {
        return Ok(());
    }
    let lr = rbm.config.learning_rate;
    grads.scale(1.0 / rows as f32);
    apply_decay(&rbm.config, &rbm.params, grads);

    let delta: &mut Params = match rbm.momentum.as_mut() {
        Some(previous) => {
            previous.scale(rbm.config.momentum_at(epoch));
            previous.scaled_add(lr, grads);
            previous
        }
        None => {
            grads.scale(lr);
            grads
        }
    };

    if rbm.config.clip_gradients && clip_params(delta, rbm.config.gradient_clip) {
        tracing::trace!(threshold = rbm.config.gradient_clip, "update clipped");
    }

    let correction = sparsity_correction(&rbm.config, &mut rbm.sparsity, hidden_activity, rows);

    rbm.params.scaled_add(1.0, delta);
    if let Some(correction) = correction {
        rbm.params.b += &correction;
    }

    if !rbm.params.is_finite() {
        return Err(rbm.recover(RbmError::diverged(Phase::Update)));
    }
    if let Some(backup) = rbm.backup.as_mut() {
        backup.assign(&rbm.params);
    }
    Ok(())
}

/// Update the running activity estimate and compute the hidden bias
/// correction, or `None` when sparsity is off.
fn sparsity_correction(
    config: &Config,
    state: &mut Option<SparsityState>,
    hidden_activity: &Array1<f32>,
    rows: usize,
) -> Option<Array1<f32>> {
    if config.sparsity == SparsityMethod::None {
        return None;
    }
    let hidden_biases = hidden_activity.len();
    let state = state.get_or_insert_with(|| SparsityState::new(config.sparsity, hidden_biases));
    let mean = hidden_activity / rows as f32;
    state.update(&mean, config.sparsity_rate);
    Some(state.correction(
        config.sparsity_target,
        config.learning_rate * config.sparsity_cost,
        hidden_biases,
    ))
}
