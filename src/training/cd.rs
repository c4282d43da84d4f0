//! Contrastive divergence chain.
//!
//! One call runs the full chain for a block of samples:
//!
//! ```text
//! positive   h1_a = act_h(W*v1 + b),   h1_s ~ h1_a
//! gibbs      v2_a = act_v(W'*h_s + c)                      (k times,
//!            h2_a = act_h(W*v2_a + b), h2_s ~ h2_a          h_s = h1_s first)
//! negative   (v2_a, h2_a) after the k-th alternation
//! gradient   grads += (v1 ⊗ h1_a) - (v2_a ⊗ h2_a)
//! ```
//!
//! The reconstruction error is measured between `v2_a` and the target,
//! which is the clean input when training a denoising model.

use ndarray::{s, Array1, Array2, ArrayView2, Zip};
use rand::Rng;

use crate::config::Config;
use crate::core::transform::Transform;
use crate::core::{check_len, units, Params, Phase, RbmError, RbmResult};

/// Scratch tensors for one Gibbs chain, sized for a fixed number of rows.
#[derive(Debug, Clone)]
pub struct ChainBuffers {
    pub h1_a: Array2<f32>,
    pub h1_s: Array2<f32>,
    pub v2_a: Array2<f32>,
    pub h2_a: Array2<f32>,
    pub h2_s: Array2<f32>,
}

impl ChainBuffers {
    pub fn new(rows: usize, visible_len: usize, hidden_len: usize) -> Self {
        Self {
            h1_a: Array2::zeros((rows, hidden_len)),
            h1_s: Array2::zeros((rows, hidden_len)),
            v2_a: Array2::zeros((rows, visible_len)),
            h2_a: Array2::zeros((rows, hidden_len)),
            h2_s: Array2::zeros((rows, hidden_len)),
        }
    }

    /// Maximum number of samples the buffers hold.
    pub fn rows(&self) -> usize {
        self.v2_a.nrows()
    }

    pub fn zero(&mut self) {
        self.h1_a.fill(0.0);
        self.h1_s.fill(0.0);
        self.v2_a.fill(0.0);
        self.h2_a.fill(0.0);
        self.h2_s.fill(0.0);
    }
}

/// Read-only view of the model shared by every chain of a batch.
#[derive(Clone, Copy)]
pub struct ChainModel<'a> {
    pub transform: &'a dyn Transform,
    pub params: &'a Params,
    pub config: &'a Config,
}

/// What a chain contributes besides gradients.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStats {
    /// Sum over samples of the per-sample mean squared reconstruction error.
    pub error_sum: f32,
    /// Positive-phase hidden activity per hidden bias, summed over samples.
    pub hidden_activity: Array1<f32>,
}

impl ChainStats {
    pub fn zeros(hidden_biases: usize) -> Self {
        Self {
            error_sum: 0.0,
            hidden_activity: Array1::zeros(hidden_biases),
        }
    }

    pub fn merge(&mut self, other: &ChainStats) {
        self.error_sum += other.error_sum;
        self.hidden_activity += &other.hidden_activity;
    }
}

/// Run CD-k for the rows of `v1` and add their statistics to `grads`.
///
/// # Errors
/// - `DimensionMismatch` if the rows do not fit the buffers or `target`
///   differs in shape from `v1`
/// - `NumericDivergence` naming the phase where a non-finite activation
///   appeared
pub fn run_chain<R: Rng + ?Sized>(
    model: ChainModel<'_>,
    v1: ArrayView2<f32>,
    target: ArrayView2<f32>,
    buffers: &mut ChainBuffers,
    rng: &mut R,
    grads: &mut Params,
) -> RbmResult<ChainStats> {
    let rows = v1.nrows();
    if rows > buffers.rows() {
        return Err(RbmError::DimensionMismatch {
            context: "chain buffer rows",
            expected: buffers.rows(),
            found: rows,
        });
    }
    check_len("target rows", rows, target.nrows())?;
    check_len("target columns", v1.ncols(), target.ncols())?;

    let ChainModel {
        transform,
        params,
        config,
    } = model;
    let sigma = config.gaussian_sigma;
    let steps = config.cd_steps;

    let mut h1_a = buffers.h1_a.slice_mut(s![..rows, ..]);
    let mut h1_s = buffers.h1_s.slice_mut(s![..rows, ..]);
    let mut v2_a = buffers.v2_a.slice_mut(s![..rows, ..]);
    let mut h2_a = buffers.h2_a.slice_mut(s![..rows, ..]);
    let mut h2_s = buffers.h2_s.slice_mut(s![..rows, ..]);

    transform.forward(params, v1, h1_a.view_mut())?;
    units::activate(
        config.hidden_unit,
        h1_a.view_mut(),
        Some(h1_s.view_mut()),
        sigma,
        rng,
    )
    .map_err(|_| RbmError::diverged(Phase::Positive))?;

    for step in 0..steps {
        let last = step + 1 == steps;

        let driver = if step == 0 { h1_s.view() } else { h2_s.view() };
        transform.backward(params, driver, v2_a.view_mut())?;
        units::probabilities(config.visible_unit, v2_a.view_mut())
            .map_err(|_| RbmError::diverged(Phase::GibbsChain))?;

        transform.forward(params, v2_a.view(), h2_a.view_mut())?;
        let samples = if last { None } else { Some(h2_s.view_mut()) };
        let phase = if last {
            Phase::Negative
        } else {
            Phase::GibbsChain
        };
        units::activate(config.hidden_unit, h2_a.view_mut(), samples, sigma, rng)
            .map_err(|_| RbmError::diverged(phase))?;
    }

    transform.accumulate(v1, h1_a.view(), 1.0, grads)?;
    transform.accumulate(v2_a.view(), h2_a.view(), -1.0, grads)?;

    let squared = Zip::from(&target)
        .and(v2_a.view())
        .fold(0.0f32, |acc, &t, &r| acc + (t - r) * (t - r));

    Ok(ChainStats {
        error_sum: squared / v1.ncols() as f32,
        hidden_activity: transform.hidden_unit_activity(h1_a.view()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnitType;
    use crate::core::transform::Dense;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model_parts() -> (Dense, Params, Config) {
        let params = Params {
            w: array![[2.0f32, -1.0], [-1.0, 2.0], [0.5, 0.5], [0.0, 1.0]].into_dyn(),
            b: array![0.0, -0.5],
            c: array![0.1, 0.0, -0.1, 0.0],
        };
        (Dense::new(4, 2).unwrap(), params, Config::default())
    }

    #[test]
    fn test_chain_shapes_and_stats() {
        let (dense, params, config) = model_parts();
        let model = ChainModel {
            transform: &dense,
            params: &params,
            config: &config,
        };
        let v = array![[1.0f32, 0.0, 1.0, 0.0], [0.0, 1.0, 1.0, 1.0]];
        let mut buffers = ChainBuffers::new(4, 4, 2);
        let mut grads = params.zeros_like();
        let mut rng = StdRng::seed_from_u64(7);

        let stats = run_chain(model, v.view(), v.view(), &mut buffers, &mut rng, &mut grads)
            .unwrap();

        assert!(stats.error_sum >= 0.0 && stats.error_sum <= 2.0);
        assert_eq!(stats.hidden_activity.len(), 2);
        assert!(stats.hidden_activity.iter().all(|&a| (0.0..=2.0).contains(&a)));
        assert!(grads.is_finite());
        assert!(buffers
            .h1_s
            .slice(s![..2, ..])
            .iter()
            .all(|&x| x == 0.0 || x == 1.0));
    }

    #[test]
    fn test_chain_deterministic_under_seed() {
        let (dense, params, mut config) = model_parts();
        config.cd_steps = 3;
        let model = ChainModel {
            transform: &dense,
            params: &params,
            config: &config,
        };
        let v = array![[1.0f32, 1.0, 0.0, 0.0]];
        let run = |seed| {
            let mut buffers = ChainBuffers::new(1, 4, 2);
            let mut grads = params.zeros_like();
            let mut rng = StdRng::seed_from_u64(seed);
            let stats =
                run_chain(model, v.view(), v.view(), &mut buffers, &mut rng, &mut grads).unwrap();
            (stats, grads)
        };
        assert_eq!(run(3), run(3));
    }

    #[test]
    fn test_too_many_rows_rejected() {
        let (dense, params, config) = model_parts();
        let model = ChainModel {
            transform: &dense,
            params: &params,
            config: &config,
        };
        let v = Array2::zeros((3, 4));
        let mut buffers = ChainBuffers::new(2, 4, 2);
        let mut grads = params.zeros_like();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            run_chain(model, v.view(), v.view(), &mut buffers, &mut rng, &mut grads),
            Err(RbmError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_non_finite_weights_report_positive_phase() {
        let (dense, mut params, mut config) = model_parts();
        params.w[[0, 0]] = f32::NAN;
        config.hidden_unit = UnitType::Relu6;
        let model = ChainModel {
            transform: &dense,
            params: &params,
            config: &config,
        };
        let v = array![[1.0f32, 0.0, 0.0, 0.0]];
        let mut buffers = ChainBuffers::new(1, 4, 2);
        let mut grads = params.zeros_like();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            run_chain(model, v.view(), v.view(), &mut buffers, &mut rng, &mut grads),
            Err(RbmError::NumericDivergence {
                phase: Phase::Positive,
                ..
            })
        ));
    }
}
