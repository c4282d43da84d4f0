//! Core RBM model: parameters, unit laws, transforms, and energy.
//!
//! An [`Rbm`] owns its weights `W`, hidden biases `b` and visible biases `c`,
//! together with the optional state a training session needs (momentum
//! deltas, a rollback snapshot, sparsity statistics). The dense and
//! convolutional forms differ only in the [`Transform`] injected at
//! construction:
//!
//! ```text
//! hidden pre-activation   = W * v + b     (forward)
//! visible pre-activation  = W' * h + c    (backward)
//! ```
//!
//! ## Submodules
//!
//! - [`units`]: activation and sampling laws per unit kind
//! - [`transform`]: the `Transform` seam and its dense implementation
//! - [`conv`]: convolutional transform and 4-D valid/full convolutions
//! - [`energy`]: energy and free energy

pub mod conv;
pub mod energy;
pub mod transform;
pub mod units;

use std::fmt;

use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, IxDyn};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{Config, UnitType};
use crate::training::sparsity::SparsityState;
pub use conv::{ConvShape, Convolutional};
pub use transform::{Dense, Transform};
pub use units::Outputs;

/// Where in a training step a non-finite value was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Hidden activation from the observed visible sample.
    Positive,
    /// Intermediate Gibbs alternations.
    GibbsChain,
    /// Final hidden activation of the chain.
    Negative,
    /// Parameters after the weight update.
    Update,
    /// Activation or energy evaluation outside training.
    Evaluation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Positive => "positive phase",
            Phase::GibbsChain => "gibbs chain",
            Phase::Negative => "negative phase",
            Phase::Update => "weight update",
            Phase::Evaluation => "evaluation",
        };
        f.write_str(name)
    }
}

/// Errors raised by model construction, training and evaluation.
#[derive(Debug, thiserror::Error)]
pub enum RbmError {
    /// Invalid option or unit combination, detected before training.
    #[error("Invalid config: {0}")]
    Configuration(String),

    /// Data shape disagrees with the model dimensions.
    #[error("Dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    /// A NaN or infinity appeared in activations or parameters.
    #[error("Numeric divergence during {phase} (backup restored: {restored})")]
    NumericDivergence { phase: Phase, restored: bool },

    /// The model was left corrupted by an unrecovered divergence.
    #[error("Model parameters are corrupted by an earlier divergence")]
    Corrupted,

    /// The dataset holds no samples.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// The operation has no closed form for this unit combination.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type RbmResult<T> = Result<T, RbmError>;

impl RbmError {
    pub(crate) fn diverged(phase: Phase) -> Self {
        RbmError::NumericDivergence {
            phase,
            restored: false,
        }
    }
}

/// Fail with `DimensionMismatch` unless `found == expected`.
pub(crate) fn check_len(context: &'static str, expected: usize, found: usize) -> RbmResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(RbmError::DimensionMismatch {
            context,
            expected,
            found,
        })
    }
}

/// Weights and biases of one layer pair.
///
/// The same shape doubles as gradient accumulator, momentum delta, and
/// rollback snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    /// Dense: `(visible, hidden)`. Convolutional: `(filters, channels, kh, kw)`.
    pub w: ArrayD<f32>,
    /// Hidden biases, one per hidden unit or filter.
    pub b: Array1<f32>,
    /// Visible biases, one per visible unit or channel.
    pub c: Array1<f32>,
}

impl Params {
    pub fn zeros(w_shape: &[usize], hidden_bias: usize, visible_bias: usize) -> Self {
        Self {
            w: ArrayD::zeros(IxDyn(w_shape)),
            b: Array1::zeros(hidden_bias),
            c: Array1::zeros(visible_bias),
        }
    }

    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.w.shape(), self.b.len(), self.c.len())
    }

    pub fn fill(&mut self, value: f32) {
        self.w.fill(value);
        self.b.fill(value);
        self.c.fill(value);
    }

    /// `self *= alpha`
    pub fn scale(&mut self, alpha: f32) {
        self.w *= alpha;
        self.b *= alpha;
        self.c *= alpha;
    }

    /// `self += alpha * other`
    pub fn scaled_add(&mut self, alpha: f32, other: &Params) {
        self.w.scaled_add(alpha, &other.w);
        self.b.scaled_add(alpha, &other.b);
        self.c.scaled_add(alpha, &other.c);
    }

    /// Overwrite with `other` without reallocating.
    pub fn assign(&mut self, other: &Params) {
        self.w.assign(&other.w);
        self.b.assign(&other.b);
        self.c.assign(&other.c);
    }

    pub fn is_finite(&self) -> bool {
        crate::utils::all_finite(&self.w)
            && crate::utils::all_finite(&self.b)
            && crate::utils::all_finite(&self.c)
    }
}

/// Result of a batched activation request.
#[derive(Debug, Clone)]
pub struct Activation {
    /// Activation probabilities (means for Gaussian and rectified units).
    pub probs: Array2<f32>,
    /// Stochastic sample, when requested.
    pub samples: Option<Array2<f32>>,
}

/// A Restricted Boltzmann Machine, dense or convolutional.
///
/// # Weight Initialization
///
/// Weights are drawn from `N(0, σ²)` with σ chosen by the transform
/// (0.1 dense, 0.01 convolutional); biases start at zero.
pub struct Rbm {
    pub params: Params,
    pub(crate) config: Config,
    pub(crate) transform: Box<dyn Transform>,
    /// Previous update, present while a momentum session runs.
    pub(crate) momentum: Option<Params>,
    /// Last known-good parameters, present while a backup session runs.
    pub(crate) backup: Option<Params>,
    pub(crate) sparsity: Option<SparsityState>,
    pub(crate) rng: StdRng,
    pub(crate) corrupted: bool,
}

impl fmt::Debug for Rbm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rbm")
            .field("transform", &self.transform.describe())
            .field("w", &format!("<{:?} weights>", self.params.w.shape()))
            .field("visible_unit", &self.config.visible_unit)
            .field("hidden_unit", &self.config.hidden_unit)
            .field("corrupted", &self.corrupted)
            .finish()
    }
}

impl fmt::Display for Rbm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RBM({}, {}->{}): {}",
            self.transform.name(),
            self.config.visible_unit,
            self.config.hidden_unit,
            self.transform.describe()
        )
    }
}

impl Rbm {
    /// Build a model around `transform` after validating `config`.
    ///
    /// # Errors
    /// `Configuration` if the config is invalid.
    pub fn new(transform: Box<dyn Transform>, config: Config) -> RbmResult<Self> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let dist = Normal::new(0.0, transform.init_std())
            .map_err(|e| RbmError::Configuration(format!("weight init: {e}")))?;
        let w = ArrayD::random_using(IxDyn(&transform.weight_shape()), dist, &mut rng);

        let params = Params {
            w,
            b: Array1::zeros(transform.hidden_bias_len()),
            c: Array1::zeros(transform.visible_bias_len()),
        };

        Ok(Self {
            params,
            config,
            transform,
            momentum: None,
            backup: None,
            sparsity: None,
            rng,
            corrupted: false,
        })
    }

    /// Standard RBM with a `num_visible × num_hidden` weight matrix.
    pub fn dense(num_visible: usize, num_hidden: usize, config: Config) -> RbmResult<Self> {
        Self::new(Box::new(Dense::new(num_visible, num_hidden)?), config)
    }

    /// Convolutional RBM with shared kernels.
    pub fn convolutional(shape: ConvShape, config: Config) -> RbmResult<Self> {
        Self::new(Box::new(Convolutional::new(shape)?), config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transform(&self) -> &dyn Transform {
        self.transform.as_ref()
    }

    /// Length of a flattened visible sample.
    pub fn input_size(&self) -> usize {
        self.transform.visible_len()
    }

    /// Length of a flattened hidden sample.
    pub fn output_size(&self) -> usize {
        self.transform.hidden_len()
    }

    /// Number of trainable weights (biases excluded).
    pub fn parameter_count(&self) -> usize {
        self.params.w.len()
    }

    /// Whether an unrecovered divergence left the parameters unusable.
    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// Hidden activation probabilities for a single visible sample.
    pub fn hidden_probabilities(&self, sample: ArrayView1<f32>) -> RbmResult<Array1<f32>> {
        check_len("visible sample", self.input_size(), sample.len())?;
        let v = sample.insert_axis(Axis(0));
        let mut h = Array2::zeros((1, self.output_size()));
        self.transform.forward(&self.params, v, h.view_mut())?;
        units::probabilities(self.config.hidden_unit, h.view_mut())
            .map_err(|_| RbmError::diverged(Phase::Evaluation))?;
        Ok(h.index_axis_move(Axis(0), 0))
    }

    /// Activate the hidden layer for a batch of visible rows.
    pub fn activate_hidden(
        &mut self,
        visible: ArrayView2<f32>,
        outputs: Outputs,
    ) -> RbmResult<Activation> {
        outputs.validate()?;
        check_len("visible batch", self.input_size(), visible.ncols())?;
        let mut probs = Array2::zeros((visible.nrows(), self.output_size()));
        self.transform.forward(&self.params, visible, probs.view_mut())?;
        self.finish_activation(self.config.hidden_unit, probs, outputs)
    }

    /// Activate the visible layer for a batch of hidden rows.
    pub fn activate_visible(
        &mut self,
        hidden: ArrayView2<f32>,
        outputs: Outputs,
    ) -> RbmResult<Activation> {
        outputs.validate()?;
        check_len("hidden batch", self.output_size(), hidden.ncols())?;
        let mut probs = Array2::zeros((hidden.nrows(), self.input_size()));
        self.transform.backward(&self.params, hidden, probs.view_mut())?;
        self.finish_activation(self.config.visible_unit, probs, outputs)
    }

    fn finish_activation(
        &mut self,
        unit: UnitType,
        mut probs: Array2<f32>,
        outputs: Outputs,
    ) -> RbmResult<Activation> {
        let mut samples = outputs.samples.then(|| Array2::zeros(probs.dim()));
        units::activate(
            unit,
            probs.view_mut(),
            samples.as_mut().map(|s| s.view_mut()),
            self.config.gaussian_sigma,
            &mut self.rng,
        )
        .map_err(|_| RbmError::diverged(Phase::Evaluation))?;
        Ok(Activation { probs, samples })
    }

    /// One up-down pass: sample the hidden layer, return visible probabilities.
    pub fn reconstruct(&mut self, visible: ArrayView2<f32>) -> RbmResult<Array2<f32>> {
        let hidden = self.activate_hidden(visible, Outputs::PROBS_AND_SAMPLES)?;
        let driver = hidden.samples.unwrap_or(hidden.probs);
        Ok(self.activate_visible(driver.view(), Outputs::PROBS)?.probs)
    }

    /// Energy of a joint configuration.
    pub fn energy(&self, visible: ArrayView1<f32>, hidden: ArrayView1<f32>) -> RbmResult<f32> {
        energy::energy(self.transform(), &self.params, &self.config, visible, hidden)
    }

    /// Free energy of a visible configuration (binary hidden units only).
    pub fn free_energy(&self, visible: ArrayView1<f32>) -> RbmResult<f32> {
        let batch = visible.insert_axis(Axis(0));
        let f = energy::free_energy_batch(self.transform(), &self.params, &self.config, batch)?;
        Ok(f[0])
    }

    /// Mean free energy over a dataset.
    pub fn mean_free_energy(&self, data: ArrayView2<f32>) -> RbmResult<f32> {
        if data.nrows() == 0 {
            return Err(RbmError::EmptyDataset);
        }
        let f = energy::free_energy_batch(self.transform(), &self.params, &self.config, data)?;
        Ok(f.mean().unwrap_or(0.0))
    }

    /// Set the visible biases from data statistics.
    ///
    /// Binary units get the log-odds of their mean activation, Gaussian units
    /// get the mean itself.
    pub fn init_visible_bias(&mut self, data: ArrayView2<f32>) -> RbmResult<()> {
        if data.nrows() == 0 {
            return Err(RbmError::EmptyDataset);
        }
        check_len("dataset", self.input_size(), data.ncols())?;
        let means = self.transform.visible_unit_activity(data) / data.nrows() as f32;
        self.params.c = match self.config.visible_unit {
            UnitType::Binary => means.mapv(|p| {
                let p = p.clamp(1e-3, 1.0 - 1e-3);
                (p / (1.0 - p)).ln()
            }),
            _ => means,
        };
        Ok(())
    }

    /// Train on `data` for `epochs` epochs; returns the last epoch's
    /// reconstruction error.
    pub fn train(&mut self, data: ArrayView2<f32>, epochs: usize) -> RbmResult<f32> {
        crate::training::train(self, data, epochs)
    }

    /// Train from corrupted `noisy` inputs toward `clean` targets.
    pub fn train_denoising(
        &mut self,
        noisy: ArrayView2<f32>,
        clean: ArrayView2<f32>,
        epochs: usize,
    ) -> RbmResult<f32> {
        crate::training::train_denoising(self, noisy, clean, epochs)
    }

    /// Restore the backup after a divergence, or flag the model corrupted.
    pub(crate) fn recover(&mut self, err: RbmError) -> RbmError {
        let RbmError::NumericDivergence { phase, .. } = err else {
            return err;
        };
        match self.backup.as_ref() {
            Some(backup) => {
                self.params.assign(backup);
                self.momentum = self.momentum.take().map(|mut m| {
                    m.fill(0.0);
                    m
                });
                tracing::warn!(%phase, "numeric divergence, parameters restored from backup");
                RbmError::NumericDivergence {
                    phase,
                    restored: true,
                }
            }
            None => {
                self.corrupted = true;
                tracing::warn!(%phase, "numeric divergence, no backup available");
                RbmError::NumericDivergence {
                    phase,
                    restored: false,
                }
            }
        }
    }
}
