//! Training configuration: unit kinds, regularization, and scheduling options.
//!
//! A [`Config`] is resolved once (from code or a TOML file), validated when the
//! [`Rbm`](crate::Rbm) is built, and never mutated afterwards.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{RbmError, RbmResult};

/// Kind of a visible or hidden unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    /// Stochastic binary unit, `p = sigmoid(x)`.
    Binary,
    /// Linear unit with Gaussian noise (visible side only).
    Gaussian,
    /// Noisy rectified linear unit.
    Relu,
    /// Rectified linear unit capped at 6.
    Relu6,
    /// Rectified linear unit capped at 1.
    Relu1,
}

impl UnitType {
    /// Upper bound of a capped rectifier.
    pub fn bound(self) -> Option<f32> {
        match self {
            UnitType::Relu6 => Some(6.0),
            UnitType::Relu1 => Some(1.0),
            _ => None,
        }
    }

    pub fn is_relu(self) -> bool {
        matches!(self, UnitType::Relu | UnitType::Relu6 | UnitType::Relu1)
    }

    /// Whether this kind may be used on the visible layer.
    pub fn valid_visible(self) -> bool {
        matches!(self, UnitType::Binary | UnitType::Gaussian)
    }

    /// Whether this kind may be used on the hidden layer.
    pub fn valid_hidden(self) -> bool {
        self == UnitType::Binary || self.is_relu()
    }

    pub fn name(self) -> &'static str {
        match self {
            UnitType::Binary => "binary",
            UnitType::Gaussian => "gaussian",
            UnitType::Relu => "relu",
            UnitType::Relu6 => "relu6",
            UnitType::Relu1 => "relu1",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Weight decay applied to the gradient before scaling by the learning rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayType {
    #[default]
    None,
    /// `λ·sign(W)` on the weights.
    L1,
    /// `λ·W` on the weights.
    L2,
    /// L1 on weights and biases.
    L1Full,
    /// L2 on weights and biases.
    L2Full,
}

impl DecayType {
    /// Whether the biases are decayed too.
    pub fn decays_biases(self) -> bool {
        matches!(self, DecayType::L1Full | DecayType::L2Full)
    }
}

/// How hidden-unit sparsity is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SparsityMethod {
    #[default]
    None,
    /// One running activation average shared by every hidden unit.
    GlobalTarget,
    /// One running activation average and penalty per hidden unit.
    LocalTarget,
}

/// Resolved training hyperparameters.
///
/// Every field has a default, so a TOML file only needs the options it changes:
///
/// ```
/// let config = rbm::Config::from_toml_str(r#"
///     hidden_unit = "relu"
///     batch_size = 10
///     momentum = true
///     weight_decay = "l2_full"
/// "#).unwrap();
/// assert_eq!(config.batch_size, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub visible_unit: UnitType,
    pub hidden_unit: UnitType,
    pub batch_size: usize,
    pub learning_rate: f32,

    pub momentum: bool,
    pub initial_momentum: f32,
    pub final_momentum: f32,
    /// First epoch (0-based) that uses `final_momentum`.
    pub final_momentum_epoch: usize,

    pub weight_decay: DecayType,
    /// Decay coefficient for the weights.
    pub weight_cost: f32,
    /// Decay coefficient for the biases (`l1_full` / `l2_full` only).
    pub bias_cost: f32,

    pub sparsity: SparsityMethod,
    pub sparsity_target: f32,
    pub sparsity_cost: f32,
    /// Weight of the newest batch in the running activation average.
    pub sparsity_rate: f32,

    pub clip_gradients: bool,
    /// Maximum L2 norm of each parameter update.
    pub gradient_clip: f32,

    pub shuffle: bool,
    /// Gibbs alternations per sample (the k of CD-k).
    pub cd_steps: usize,
    pub parallel: bool,

    /// Standard deviation of the noise added when sampling Gaussian visible units.
    /// Visible precision is assumed to be folded into the data.
    pub gaussian_sigma: f32,
    /// Keep a snapshot of the parameters so a diverged update can be rolled back.
    pub backup: bool,
    /// Initialise visible biases from data statistics at session start.
    pub init_visible_bias: bool,
    /// Record the mean free energy of the dataset after every epoch.
    pub free_energy: bool,
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            visible_unit: UnitType::Binary,
            hidden_unit: UnitType::Binary,
            batch_size: 25,
            learning_rate: 0.1,
            momentum: false,
            initial_momentum: 0.5,
            final_momentum: 0.9,
            final_momentum_epoch: 6,
            weight_decay: DecayType::None,
            weight_cost: 0.0002,
            bias_cost: 0.0002,
            sparsity: SparsityMethod::None,
            sparsity_target: 0.01,
            sparsity_cost: 1.0,
            sparsity_rate: 0.01,
            clip_gradients: false,
            gradient_clip: 5.0,
            shuffle: false,
            cd_steps: 1,
            parallel: false,
            gaussian_sigma: 1.0,
            backup: false,
            init_visible_bias: false,
            free_energy: false,
            seed: None,
        }
    }
}

impl Config {
    /// Defaults for a unit pair, with a smaller learning rate for the
    /// unbounded (Gaussian visible, rectified hidden) kinds.
    pub fn for_units(visible_unit: UnitType, hidden_unit: UnitType) -> Self {
        let learning_rate = if visible_unit == UnitType::Gaussian || hidden_unit.is_relu() {
            0.01
        } else {
            0.1
        };
        Self {
            visible_unit,
            hidden_unit,
            learning_rate,
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(toml_str: &str) -> RbmResult<Self> {
        let config: Config = toml::from_str(toml_str)
            .map_err(|e| RbmError::Configuration(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> RbmResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Momentum coefficient in effect during `epoch`.
    pub fn momentum_at(&self, epoch: usize) -> f32 {
        if epoch < self.final_momentum_epoch {
            self.initial_momentum
        } else {
            self.final_momentum
        }
    }

    /// Check the unit pair and every numeric option.
    ///
    /// # Errors
    /// `Configuration` naming the first offending option.
    pub fn validate(&self) -> RbmResult<()> {
        if !self.visible_unit.valid_visible() || !self.hidden_unit.valid_hidden() {
            return Err(RbmError::Configuration(format!(
                "unsupported unit combination: visible={} hidden={}",
                self.visible_unit, self.hidden_unit
            )));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be at least 1"));
        }
        if self.cd_steps == 0 {
            return Err(invalid("cd_steps must be at least 1"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(invalid("learning_rate must be positive and finite"));
        }
        for (name, m) in [
            ("initial_momentum", self.initial_momentum),
            ("final_momentum", self.final_momentum),
        ] {
            if !(0.0..1.0).contains(&m) {
                return Err(invalid(&format!("{name} must lie in [0, 1)")));
            }
        }
        for (name, cost) in [
            ("weight_cost", self.weight_cost),
            ("bias_cost", self.bias_cost),
            ("sparsity_cost", self.sparsity_cost),
        ] {
            if !(cost.is_finite() && cost >= 0.0) {
                return Err(invalid(&format!("{name} must be non-negative and finite")));
            }
        }
        if self.sparsity != SparsityMethod::None {
            if !(self.sparsity_target > 0.0 && self.sparsity_target < 1.0) {
                return Err(invalid("sparsity_target must lie in (0, 1)"));
            }
            if !(self.sparsity_rate > 0.0 && self.sparsity_rate <= 1.0) {
                return Err(invalid("sparsity_rate must lie in (0, 1]"));
            }
        }
        if self.clip_gradients && !(self.gradient_clip.is_finite() && self.gradient_clip > 0.0) {
            return Err(invalid("gradient_clip must be positive and finite"));
        }
        if self.free_energy && self.hidden_unit != UnitType::Binary {
            return Err(invalid("free_energy monitoring needs binary hidden units"));
        }
        if !(self.gaussian_sigma.is_finite() && self.gaussian_sigma > 0.0) {
            return Err(invalid("gaussian_sigma must be positive and finite"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> RbmError {
    RbmError::Configuration(msg.to_string())
}
