//! Unit activation laws.
//!
//! Each unit kind maps a pre-activation `x` to an activation probability
//! (or mean) `a` and, on request, a stochastic sample `s`:
//!
//! ```text
//! binary     a = sigmoid(x)          s = bernoulli(a)
//! gaussian   a = x                   s = a + N(0, σ)
//! relu       a = max(x, 0)           s = max(x + N(0, sigmoid(x)), 0)
//! relu6/1    a = clamp(x, 0, B)      s = clamp(ranged_noise(x, B), 0, B)
//! ```
//!
//! Rectified samples are drawn from the pre-activation, so they are computed
//! before the buffer is overwritten with probabilities.

use ndarray::{ArrayViewMut2, Zip};
use rand::Rng;

use crate::config::UnitType;
use crate::core::{RbmError, RbmResult};
use crate::utils::{
    all_finite, bernoulli, logistic_noise, normal_noise, ranged_noise, relu, relu_bounded,
    sigmoid,
};

/// An activation produced a NaN or an infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("non-finite activation")]
pub struct NonFinite;

/// Which tensors an activation request must produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outputs {
    pub probabilities: bool,
    pub samples: bool,
}

impl Outputs {
    /// Probabilities only.
    pub const PROBS: Outputs = Outputs {
        probabilities: true,
        samples: false,
    };

    /// Probabilities and a stochastic sample.
    pub const PROBS_AND_SAMPLES: Outputs = Outputs {
        probabilities: true,
        samples: true,
    };

    /// Reject requests the activation laws cannot serve.
    ///
    /// # Errors
    /// `Configuration` for samples without probabilities or an empty request.
    pub fn validate(self) -> RbmResult<()> {
        if !self.probabilities {
            let msg = if self.samples {
                "sampling without probabilities is not supported"
            } else {
                "activation request produces no output"
            };
            return Err(RbmError::Configuration(msg.to_string()));
        }
        Ok(())
    }
}

/// Replace pre-activations with probabilities, without sampling.
///
/// # Errors
/// `NonFinite` if any pre-activation is NaN or infinite.
pub fn probabilities(unit: UnitType, mut x: ArrayViewMut2<f32>) -> Result<(), NonFinite> {
    if !all_finite(&x) {
        return Err(NonFinite);
    }
    apply_law(unit, x.view_mut());
    Ok(())
}

fn apply_law(unit: UnitType, mut x: ArrayViewMut2<f32>) {
    match unit {
        UnitType::Binary => x.mapv_inplace(sigmoid),
        UnitType::Gaussian => {}
        UnitType::Relu => x.mapv_inplace(relu),
        UnitType::Relu6 | UnitType::Relu1 => {
            let bound = unit.bound().unwrap_or(1.0);
            x.mapv_inplace(|v| relu_bounded(v, bound));
        }
    }
}

/// Activate a batch in place.
///
/// `x` holds pre-activations on entry and probabilities on return. When
/// `samples` is given it receives a stochastic sample of the same shape.
///
/// # Errors
/// `NonFinite` if any pre-activation or sample is NaN or infinite.
pub fn activate<R: Rng + ?Sized>(
    unit: UnitType,
    mut x: ArrayViewMut2<f32>,
    samples: Option<ArrayViewMut2<f32>>,
    sigma: f32,
    rng: &mut R,
) -> Result<(), NonFinite> {
    let mut samples = samples;

    // max() swallows NaN, so check before the rectifiers see it
    if !all_finite(&x) {
        return Err(NonFinite);
    }

    if let Some(s) = samples.as_mut() {
        match unit {
            UnitType::Relu => Zip::from(s.view_mut())
                .and(x.view())
                .for_each(|s, &x| *s = relu(logistic_noise(x, rng))),
            UnitType::Relu6 | UnitType::Relu1 => {
                let bound = unit.bound().unwrap_or(1.0);
                Zip::from(s.view_mut())
                    .and(x.view())
                    .for_each(|s, &x| *s = relu_bounded(ranged_noise(x, bound, rng), bound));
            }
            UnitType::Binary | UnitType::Gaussian => {}
        }
    }

    apply_law(unit, x.view_mut());

    if let Some(mut s) = samples {
        match unit {
            UnitType::Binary => Zip::from(s.view_mut())
                .and(x.view())
                .for_each(|s, &a| *s = bernoulli(a, rng)),
            UnitType::Gaussian => Zip::from(s.view_mut())
                .and(x.view())
                .for_each(|s, &a| *s = normal_noise(a, sigma, rng)),
            _ => {}
        }
        if !all_finite(&s) {
            return Err(NonFinite);
        }
    }

    Ok(())
}
