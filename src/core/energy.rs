//! Energy and free energy.
//!
//! With `x = W * v + b` the hidden pre-activation:
//!
//! ```text
//! binary visible      E(v,h) = -c·v         - h·x
//! gaussian visible    E(v,h) = Σ (v-c)²/2   - h·x
//! binary hidden       F(v)   = visible term - Σ softplus(x)
//! ```
//!
//! Rectified hidden units have no closed-form free energy; those
//! combinations return `Unsupported` rather than a placeholder value.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

use super::transform::Transform;
use super::{check_len, Params, Phase, RbmError, RbmResult};
use crate::config::{Config, UnitType};
use crate::utils::softplus;

/// Visible-only energy term for one sample, given the expanded biases.
fn visible_term(unit: UnitType, v: ArrayView1<f32>, c: &Array1<f32>) -> RbmResult<f32> {
    match unit {
        UnitType::Binary => Ok(-v.dot(c)),
        UnitType::Gaussian => Ok(Zip::from(&v)
            .and(c)
            .fold(0.0f32, |acc, &x, &bias| acc + 0.5 * (x - bias) * (x - bias))),
        other => Err(RbmError::Unsupported(format!(
            "energy with {other} visible units"
        ))),
    }
}

fn finite(value: f32) -> RbmResult<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(RbmError::diverged(Phase::Evaluation))
    }
}

/// Energy of the joint configuration `(v, h)`.
///
/// # Errors
/// - `DimensionMismatch` if `v` or `h` has the wrong length
/// - `Unsupported` for rectified hidden units
/// - `NumericDivergence` if the result is not finite
pub fn energy(
    transform: &dyn Transform,
    params: &Params,
    config: &Config,
    v: ArrayView1<f32>,
    h: ArrayView1<f32>,
) -> RbmResult<f32> {
    check_len("visible sample", transform.visible_len(), v.len())?;
    check_len("hidden sample", transform.hidden_len(), h.len())?;
    if config.hidden_unit != UnitType::Binary {
        return Err(RbmError::Unsupported(format!(
            "energy with {} hidden units",
            config.hidden_unit
        )));
    }

    let mut x = Array2::zeros((1, transform.hidden_len()));
    transform.forward(params, v.insert_axis(Axis(0)), x.view_mut())?;

    let c = transform.visible_bias_rep(&params.c);
    let e = visible_term(config.visible_unit, v, &c)? - h.dot(&x.row(0));
    finite(e)
}

/// Free energy of every row of `data`.
///
/// # Errors
/// Same as [`energy`].
pub fn free_energy_batch(
    transform: &dyn Transform,
    params: &Params,
    config: &Config,
    data: ArrayView2<f32>,
) -> RbmResult<Array1<f32>> {
    check_len("visible batch", transform.visible_len(), data.ncols())?;
    if config.hidden_unit != UnitType::Binary {
        return Err(RbmError::Unsupported(format!(
            "free energy with {} hidden units",
            config.hidden_unit
        )));
    }

    let mut x = Array2::zeros((data.nrows(), transform.hidden_len()));
    transform.forward(params, data, x.view_mut())?;

    let c = transform.visible_bias_rep(&params.c);
    let mut out = Array1::zeros(data.nrows());
    for ((slot, v), x_row) in out.iter_mut().zip(data.outer_iter()).zip(x.outer_iter()) {
        let hidden_term: f32 = x_row.iter().map(|&xj| softplus(xj)).sum();
        *slot = finite(visible_term(config.visible_unit, v, &c)? - hidden_term)?;
    }
    Ok(out)
}
