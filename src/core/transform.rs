//! The linear map between layers.
//!
//! A [`Transform`] knows how the weight tensor connects a visible batch to a
//! hidden batch and back. Everything else about training (unit laws, the
//! Gibbs chain, the update rule) is shared between dense and convolutional
//! models and lives elsewhere.
//!
//! Batches are row-major `(rows, len)` matrices. Convolutional transforms
//! reinterpret each row as a `(channels, height, width)` volume.

use ndarray::linalg::general_mat_mul;
use ndarray::{Array1, ArrayView2, ArrayViewMut2, Axis, Ix2};

use super::{check_len, Params, RbmError, RbmResult};

/// Connects visible and hidden batches through the model weights.
pub trait Transform: Send + Sync {
    /// Short kind name: `"dense"` or `"conv"`.
    fn name(&self) -> &'static str;

    /// Human-readable layer sizes, e.g. `784 -> 100`.
    fn describe(&self) -> String;

    fn visible_len(&self) -> usize;
    fn hidden_len(&self) -> usize;

    /// Shape of `W`.
    fn weight_shape(&self) -> Vec<usize>;

    /// Number of hidden biases (units, or filters).
    fn hidden_bias_len(&self) -> usize;

    /// Number of visible biases (units, or channels).
    fn visible_bias_len(&self) -> usize;

    /// Standard deviation of the initial weights.
    fn init_std(&self) -> f32;

    /// `out = W * v + b` for every row of `v`.
    fn forward(
        &self,
        params: &Params,
        v: ArrayView2<f32>,
        out: ArrayViewMut2<f32>,
    ) -> RbmResult<()>;

    /// `out = W' * h + c` for every row of `h`.
    fn backward(
        &self,
        params: &Params,
        h: ArrayView2<f32>,
        out: ArrayViewMut2<f32>,
    ) -> RbmResult<()>;

    /// `grads += sign * (v ⊗ h, h, v)` summed over rows.
    fn accumulate(
        &self,
        v: ArrayView2<f32>,
        h: ArrayView2<f32>,
        sign: f32,
        grads: &mut Params,
    ) -> RbmResult<()>;

    /// Per hidden bias: activity summed over rows, averaged within a row.
    fn hidden_unit_activity(&self, h: ArrayView2<f32>) -> Array1<f32>;

    /// Per visible bias: activity summed over rows, averaged within a row.
    fn visible_unit_activity(&self, v: ArrayView2<f32>) -> Array1<f32>;

    /// Visible biases expanded to one entry per visible unit.
    fn visible_bias_rep(&self, c: &Array1<f32>) -> Array1<f32>;
}

/// Fail unless a batch has the expected number of columns and the output
/// has the expected shape.
pub(crate) fn check_batch(
    input: (usize, usize),
    input_len: usize,
    output: (usize, usize),
    output_len: usize,
) -> RbmResult<()> {
    check_len("batch input", input_len, input.1)?;
    check_len("batch output", output_len, output.1)?;
    check_len("batch rows", input.0, output.0)
}

/// Fully connected visible-hidden weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dense {
    num_visible: usize,
    num_hidden: usize,
}

impl Dense {
    pub fn new(num_visible: usize, num_hidden: usize) -> RbmResult<Self> {
        if num_visible == 0 || num_hidden == 0 {
            return Err(RbmError::Configuration(
                "dense layers need at least one visible and one hidden unit".into(),
            ));
        }
        Ok(Self {
            num_visible,
            num_hidden,
        })
    }
}

impl Transform for Dense {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn describe(&self) -> String {
        format!("{} -> {}", self.num_visible, self.num_hidden)
    }

    fn visible_len(&self) -> usize {
        self.num_visible
    }

    fn hidden_len(&self) -> usize {
        self.num_hidden
    }

    fn weight_shape(&self) -> Vec<usize> {
        vec![self.num_visible, self.num_hidden]
    }

    fn hidden_bias_len(&self) -> usize {
        self.num_hidden
    }

    fn visible_bias_len(&self) -> usize {
        self.num_visible
    }

    fn init_std(&self) -> f32 {
        0.1
    }

    fn forward(
        &self,
        params: &Params,
        v: ArrayView2<f32>,
        mut out: ArrayViewMut2<f32>,
    ) -> RbmResult<()> {
        check_batch(v.dim(), self.num_visible, out.dim(), self.num_hidden)?;
        let w = params.w.view().into_dimensionality::<Ix2>()?;
        general_mat_mul(1.0, &v, &w, 0.0, &mut out);
        out += &params.b;
        Ok(())
    }

    fn backward(
        &self,
        params: &Params,
        h: ArrayView2<f32>,
        mut out: ArrayViewMut2<f32>,
    ) -> RbmResult<()> {
        check_batch(h.dim(), self.num_hidden, out.dim(), self.num_visible)?;
        let w = params.w.view().into_dimensionality::<Ix2>()?;
        general_mat_mul(1.0, &h, &w.t(), 0.0, &mut out);
        out += &params.c;
        Ok(())
    }

    fn accumulate(
        &self,
        v: ArrayView2<f32>,
        h: ArrayView2<f32>,
        sign: f32,
        grads: &mut Params,
    ) -> RbmResult<()> {
        check_batch(v.dim(), self.num_visible, h.dim(), self.num_hidden)?;
        let mut gw = grads.w.view_mut().into_dimensionality::<Ix2>()?;
        general_mat_mul(sign, &v.t(), &h, 1.0, &mut gw);
        grads.b.scaled_add(sign, &h.sum_axis(Axis(0)));
        grads.c.scaled_add(sign, &v.sum_axis(Axis(0)));
        Ok(())
    }

    fn hidden_unit_activity(&self, h: ArrayView2<f32>) -> Array1<f32> {
        h.sum_axis(Axis(0))
    }

    fn visible_unit_activity(&self, v: ArrayView2<f32>) -> Array1<f32> {
        v.sum_axis(Axis(0))
    }

    fn visible_bias_rep(&self, c: &Array1<f32>) -> Array1<f32> {
        c.clone()
    }
}
