//! Convolutional transform with shared kernels.
//!
//! Visible rows are `(channels, vh, vw)` volumes, hidden rows are
//! `(filters, hh, hw)` feature maps with `hh = vh - kh + 1`. The weight
//! tensor is `(filters, channels, kh, kw)`.
//!
//! ```text
//! forward    h[k] = Σ_c  v[c] ⋆ W[k,c]  + b[k]     (valid cross-correlation)
//! backward   v[c] = Σ_k  h[k] ∗ W[k,c]  + c[c]     (full convolution)
//! ```
//!
//! The full convolution is the adjoint of the valid correlation, so the
//! reconstruction uses the same kernels without an explicit flip.
//!
//! Gradients are averaged over spatial positions: `W` and `b` statistics are
//! divided by `hh * hw`, `c` statistics by `vh * vw`.

use ndarray::{
    s, Array1, ArrayView2, ArrayView3, ArrayView4, ArrayViewMut2, ArrayViewMut3, ArrayViewMut4,
    Axis, Ix4, Zip,
};

use super::transform::{check_batch, Transform};
use super::{Params, RbmError, RbmResult};

/// Geometry of a convolutional layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvShape {
    pub channels: usize,
    pub visible: (usize, usize),
    pub filters: usize,
    pub kernel: (usize, usize),
}

impl ConvShape {
    pub fn new(
        channels: usize,
        visible: (usize, usize),
        filters: usize,
        kernel: (usize, usize),
    ) -> Self {
        Self {
            channels,
            visible,
            filters,
            kernel,
        }
    }

    /// Spatial size of each hidden feature map.
    pub fn hidden(&self) -> (usize, usize) {
        (
            self.visible.0 + 1 - self.kernel.0,
            self.visible.1 + 1 - self.kernel.1,
        )
    }

    fn visible_dim(&self) -> (usize, usize, usize) {
        (self.channels, self.visible.0, self.visible.1)
    }

    fn hidden_dim(&self) -> (usize, usize, usize) {
        let (hh, hw) = self.hidden();
        (self.filters, hh, hw)
    }
}

/// Valid cross-correlation: `out[k] = Σ_c v[c] ⋆ w[k,c]`.
///
/// `v` is `(C, VH, VW)`, `w` is `(K, C, KH, KW)`, `out` is `(K, HH, HW)` and
/// is overwritten.
pub fn correlate_valid(v: ArrayView3<f32>, w: ArrayView4<f32>, mut out: ArrayViewMut3<f32>) {
    let (filters, channels, kh, kw) = w.dim();
    let (_, hh, hw) = out.dim();
    out.fill(0.0);
    for k in 0..filters {
        let mut map = out.index_axis_mut(Axis(0), k);
        for c in 0..channels {
            for a in 0..kh {
                for b in 0..kw {
                    let window = v.slice(s![c, a..a + hh, b..b + hw]);
                    map.scaled_add(w[[k, c, a, b]], &window);
                }
            }
        }
    }
}

/// Full convolution: `out[c] = Σ_k h[k] ∗ w[k,c]`.
///
/// `h` is `(K, HH, HW)`, `out` is `(C, VH, VW)` and is overwritten.
pub fn convolve_full(h: ArrayView3<f32>, w: ArrayView4<f32>, mut out: ArrayViewMut3<f32>) {
    let (filters, channels, kh, kw) = w.dim();
    let (_, hh, hw) = h.dim();
    out.fill(0.0);
    for k in 0..filters {
        let map = h.index_axis(Axis(0), k);
        for c in 0..channels {
            for a in 0..kh {
                for b in 0..kw {
                    out.slice_mut(s![c, a..a + hh, b..b + hw])
                        .scaled_add(w[[k, c, a, b]], &map);
                }
            }
        }
    }
}

/// Kernel gradient: `gw[k,c,a,b] += scale * Σ_ij v[c, i+a, j+b] * h[k, i, j]`.
pub fn correlate_filters(
    v: ArrayView3<f32>,
    h: ArrayView3<f32>,
    scale: f32,
    mut gw: ArrayViewMut4<f32>,
) {
    let (filters, channels, kh, kw) = gw.dim();
    let (_, hh, hw) = h.dim();
    for k in 0..filters {
        let map = h.index_axis(Axis(0), k);
        for c in 0..channels {
            for a in 0..kh {
                for b in 0..kw {
                    let window = v.slice(s![c, a..a + hh, b..b + hw]);
                    let dot = Zip::from(&window)
                        .and(&map)
                        .fold(0.0f32, |acc, &x, &y| acc + x * y);
                    gw[[k, c, a, b]] += scale * dot;
                }
            }
        }
    }
}

/// Shared-kernel transform of a convolutional RBM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Convolutional {
    shape: ConvShape,
}

impl Convolutional {
    /// # Errors
    /// `Configuration` for empty dimensions or a kernel larger than the input.
    pub fn new(shape: ConvShape) -> RbmResult<Self> {
        let ConvShape {
            channels,
            visible,
            filters,
            kernel,
        } = shape;
        if channels == 0 || filters == 0 || kernel.0 == 0 || kernel.1 == 0 {
            return Err(RbmError::Configuration(
                "convolutional layers need at least one channel, filter and kernel cell".into(),
            ));
        }
        if kernel.0 > visible.0 || kernel.1 > visible.1 {
            return Err(RbmError::Configuration(format!(
                "kernel {}x{} does not fit visible map {}x{}",
                kernel.0, kernel.1, visible.0, visible.1
            )));
        }
        Ok(Self { shape })
    }

    pub fn shape(&self) -> ConvShape {
        self.shape
    }

    fn hidden_area(&self) -> usize {
        let (hh, hw) = self.shape.hidden();
        hh * hw
    }

    fn visible_area(&self) -> usize {
        self.shape.visible.0 * self.shape.visible.1
    }

    fn weights<'a>(&self, params: &'a Params) -> RbmResult<ArrayView4<'a, f32>> {
        Ok(params.w.view().into_dimensionality::<Ix4>()?)
    }
}

impl Transform for Convolutional {
    fn name(&self) -> &'static str {
        "conv"
    }

    fn describe(&self) -> String {
        let (c, vh, vw) = self.shape.visible_dim();
        let (k, hh, hw) = self.shape.hidden_dim();
        format!(
            "{c}x{vh}x{vw} -> {k}x{hh}x{hw} ({}x{} kernels)",
            self.shape.kernel.0, self.shape.kernel.1
        )
    }

    fn visible_len(&self) -> usize {
        self.shape.channels * self.visible_area()
    }

    fn hidden_len(&self) -> usize {
        self.shape.filters * self.hidden_area()
    }

    fn weight_shape(&self) -> Vec<usize> {
        vec![
            self.shape.filters,
            self.shape.channels,
            self.shape.kernel.0,
            self.shape.kernel.1,
        ]
    }

    fn hidden_bias_len(&self) -> usize {
        self.shape.filters
    }

    fn visible_bias_len(&self) -> usize {
        self.shape.channels
    }

    fn init_std(&self) -> f32 {
        0.01
    }

    fn forward(
        &self,
        params: &Params,
        v: ArrayView2<f32>,
        mut out: ArrayViewMut2<f32>,
    ) -> RbmResult<()> {
        check_batch(v.dim(), self.visible_len(), out.dim(), self.hidden_len())?;
        let w = self.weights(params)?;
        for (v_row, out_row) in v.outer_iter().zip(out.outer_iter_mut()) {
            let v3 = v_row.into_shape(self.shape.visible_dim())?;
            let mut h3 = out_row.into_shape(self.shape.hidden_dim())?;
            correlate_valid(v3, w, h3.view_mut());
            for (mut map, &bias) in h3.outer_iter_mut().zip(params.b.iter()) {
                map += bias;
            }
        }
        Ok(())
    }

    fn backward(
        &self,
        params: &Params,
        h: ArrayView2<f32>,
        mut out: ArrayViewMut2<f32>,
    ) -> RbmResult<()> {
        check_batch(h.dim(), self.hidden_len(), out.dim(), self.visible_len())?;
        let w = self.weights(params)?;
        for (h_row, out_row) in h.outer_iter().zip(out.outer_iter_mut()) {
            let h3 = h_row.into_shape(self.shape.hidden_dim())?;
            let mut v3 = out_row.into_shape(self.shape.visible_dim())?;
            convolve_full(h3, w, v3.view_mut());
            for (mut map, &bias) in v3.outer_iter_mut().zip(params.c.iter()) {
                map += bias;
            }
        }
        Ok(())
    }

    fn accumulate(
        &self,
        v: ArrayView2<f32>,
        h: ArrayView2<f32>,
        sign: f32,
        grads: &mut Params,
    ) -> RbmResult<()> {
        check_batch(v.dim(), self.visible_len(), h.dim(), self.hidden_len())?;
        let hidden_scale = sign / self.hidden_area() as f32;
        let mut gw = grads.w.view_mut().into_dimensionality::<Ix4>()?;
        for (v_row, h_row) in v.outer_iter().zip(h.outer_iter()) {
            let v3 = v_row.into_shape(self.shape.visible_dim())?;
            let h3 = h_row.into_shape(self.shape.hidden_dim())?;
            correlate_filters(v3, h3, hidden_scale, gw.view_mut());
        }
        grads.b.scaled_add(sign, &self.hidden_unit_activity(h));
        grads.c.scaled_add(sign, &self.visible_unit_activity(v));
        Ok(())
    }

    fn hidden_unit_activity(&self, h: ArrayView2<f32>) -> Array1<f32> {
        let (filters, hh, hw) = self.shape.hidden_dim();
        let totals = h.sum_axis(Axis(0));
        match totals.into_shape((filters, hh * hw)) {
            Ok(maps) => maps.sum_axis(Axis(1)) / (hh * hw) as f32,
            Err(_) => Array1::zeros(filters),
        }
    }

    fn visible_unit_activity(&self, v: ArrayView2<f32>) -> Array1<f32> {
        let (channels, vh, vw) = self.shape.visible_dim();
        let totals = v.sum_axis(Axis(0));
        match totals.into_shape((channels, vh * vw)) {
            Ok(maps) => maps.sum_axis(Axis(1)) / (vh * vw) as f32,
            Err(_) => Array1::zeros(channels),
        }
    }

    fn visible_bias_rep(&self, c: &Array1<f32>) -> Array1<f32> {
        let area = self.visible_area();
        c.iter()
            .flat_map(|&bias| std::iter::repeat(bias).take(area))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transform::Dense;
    use ndarray::{array, Array2, Array3, Array4, ArrayD, IxDyn};

    #[test]
    fn test_hidden_shape() {
        let shape = ConvShape::new(1, (28, 28), 20, (12, 12));
        assert_eq!(shape.hidden(), (17, 17));
        let conv = Convolutional::new(shape).unwrap();
        assert_eq!(conv.visible_len(), 784);
        assert_eq!(conv.hidden_len(), 20 * 17 * 17);
        assert_eq!(conv.describe(), "1x28x28 -> 20x17x17 (12x12 kernels)");
    }

    #[test]
    fn test_oversized_kernel_rejected() {
        let shape = ConvShape::new(1, (4, 4), 2, (5, 3));
        assert!(matches!(
            Convolutional::new(shape),
            Err(RbmError::Configuration(_))
        ));
    }

    #[test]
    fn test_correlate_valid_small() {
        let v = Array3::from_shape_vec((1, 3, 3), (1..=9).map(|x| x as f32).collect()).unwrap();
        let w = Array4::from_shape_vec((1, 1, 2, 2), vec![1.0, 0.0, 0.0, -1.0]).unwrap();
        let mut out = Array3::zeros((1, 2, 2));
        correlate_valid(v.view(), w.view(), out.view_mut());
        // v[i][j] - v[i+1][j+1] = -4 everywhere
        assert!(out.iter().all(|&x| x == -4.0));
    }

    #[test]
    fn test_full_is_adjoint_of_valid() {
        // <correlate_valid(v), h> == <v, convolve_full(h)>
        let v = Array3::from_shape_fn((2, 4, 5), |(c, i, j)| (c + 2 * i + j) as f32 * 0.1 - 0.5);
        let w = Array4::from_shape_fn((3, 2, 2, 3), |(k, c, a, b)| {
            ((k * 7 + c * 5 + a * 3 + b) % 5) as f32 * 0.2 - 0.4
        });
        let h = Array3::from_shape_fn((3, 3, 3), |(k, i, j)| ((k + i * j) % 4) as f32 * 0.25);

        let mut fwd = Array3::zeros((3, 3, 3));
        correlate_valid(v.view(), w.view(), fwd.view_mut());
        let mut bwd = Array3::zeros((2, 4, 5));
        convolve_full(h.view(), w.view(), bwd.view_mut());

        let lhs: f32 = (&fwd * &h).sum();
        let rhs: f32 = (&v * &bwd).sum();
        approx::assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-4);
    }

    #[test]
    fn test_unit_kernel_matches_dense() {
        // A 1x1 kernel over one channel is a dense layer with W = w * I.
        let scale = 0.7f32;
        let conv = Convolutional::new(ConvShape::new(1, (2, 3), 1, (1, 1))).unwrap();
        let conv_params = Params {
            w: ArrayD::from_elem(IxDyn(&[1, 1, 1, 1]), scale),
            b: array![0.25],
            c: array![-0.5],
        };

        let dense = Dense::new(6, 6).unwrap();
        let eye = Array2::<f32>::eye(6) * scale;
        let dense_params = Params {
            w: eye.into_dyn(),
            b: Array1::from_elem(6, 0.25),
            c: Array1::from_elem(6, -0.5),
        };

        let v = array![[1.0f32, 0.0, 1.0, 1.0, 0.0, 0.5]];
        let mut h_conv = Array2::zeros((1, 6));
        let mut h_dense = Array2::zeros((1, 6));
        conv.forward(&conv_params, v.view(), h_conv.view_mut()).unwrap();
        dense.forward(&dense_params, v.view(), h_dense.view_mut()).unwrap();

        let mut v_conv = Array2::zeros((1, 6));
        let mut v_dense = Array2::zeros((1, 6));
        conv.backward(&conv_params, h_conv.view(), v_conv.view_mut()).unwrap();
        dense.backward(&dense_params, h_dense.view(), v_dense.view_mut()).unwrap();

        for (a, b) in h_conv.iter().zip(h_dense.iter()) {
            approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
        for (a, b) in v_conv.iter().zip(v_dense.iter()) {
            approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_accumulate_averages_positions() {
        let conv = Convolutional::new(ConvShape::new(1, (2, 2), 1, (1, 1))).unwrap();
        let mut grads = Params::zeros(&conv.weight_shape(), 1, 1);
        let v = array![[1.0f32, 1.0, 0.0, 0.0]];
        let h = array![[1.0f32, 0.0, 1.0, 1.0]];
        conv.accumulate(v.view(), h.view(), 1.0, &mut grads).unwrap();
        // Σ v*h = 1 over 4 positions
        approx::assert_abs_diff_eq!(grads.w[[0, 0, 0, 0]], 0.25, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(grads.b[0], 0.75, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(grads.c[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_visible_bias_rep() {
        let conv = Convolutional::new(ConvShape::new(2, (1, 2), 1, (1, 1))).unwrap();
        let rep = conv.visible_bias_rep(&array![1.0, -1.0]);
        assert_eq!(rep, array![1.0, 1.0, -1.0, -1.0]);
    }
}
