//! Math utilities, noise laws, and finiteness checks.

use ndarray::{ArrayBase, Data, Dimension};
use ndarray_rand::rand_distr::{Distribution, StandardNormal};
use rand::Rng;

/// Logistic sigmoid: 1 / (1 + e^-x).
///
/// Evaluated on the side that cannot overflow `exp`.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Softplus: ln(1 + e^x), stable for large |x|.
#[inline]
pub fn softplus(x: f32) -> f32 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// Rectifier: max(x, 0).
#[inline]
pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

/// Bounded rectifier: clamp(x, 0, bound).
#[inline]
pub fn relu_bounded(x: f32, bound: f32) -> f32 {
    x.max(0.0).min(bound)
}

/// Draw 1.0 with probability `p`, else 0.0.
#[inline]
pub fn bernoulli<R: Rng + ?Sized>(p: f32, rng: &mut R) -> f32 {
    if rng.gen::<f32>() < p {
        1.0
    } else {
        0.0
    }
}

/// `x + N(0, sigma)`.
#[inline]
pub fn normal_noise<R: Rng + ?Sized>(x: f32, sigma: f32, rng: &mut R) -> f32 {
    let z: f32 = StandardNormal.sample(rng);
    x + sigma * z
}

/// Noisy-rectifier noise: `x + N(0, sigmoid(x))`, the variance being the
/// sigmoid of the pre-activation.
#[inline]
pub fn logistic_noise<R: Rng + ?Sized>(x: f32, rng: &mut R) -> f32 {
    normal_noise(x, sigmoid(x).sqrt(), rng)
}

/// `x + N(0, 1)`, except at the edges of `[0, bound]` where no noise is added.
#[inline]
pub fn ranged_noise<R: Rng + ?Sized>(x: f32, bound: f32, rng: &mut R) -> f32 {
    if x == 0.0 || x == bound {
        x
    } else {
        normal_noise(x, 1.0, rng)
    }
}

/// Whether every element is neither NaN nor infinite.
pub fn all_finite<S, D>(a: &ArrayBase<S, D>) -> bool
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    a.iter().all(|v| v.is_finite())
}

/// Euclidean norm over all elements.
pub fn l2_norm<S, D>(a: &ArrayBase<S, D>) -> f32
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    a.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Sign with sign(0) = 0.
#[inline]
pub fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(100.0) <= 1.0);
        assert!(sigmoid(-100.0) >= 0.0);
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_softplus() {
        assert!((softplus(0.0) - 2f32.ln()).abs() < 1e-6);
        assert!((softplus(50.0) - 50.0).abs() < 1e-4);
        assert!(softplus(-50.0) >= 0.0);
        assert!(softplus(-50.0) < 1e-6);
    }

    #[test]
    fn test_rectifiers() {
        assert_eq!(relu(-1.0), 0.0);
        assert_eq!(relu(2.5), 2.5);
        assert_eq!(relu_bounded(7.0, 6.0), 6.0);
        assert_eq!(relu_bounded(0.5, 1.0), 0.5);
        assert_eq!(relu_bounded(-0.5, 1.0), 0.0);
    }

    #[test]
    fn test_bernoulli_extremes() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            assert_eq!(bernoulli(0.0, &mut rng), 0.0);
            assert_eq!(bernoulli(1.0, &mut rng), 1.0);
        }
    }

    #[test]
    fn test_ranged_noise_edges_untouched() {
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(ranged_noise(0.0, 6.0, &mut rng), 0.0);
        assert_eq!(ranged_noise(6.0, 6.0, &mut rng), 6.0);
    }

    #[test]
    fn test_norm_and_finite() {
        let a = array![3.0f32, 4.0];
        assert!((l2_norm(&a) - 5.0).abs() < 1e-6);
        assert!(all_finite(&a));
        let b = array![1.0f32, f32::NAN];
        assert!(!all_finite(&b));
    }

    #[test]
    fn test_sign() {
        assert_eq!(sign(-0.3), -1.0);
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(2.0), 1.0);
    }
}
