//! Synthetic image fixtures shared by the integration tests.
//!
//! Each dataset is built from a handful of prototype images made of short,
//! two-pixel-thick strokes. Samples cycle through the prototypes and flip a
//! small fraction of pixels, which gives the models something with real
//! structure to learn without shipping an image dataset.

#![allow(dead_code)]

use ndarray::Array2;
use ndarray_rand::rand_distr::{Distribution, StandardNormal};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Parameters of a stroke dataset.
#[derive(Debug, Clone, Copy)]
pub struct Strokes {
    pub side: usize,
    pub samples: usize,
    pub classes: usize,
    pub flip: f64,
    pub seed: u64,
}

impl Default for Strokes {
    fn default() -> Self {
        Self {
            side: 28,
            samples: 100,
            classes: 10,
            flip: 0.01,
            seed: 7,
        }
    }
}

impl Strokes {
    pub fn side(side: usize) -> Self {
        Self {
            side,
            ..Self::default()
        }
    }

    /// Binary `(samples, side * side)` dataset.
    pub fn generate(&self) -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let protos = self.prototypes(&mut rng);
        let len = self.side * self.side;
        Array2::from_shape_fn((self.samples, len), |(n, i)| {
            let pixel = protos[(n % self.classes, i)];
            if rng.gen::<f64>() < self.flip {
                1.0 - pixel
            } else {
                pixel
            }
        })
    }

    /// The clean dataset plus a copy with additive Gaussian noise.
    pub fn generate_noisy(&self, noise: f32) -> (Array2<f32>, Array2<f32>) {
        let clean = self.generate();
        let mut rng = StdRng::seed_from_u64(self.seed ^ 0x5eed);
        let noisy = clean.mapv(|x| {
            let z: f32 = StandardNormal.sample(&mut rng);
            x + noise * z
        });
        (clean, noisy)
    }

    fn prototypes(&self, rng: &mut StdRng) -> Array2<f32> {
        let side = self.side;
        let mut protos = Array2::zeros((self.classes, side * side));
        let base = side * 2 / 7;
        for k in 0..self.classes {
            for _ in 0..3 {
                let horizontal = rng.gen_bool(0.5);
                let len = base + rng.gen_range(0..base.max(1));
                let (r, c) = if horizontal {
                    (rng.gen_range(0..side - 2), rng.gen_range(0..side - len))
                } else {
                    (rng.gen_range(0..side - len), rng.gen_range(0..side - 2))
                };
                for i in 0..len {
                    for t in 0..2 {
                        let (rr, cc) = if horizontal {
                            (r + t, c + i)
                        } else {
                            (r + i, c + t)
                        };
                        protos[(k, rr * side + cc)] = 1.0;
                    }
                }
            }
        }
        protos
    }
}

/// Fraction of "on" pixels.
pub fn density(data: &Array2<f32>) -> f32 {
    data.mean().unwrap_or(0.0)
}

/// Per-sample mean squared error between two datasets, averaged.
pub fn mean_squared_error(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
    let diff = a - b;
    diff.mapv(|d| d * d).mean().unwrap_or(0.0)
}
