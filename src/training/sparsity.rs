//! Running estimate of hidden activity for the sparsity penalty.

use ndarray::Array1;

use crate::config::SparsityMethod;

/// Exponential moving average `q` of positive-phase hidden activity.
///
/// `GlobalTarget` tracks one scalar for the whole layer, `LocalTarget` one
/// value per hidden bias. The first batch seeds `q` directly.
#[derive(Debug, Clone, PartialEq)]
pub struct SparsityState {
    method: SparsityMethod,
    q: Array1<f32>,
    seeded: bool,
}

impl SparsityState {
    pub fn new(method: SparsityMethod, hidden_biases: usize) -> Self {
        let len = match method {
            SparsityMethod::LocalTarget => hidden_biases,
            _ => 1,
        };
        Self {
            method,
            q: Array1::zeros(len),
            seeded: false,
        }
    }

    pub fn method(&self) -> SparsityMethod {
        self.method
    }

    /// Current estimate: one element (global) or one per hidden bias (local).
    pub fn q(&self) -> &Array1<f32> {
        &self.q
    }

    /// Fold a batch's mean hidden activity into `q`.
    ///
    /// ```text
    /// q = (1 - rate) * q + rate * mean_activity
    /// ```
    pub fn update(&mut self, hidden_mean: &Array1<f32>, rate: f32) {
        let observed = match self.method {
            SparsityMethod::LocalTarget => hidden_mean.clone(),
            _ => Array1::from_elem(1, hidden_mean.mean().unwrap_or(0.0)),
        };
        if self.seeded {
            self.q *= 1.0 - rate;
            self.q.scaled_add(rate, &observed);
        } else {
            self.q = observed;
            self.seeded = true;
        }
    }

    /// Hidden bias correction `scale * (target - q)`, one entry per bias.
    pub fn correction(&self, target: f32, scale: f32, hidden_biases: usize) -> Array1<f32> {
        match self.method {
            SparsityMethod::LocalTarget => self.q.mapv(|q| scale * (target - q)),
            _ => {
                let q = self.q.first().copied().unwrap_or(target);
                Array1::from_elem(hidden_biases, scale * (target - q))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_first_batch_seeds() {
        let mut state = SparsityState::new(SparsityMethod::GlobalTarget, 3);
        state.update(&array![0.2, 0.4, 0.6], 0.01);
        approx::assert_abs_diff_eq!(state.q()[0], 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_moving_average() {
        let mut state = SparsityState::new(SparsityMethod::LocalTarget, 2);
        state.update(&array![0.5, 0.1], 0.1);
        state.update(&array![1.0, 0.1], 0.1);
        approx::assert_abs_diff_eq!(state.q()[0], 0.55, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(state.q()[1], 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_correction_direction() {
        let mut global = SparsityState::new(SparsityMethod::GlobalTarget, 4);
        global.update(&array![0.5, 0.5, 0.5, 0.5], 0.01);
        let corr = global.correction(0.1, 1.0, 4);
        assert_eq!(corr.len(), 4);
        assert!(corr.iter().all(|&d| d < 0.0));

        let mut local = SparsityState::new(SparsityMethod::LocalTarget, 2);
        local.update(&array![0.0, 0.5], 0.01);
        let corr = local.correction(0.1, 2.0, 2);
        approx::assert_abs_diff_eq!(corr[0], 0.2, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(corr[1], -0.8, epsilon = 1e-6);
    }
}
