//! Dataset checks, epoch ordering, and minibatch assembly.
//!
//! A dataset is a `(samples, visible_len)` matrix. Convolutional models read
//! each row as a flattened `(channels, height, width)` volume.

use ndarray::{ArrayView2, ArrayViewMut2};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::core::{check_len, RbmError, RbmResult};

/// Reject an empty dataset or one whose rows do not match the model.
pub fn check_dataset(data: ArrayView2<f32>, visible_len: usize) -> RbmResult<()> {
    if data.nrows() == 0 {
        return Err(RbmError::EmptyDataset);
    }
    check_len("sample length", visible_len, data.ncols())
}

/// Reject denoising targets that do not pair up with the inputs.
pub fn check_targets(inputs: ArrayView2<f32>, targets: ArrayView2<f32>) -> RbmResult<()> {
    check_len("target count", inputs.nrows(), targets.nrows())?;
    check_len("target length", inputs.ncols(), targets.ncols())
}

/// Reset `order` to `0..samples`, fully shuffled when requested.
pub fn epoch_order<R: Rng + ?Sized>(
    order: &mut Vec<usize>,
    samples: usize,
    shuffle: bool,
    rng: &mut R,
) {
    order.clear();
    order.extend(0..samples);
    if shuffle {
        order.shuffle(rng);
    }
}

/// Copy the rows named by `indices` into the leading rows of `dest`.
pub fn gather_rows(source: ArrayView2<f32>, indices: &[usize], mut dest: ArrayViewMut2<f32>) {
    for (slot, &index) in indices.iter().enumerate() {
        dest.row_mut(slot).assign(&source.row(index));
    }
}

/// Number of minibatches an epoch of `samples` is split into.
pub fn batch_count(samples: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        samples.div_ceil(batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_check_dataset() {
        let data = Array2::<f32>::zeros((3, 4));
        assert!(check_dataset(data.view(), 4).is_ok());
        assert!(matches!(
            check_dataset(data.view(), 5),
            Err(RbmError::DimensionMismatch {
                expected: 5,
                found: 4,
                ..
            })
        ));
        let empty = Array2::<f32>::zeros((0, 4));
        assert!(matches!(
            check_dataset(empty.view(), 4),
            Err(RbmError::EmptyDataset)
        ));
    }

    #[test]
    fn test_check_targets() {
        let inputs = Array2::<f32>::zeros((3, 4));
        let short = Array2::<f32>::zeros((2, 4));
        assert!(check_targets(inputs.view(), inputs.view()).is_ok());
        assert!(check_targets(inputs.view(), short.view()).is_err());
    }

    #[test]
    fn test_epoch_order_is_permutation() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut order = Vec::new();
        epoch_order(&mut order, 10, false, &mut rng);
        assert_eq!(order, (0..10).collect::<Vec<_>>());

        epoch_order(&mut order, 10, true, &mut rng);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_gather_rows() {
        let source = array![[1.0f32, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let mut dest = Array2::zeros((3, 2));
        gather_rows(source.view(), &[2, 0], dest.view_mut());
        assert_eq!(dest, array![[3.0, 3.0], [1.0, 1.0], [0.0, 0.0]]);
    }

    #[test]
    fn test_batch_count_short_last_batch() {
        assert_eq!(batch_count(100, 25), 4);
        assert_eq!(batch_count(101, 25), 5);
        assert_eq!(batch_count(3, 10), 1);
    }
}
