//! Convolutional RBM training and geometry.

mod common;

use common::Strokes;
use ndarray::Array2;
use rbm::{train_with, Config, ConvShape, EpochMetrics, Outputs, Rbm, RbmError, SparsityMethod};

const EPOCHS: usize = 25;

fn shape() -> ConvShape {
    ConvShape::new(1, (12, 12), 10, (5, 5))
}

fn config() -> Config {
    Config {
        learning_rate: 1.0,
        seed: Some(42),
        ..Config::default()
    }
}

fn history(rbm: &mut Rbm, data: &Array2<f32>, epochs: usize) -> Vec<EpochMetrics> {
    let mut history: Vec<EpochMetrics> = Vec::new();
    train_with(rbm, data.view(), None, epochs, &mut history, |_| false)
        .expect("training failed");
    history
}

#[test]
fn test_conv_geometry() {
    let rbm = Rbm::convolutional(ConvShape::new(1, (28, 28), 20, (12, 12)), config()).unwrap();
    assert_eq!(rbm.input_size(), 784);
    assert_eq!(rbm.output_size(), 20 * 17 * 17);
    assert_eq!(rbm.parameter_count(), 20 * 12 * 12);
    assert_eq!(rbm.params.b.len(), 20);
    assert_eq!(rbm.params.c.len(), 1);
    assert!(rbm.to_string().contains("1x28x28 -> 20x17x17"));
}

#[test]
fn test_kernel_larger_than_input_rejected() {
    let result = Rbm::convolutional(ConvShape::new(1, (4, 4), 2, (5, 5)), config());
    assert!(matches!(result, Err(RbmError::Configuration(_))));
}

#[test]
fn test_conv_binary_converges() {
    let data = Strokes::side(12).generate();
    let mut rbm = Rbm::convolutional(shape(), config()).unwrap();

    let epochs = history(&mut rbm, &data, EPOCHS);
    let first = epochs[0].reconstruction_error;
    let last = epochs[EPOCHS - 1].reconstruction_error;
    assert!(last < 8e-2, "final error {last}");
    assert!(last < first, "error went from {first} to {last}");
    assert!(rbm.params.is_finite());
}

#[test]
fn test_conv_momentum_decreases_error() {
    let data = Strokes::side(12).generate();
    let cfg = Config {
        learning_rate: 0.1,
        momentum: true,
        weight_decay: rbm::DecayType::L2Full,
        ..config()
    };
    let mut rbm = Rbm::convolutional(shape(), cfg).unwrap();
    let epochs = history(&mut rbm, &data, EPOCHS);
    assert!(epochs[EPOCHS - 1].reconstruction_error < epochs[0].reconstruction_error);
}

#[test]
fn test_conv_parallel_converges() {
    let data = Strokes::side(12).generate();
    let cfg = Config {
        parallel: true,
        ..config()
    };
    let mut rbm = Rbm::convolutional(shape(), cfg).unwrap();
    let error = rbm.train(data.view(), EPOCHS).unwrap();
    assert!(error < 8e-2, "final error {error}");
}

#[test]
fn test_conv_local_sparsity_per_filter() {
    let data = Strokes::side(12).generate();
    let cfg = Config {
        sparsity: SparsityMethod::LocalTarget,
        sparsity_target: 0.1,
        sparsity_cost: 0.9,
        ..config()
    };
    let mut rbm = Rbm::convolutional(shape(), cfg).unwrap();
    let epochs = history(&mut rbm, &data, 10);
    assert_eq!(rbm.params.b.len(), 10);
    assert!(rbm.params.is_finite());
    assert!(epochs[9].reconstruction_error < epochs[0].reconstruction_error);
}

#[test]
fn test_conv_activation_shapes() {
    let data = Strokes::side(12).generate();
    let mut rbm = Rbm::convolutional(shape(), config()).unwrap();
    let hidden = rbm
        .activate_hidden(data.view(), Outputs::PROBS_AND_SAMPLES)
        .unwrap();
    assert_eq!(hidden.probs.dim(), (100, 10 * 8 * 8));
    let samples = hidden.samples.unwrap();
    assert!(samples.iter().all(|&s| s == 0.0 || s == 1.0));

    let visible = rbm.activate_visible(samples.view(), Outputs::PROBS).unwrap();
    assert_eq!(visible.probs.dim(), (100, 144));
    assert!(visible.samples.is_none());
    assert!(visible.probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
}

#[test]
fn test_conv_multichannel_trains() {
    let single = Strokes::side(12).generate();
    // Second channel is the inverted image.
    let mut data = Array2::zeros((single.nrows(), 2 * 144));
    for (mut row, src) in data.outer_iter_mut().zip(single.outer_iter()) {
        for i in 0..144 {
            row[i] = src[i];
            row[144 + i] = 1.0 - src[i];
        }
    }
    let cfg = Config {
        learning_rate: 0.5,
        ..config()
    };
    let mut rbm = Rbm::convolutional(ConvShape::new(2, (12, 12), 6, (5, 5)), cfg).unwrap();
    assert_eq!(rbm.input_size(), 288);
    assert_eq!(rbm.params.c.len(), 2);

    let epochs = history(&mut rbm, &data, 10);
    assert!(epochs[9].reconstruction_error < epochs[0].reconstruction_error);
}

#[test]
fn test_conv_wrong_sample_length() {
    let data = Strokes::side(10).generate();
    let mut rbm = Rbm::convolutional(shape(), config()).unwrap();
    assert!(matches!(
        rbm.train(data.view(), 1),
        Err(RbmError::DimensionMismatch {
            expected: 144,
            found: 100,
            ..
        })
    ));
}
