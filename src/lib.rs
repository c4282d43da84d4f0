//! # RBM (Restricted Boltzmann Machines)
//!
//! Contrastive-divergence training for dense and convolutional Restricted
//! Boltzmann Machines.
//!
//! ## Overview
//!
//! An RBM is a two-layer energy model: visible units `v`, hidden units `h`,
//! no connections within a layer. Training alternates stochastic activation
//! between the layers (a Gibbs chain) and moves the weights toward the data
//! statistics and away from the chain's reconstructions:
//!
//! ```text
//! ΔW ∝ ⟨v h⟩_data - ⟨v h⟩_reconstruction
//! ```
//!
//! The convolutional form (CRBM) shares small kernels across the visible map
//! and replaces the matrix product with valid/full 2-D convolutions.
//!
//! ## Structure
//!
//! - [`config`]: Hyperparameters, unit kinds, validation, TOML loading
//! - [`core`]: Model parameters, unit laws, transforms, energy
//! - [`training`]: CD chain, update rule, batch driver, metric sinks
//! - [`data`]: Dataset checks and minibatch assembly
//! - [`pool`]: Reusable chain buffers for parallel batches
//! - [`utils`]: Scalar math, noise laws, finiteness checks
//!
//! ## Example
//!
//! ```no_run
//! use ndarray::Array2;
//! use rbm::{Config, Rbm};
//!
//! let data = Array2::<f32>::zeros((100, 784));
//! let config = Config { momentum: true, ..Config::default() };
//! let mut rbm = Rbm::dense(784, 100, config)?;
//! let error = rbm.train(data.view(), 25)?;
//! println!("{rbm}: reconstruction error {error:.4}");
//! # Ok::<(), rbm::RbmError>(())
//! ```

pub mod config;
pub mod core;
pub mod data;
pub mod pool;
pub mod training;
pub mod utils;

pub use config::{Config, DecayType, SparsityMethod, UnitType};
pub use core::{
    Activation, ConvShape, Convolutional, Dense, Outputs, Params, Phase, Rbm, RbmError,
    RbmResult, Transform,
};
pub use training::{
    train, train_batch, train_denoising, train_epoch, train_with, BatchMetrics, EpochMetrics,
    JsonlSink, MetricsSink, TracingSink, TrainingContext, TrainingSummary,
};
