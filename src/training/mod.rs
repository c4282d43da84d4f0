//! Batch driver: epochs, minibatches, and training sessions.
//!
//! A session validates the data, prepares the optional momentum and backup
//! state, then runs epochs until the epoch budget is spent or the caller's
//! stop condition fires:
//!
//! ```text
//! for epoch:
//!     order = 0..n (shuffled if configured)
//!     for each minibatch of order:
//!         grads, stats = CD-k over the batch       (cd)
//!         update parameters from grads             (update)
//!     record EpochMetrics                          (metrics)
//! ```
//!
//! ## Parallel mode
//!
//! Samples of a batch are grouped into fixed-size tasks that rayon runs on
//! its worker pool. Each sample draws from its own RNG, seeded from the
//! model RNG before the parallel region, and task partials are reduced in
//! task order, so a seeded run gives the same result on any number of
//! threads. Parameters are only read while tasks run.

pub mod cd;
pub mod metrics;
pub mod sparsity;
pub mod update;

use ndarray::{s, Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::core::{Params, Rbm, RbmError, RbmResult};
use crate::data;
use crate::pool::{BufferPool, ChainLayout, PoolStats};
use cd::{ChainBuffers, ChainModel, ChainStats};
pub use metrics::{EpochMetrics, JsonlSink, MetricsSink, TracingSink};

/// Samples handled by one parallel task.
const SAMPLES_PER_TASK: usize = 4;

/// Summary of one minibatch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMetrics {
    pub samples: usize,
    /// Mean over the batch of the per-sample mean squared error.
    pub reconstruction_error: f32,
    /// Mean positive-phase hidden activation.
    pub sparsity: f32,
}

/// Outcome of a training session.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    /// Epochs actually run.
    pub epochs: usize,
    /// Reconstruction error of the last epoch.
    pub final_error: f32,
    /// Whether the stop condition ended the session.
    pub stopped_early: bool,
}

struct Scratch {
    buffers: ChainBuffers,
    grads: Params,
    pool: BufferPool,
    seeds: Vec<u64>,
}

/// Reusable allocations for a training session.
pub struct TrainingContext {
    scratch: Scratch,
    batch_input: Array2<f32>,
    batch_target: Array2<f32>,
    order: Vec<usize>,
}

impl TrainingContext {
    /// Allocate buffers for `rbm`'s dimensions and batch size.
    pub fn new(rbm: &Rbm) -> Self {
        let batch_size = rbm.config.batch_size;
        let visible_len = rbm.input_size();
        let hidden_len = rbm.output_size();
        let layout = ChainLayout {
            rows: 1,
            visible_len,
            hidden_len,
        };
        let tasks = if rbm.config.parallel {
            batch_size.div_ceil(SAMPLES_PER_TASK)
        } else {
            0
        };
        Self {
            scratch: Scratch {
                buffers: ChainBuffers::new(batch_size, visible_len, hidden_len),
                grads: rbm.params.zeros_like(),
                pool: BufferPool::new(layout, tasks),
                seeds: Vec::with_capacity(batch_size),
            },
            batch_input: Array2::zeros((batch_size, visible_len)),
            batch_target: Array2::zeros((batch_size, visible_len)),
            order: Vec::new(),
        }
    }

    /// Statistics of the parallel-mode buffer pool.
    pub fn pool_stats(&self) -> PoolStats {
        self.scratch.pool.stats()
    }
}

/// Train on `data` for `epochs` epochs, logging through `tracing`.
///
/// Returns the reconstruction error of the last epoch.
pub fn train(rbm: &mut Rbm, data: ArrayView2<f32>, epochs: usize) -> RbmResult<f32> {
    train_with(rbm, data, None, epochs, TracingSink, |_| false).map(|s| s.final_error)
}

/// Train from `noisy` inputs, measuring reconstruction against `clean`.
pub fn train_denoising(
    rbm: &mut Rbm,
    noisy: ArrayView2<f32>,
    clean: ArrayView2<f32>,
    epochs: usize,
) -> RbmResult<f32> {
    train_with(rbm, noisy, Some(clean), epochs, TracingSink, |_| false).map(|s| s.final_error)
}

/// Run a full training session.
///
/// `targets`, when given, replaces `inputs` as the reconstruction target.
/// Every epoch is reported to `sink`; `stop` is called after each epoch
/// and ends the session by returning `true`.
///
/// # Errors
/// - `Corrupted` if an earlier divergence left the model unusable
/// - `Configuration` for a zero epoch count
/// - `EmptyDataset` / `DimensionMismatch` before any parameter changes
/// - `NumericDivergence` if training diverges
/// - `Io` from the sink
pub fn train_with<S, F>(
    rbm: &mut Rbm,
    inputs: ArrayView2<f32>,
    targets: Option<ArrayView2<f32>>,
    epochs: usize,
    mut sink: S,
    mut stop: F,
) -> RbmResult<TrainingSummary>
where
    S: MetricsSink,
    F: FnMut(&EpochMetrics) -> bool,
{
    if rbm.corrupted {
        return Err(RbmError::Corrupted);
    }
    if epochs == 0 {
        return Err(RbmError::Configuration("epochs must be at least 1".into()));
    }
    data::check_dataset(inputs, rbm.input_size())?;
    if let Some(targets) = targets {
        data::check_targets(inputs, targets)?;
    }

    let source = targets.map_or_else(|| inputs.reborrow(), |t| t.reborrow());
    begin_session(rbm, source)?;
    tracing::info!(
        model = %rbm,
        epochs,
        samples = inputs.nrows(),
        denoising = targets.is_some(),
        "training started"
    );

    let result = run_epochs(rbm, inputs, targets, epochs, &mut sink, &mut stop);
    end_session(rbm);
    let summary = result?;

    tracing::info!(
        epochs = summary.epochs,
        error = summary.final_error,
        stopped_early = summary.stopped_early,
        "training finished"
    );
    Ok(summary)
}

fn run_epochs<S, F>(
    rbm: &mut Rbm,
    inputs: ArrayView2<f32>,
    targets: Option<ArrayView2<f32>>,
    epochs: usize,
    sink: &mut S,
    stop: &mut F,
) -> RbmResult<TrainingSummary>
where
    S: MetricsSink,
    F: FnMut(&EpochMetrics) -> bool,
{
    let mut ctx = TrainingContext::new(rbm);
    let mut summary = TrainingSummary {
        epochs: 0,
        final_error: 0.0,
        stopped_early: false,
    };
    for epoch in 0..epochs {
        let metrics = train_epoch(rbm, &mut ctx, inputs, targets, epoch)?;
        sink.record_epoch(&metrics)?;
        summary.epochs = epoch + 1;
        summary.final_error = metrics.reconstruction_error;
        if stop(&metrics) {
            summary.stopped_early = true;
            break;
        }
    }
    Ok(summary)
}

fn begin_session(rbm: &mut Rbm, statistics_source: ArrayView2<f32>) -> RbmResult<()> {
    if rbm.config.init_visible_bias {
        rbm.init_visible_bias(statistics_source)?;
    }
    rbm.momentum = rbm.config.momentum.then(|| rbm.params.zeros_like());
    rbm.backup = rbm.config.backup.then(|| rbm.params.clone());
    Ok(())
}

/// Momentum and backup state for epochs or batches run outside `train_with`.
fn ensure_update_state(rbm: &mut Rbm) {
    if rbm.config.momentum && rbm.momentum.is_none() {
        rbm.momentum = Some(rbm.params.zeros_like());
    }
    if rbm.config.backup && rbm.backup.is_none() {
        rbm.backup = Some(rbm.params.clone());
    }
}

fn end_session(rbm: &mut Rbm) {
    rbm.momentum = None;
    rbm.backup = None;
}

/// One pass over the dataset.
///
/// Outside a [`train_with`] session the momentum and backup buffers are
/// created on first use and kept between calls; visible biases are not
/// initialised.
///
/// # Errors
/// Same as [`train_with`], minus the epoch-count check.
pub fn train_epoch(
    rbm: &mut Rbm,
    ctx: &mut TrainingContext,
    inputs: ArrayView2<f32>,
    targets: Option<ArrayView2<f32>>,
    epoch: usize,
) -> RbmResult<EpochMetrics> {
    if rbm.corrupted {
        return Err(RbmError::Corrupted);
    }
    data::check_dataset(inputs, rbm.input_size())?;
    if let Some(targets) = targets {
        data::check_targets(inputs, targets)?;
    }
    ensure_update_state(rbm);
    let samples = inputs.nrows();
    let batch_size = rbm.config.batch_size;
    data::epoch_order(&mut ctx.order, samples, rbm.config.shuffle, &mut rbm.rng);

    let mut error_sum = 0.0f32;
    let mut sparsity_sum = 0.0f32;

    for indices in ctx.order.chunks(batch_size) {
        let rows = indices.len();
        data::gather_rows(
            inputs,
            indices,
            ctx.batch_input.slice_mut(s![..rows, ..]),
        );
        let batch_targets = match targets {
            Some(targets) => {
                data::gather_rows(
                    targets,
                    indices,
                    ctx.batch_target.slice_mut(s![..rows, ..]),
                );
                ctx.batch_target.slice(s![..rows, ..])
            }
            None => ctx.batch_input.slice(s![..rows, ..]),
        };

        let batch = run_batch(
            rbm,
            &mut ctx.scratch,
            ctx.batch_input.slice(s![..rows, ..]),
            batch_targets,
            epoch,
        )?;
        error_sum += batch.reconstruction_error * rows as f32;
        sparsity_sum += batch.sparsity * rows as f32;
    }

    let free_energy = if rbm.config.free_energy {
        let source = targets.map_or_else(|| inputs.reborrow(), |t| t.reborrow());
        Some(rbm.mean_free_energy(source)?)
    } else {
        None
    };

    Ok(EpochMetrics {
        epoch,
        reconstruction_error: error_sum / samples as f32,
        sparsity: sparsity_sum / samples as f32,
        free_energy,
        batches: data::batch_count(samples, batch_size),
        samples,
    })
}

/// Train on a single minibatch held in `inputs` (at most `batch_size` rows).
pub fn train_batch(
    rbm: &mut Rbm,
    ctx: &mut TrainingContext,
    inputs: ArrayView2<f32>,
    targets: ArrayView2<f32>,
    epoch: usize,
) -> RbmResult<BatchMetrics> {
    if rbm.corrupted {
        return Err(RbmError::Corrupted);
    }
    data::check_dataset(inputs, rbm.input_size())?;
    data::check_targets(inputs, targets)?;
    ensure_update_state(rbm);
    run_batch(rbm, &mut ctx.scratch, inputs, targets, epoch)
}

fn run_batch(
    rbm: &mut Rbm,
    scratch: &mut Scratch,
    inputs: ArrayView2<f32>,
    targets: ArrayView2<f32>,
    epoch: usize,
) -> RbmResult<BatchMetrics> {
    let rows = inputs.nrows();
    scratch.grads.fill(0.0);

    let chains = if rbm.config.parallel && rows > 1 {
        parallel_chains(rbm, scratch, inputs, targets)
    } else {
        let (model, rng) = split(rbm);
        cd::run_chain(
            model,
            inputs,
            targets,
            &mut scratch.buffers,
            rng,
            &mut scratch.grads,
        )
    };
    let stats = chains.map_err(|e| rbm.recover(e))?;

    update::apply_update(rbm, &mut scratch.grads, &stats.hidden_activity, rows, epoch)?;

    let metrics = BatchMetrics {
        samples: rows,
        reconstruction_error: stats.error_sum / rows as f32,
        sparsity: stats.hidden_activity.sum()
            / (rows * stats.hidden_activity.len().max(1)) as f32,
    };
    tracing::debug!(
        epoch,
        rows,
        error = metrics.reconstruction_error,
        "batch complete"
    );
    Ok(metrics)
}

/// Borrow the read-only model and the RNG separately.
fn split(rbm: &mut Rbm) -> (ChainModel<'_>, &mut StdRng) {
    (
        ChainModel {
            transform: rbm.transform.as_ref(),
            params: &rbm.params,
            config: &rbm.config,
        },
        &mut rbm.rng,
    )
}

fn parallel_chains(
    rbm: &mut Rbm,
    scratch: &mut Scratch,
    inputs: ArrayView2<f32>,
    targets: ArrayView2<f32>,
) -> RbmResult<ChainStats> {
    let rows = inputs.nrows();
    scratch.seeds.clear();
    scratch.seeds.extend((0..rows).map(|_| rbm.rng.gen::<u64>()));

    let (model, _) = split(rbm);
    let pool = &scratch.pool;
    let template = &scratch.grads;

    let partials = scratch
        .seeds
        .par_chunks(SAMPLES_PER_TASK)
        .enumerate()
        .map(|(task, seeds)| {
            let mut grads = template.zeros_like();
            let mut stats = ChainStats::zeros(template.b.len());
            let mut buffers = pool.get();
            let result = run_task(
                model,
                inputs,
                targets,
                task * SAMPLES_PER_TASK,
                seeds,
                &mut buffers,
                &mut grads,
                &mut stats,
            );
            pool.return_to_pool(buffers);
            result.map(|()| (grads, stats))
        })
        .collect::<RbmResult<Vec<_>>>()?;

    let mut total = ChainStats::zeros(scratch.grads.b.len());
    for (grads, stats) in &partials {
        scratch.grads.scaled_add(1.0, grads);
        total.merge(stats);
    }
    Ok(total)
}

#[allow(clippy::too_many_arguments)]
fn run_task(
    model: ChainModel<'_>,
    inputs: ArrayView2<f32>,
    targets: ArrayView2<f32>,
    first_row: usize,
    seeds: &[u64],
    buffers: &mut ChainBuffers,
    grads: &mut Params,
    stats: &mut ChainStats,
) -> RbmResult<()> {
    for (offset, &seed) in seeds.iter().enumerate() {
        let row = first_row + offset;
        let mut rng = StdRng::seed_from_u64(seed);
        let sample = cd::run_chain(
            model,
            inputs.slice(s![row..row + 1, ..]),
            targets.slice(s![row..row + 1, ..]),
            buffers,
            &mut rng,
            grads,
        )?;
        stats.merge(&sample);
    }
    Ok(())
}
