//! Per-epoch training metrics and where they go.

use std::io::Write;

use serde::Serialize;

use crate::core::RbmResult;

/// Summary of one training epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Mean over samples of the per-sample mean squared reconstruction error.
    pub reconstruction_error: f32,
    /// Mean positive-phase hidden activation.
    pub sparsity: f32,
    /// Mean free energy of the data, when monitoring is enabled.
    pub free_energy: Option<f32>,
    pub batches: usize,
    pub samples: usize,
}

/// Receives a record after every epoch.
pub trait MetricsSink {
    /// # Errors
    /// Propagates I/O failures of the underlying writer.
    fn record_epoch(&mut self, metrics: &EpochMetrics) -> RbmResult<()>;
}

/// Emits each epoch as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record_epoch(&mut self, m: &EpochMetrics) -> RbmResult<()> {
        tracing::info!(
            epoch = m.epoch,
            error = m.reconstruction_error,
            sparsity = m.sparsity,
            free_energy = ?m.free_energy,
            batches = m.batches,
            "epoch complete"
        );
        Ok(())
    }
}

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonlSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> MetricsSink for JsonlSink<W> {
    fn record_epoch(&mut self, m: &EpochMetrics) -> RbmResult<()> {
        let event = serde_json::json!({
            "type": "epoch",
            "epoch": m.epoch,
            "reconstruction_error": m.reconstruction_error,
            "sparsity": m.sparsity,
            "free_energy": m.free_energy,
            "batches": m.batches,
            "samples": m.samples,
        });
        writeln!(self.writer, "{event}")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl MetricsSink for Vec<EpochMetrics> {
    fn record_epoch(&mut self, metrics: &EpochMetrics) -> RbmResult<()> {
        self.push(metrics.clone());
        Ok(())
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for &mut S {
    fn record_epoch(&mut self, metrics: &EpochMetrics) -> RbmResult<()> {
        (**self).record_epoch(metrics)
    }
}
