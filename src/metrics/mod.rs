//! Per-split, per-task metric accumulators
//!
//! Accumulators live in a [`MetricTable`] keyed by `(split, task, kind)`,
//! populated once at setup and reset at every epoch boundary.

pub mod accumulators;
pub mod sink;

pub use accumulators::{AvaAccuracy, Lcc, Metric, Scalar, Srcc, VqaScore};
pub use sink::{LogSink, MemorySink, MetricSink};

use candle_core::Tensor;
use std::collections::HashMap;
use std::fmt;

use crate::{Result, TrainError};

/// Training or validation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub const ALL: [Split; 2] = [Split::Train, Split::Val];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an accumulator measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Score,
    Loss,
    Accuracy,
    Srcc,
    Lcc,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Score => "score",
            MetricKind::Loss => "loss",
            MetricKind::Accuracy => "accuracy",
            MetricKind::Srcc => "srcc",
            MetricKind::Lcc => "lcc",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Table key of one accumulator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub split: Split,
    pub task: String,
    pub kind: MetricKind,
}

impl MetricKey {
    pub fn new(split: Split, task: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            split,
            task: task.into(),
            kind,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.split, self.task, self.kind)
    }
}

/// Any accumulator held by the table
#[derive(Debug, Clone)]
pub enum MetricAccumulator {
    Score(VqaScore),
    Scalar(Scalar),
    Accuracy(AvaAccuracy),
    Srcc(Srcc),
    Lcc(Lcc),
}

impl MetricAccumulator {
    /// Fresh accumulator for a metric kind
    pub fn for_kind(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Score => MetricAccumulator::Score(VqaScore::new()),
            MetricKind::Loss => MetricAccumulator::Scalar(Scalar::new()),
            MetricKind::Accuracy => MetricAccumulator::Accuracy(AvaAccuracy::new()),
            MetricKind::Srcc => MetricAccumulator::Srcc(Srcc::new()),
            MetricKind::Lcc => MetricAccumulator::Lcc(Lcc::new()),
        }
    }

    /// Feed a scalar (loss accumulators only)
    pub fn update_scalar(&mut self, value: f64) -> Result<()> {
        match self {
            MetricAccumulator::Scalar(m) => {
                m.update(value);
                Ok(())
            }
            other => Err(TrainError::Metric(format!(
                "{} accumulator does not take scalar updates",
                other.name()
            ))),
        }
    }

    /// Feed a prediction/target tensor pair
    pub fn update_pair(&mut self, pred: &Tensor, target: &Tensor) -> Result<()> {
        match self {
            MetricAccumulator::Score(m) => m.update(pred, target),
            MetricAccumulator::Accuracy(m) => m.update(pred, target),
            MetricAccumulator::Srcc(m) => m.update(pred, target),
            MetricAccumulator::Lcc(m) => m.update(pred, target),
            MetricAccumulator::Scalar(_) => Err(TrainError::Metric(
                "scalar accumulator does not take tensor updates".to_string(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            MetricAccumulator::Score(_) => "score",
            MetricAccumulator::Scalar(_) => "scalar",
            MetricAccumulator::Accuracy(_) => "accuracy",
            MetricAccumulator::Srcc(_) => "srcc",
            MetricAccumulator::Lcc(_) => "lcc",
        }
    }

    fn inner(&self) -> &dyn Metric {
        match self {
            MetricAccumulator::Score(m) => m,
            MetricAccumulator::Scalar(m) => m,
            MetricAccumulator::Accuracy(m) => m,
            MetricAccumulator::Srcc(m) => m,
            MetricAccumulator::Lcc(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Metric {
        match self {
            MetricAccumulator::Score(m) => m,
            MetricAccumulator::Scalar(m) => m,
            MetricAccumulator::Accuracy(m) => m,
            MetricAccumulator::Srcc(m) => m,
            MetricAccumulator::Lcc(m) => m,
        }
    }
}

impl Metric for MetricAccumulator {
    fn compute(&self) -> f64 {
        self.inner().compute()
    }

    fn reset(&mut self) {
        self.inner_mut().reset()
    }
}

/// Accumulators indexed by `(split, task, kind)`
#[derive(Debug, Clone, Default)]
pub struct MetricTable {
    metrics: HashMap<MetricKey, MetricAccumulator>,
}

impl MetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh accumulator, replacing any existing one
    pub fn register(&mut self, key: MetricKey) {
        let accumulator = MetricAccumulator::for_kind(key.kind);
        self.metrics.insert(key, accumulator);
    }

    pub fn get(&self, key: &MetricKey) -> Option<&MetricAccumulator> {
        self.metrics.get(key)
    }

    pub fn get_mut(&mut self, key: &MetricKey) -> Option<&mut MetricAccumulator> {
        self.metrics.get_mut(key)
    }

    /// Like `get_mut`, but a missing accumulator is an error
    pub fn require_mut(&mut self, key: &MetricKey) -> Result<&mut MetricAccumulator> {
        self.metrics
            .get_mut(key)
            .ok_or_else(|| TrainError::Metric(format!("no accumulator registered for {}", key)))
    }

    pub fn contains(&self, key: &MetricKey) -> bool {
        self.metrics.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
