//! Training-loop support for missing-aware multimodal prompting
//!
//! Utilities consulted by an externally driven vision-language training loop:
//!
//! - **Parameter groups**: every named parameter lands in exactly one of four
//!   optimizer groups (decay / no-decay, crossed with backbone / head)
//! - **Optimization setup**: AdamW, Adam or SGD over those groups, paired with a
//!   step-wise warmup schedule (cosine or polynomial decay)
//! - **EMD loss**: root-mean-square distance between discrete CDFs
//! - **Task bookkeeping**: active task selection, per-split metric accumulators
//!   and epoch summarization
//!
//! # Example
//!
//! ```ignore
//! use mmaes_train::{TrainConfig, TrainingContext};
//! use mmaes_train::training::{build_optimization, named_parameters, StepBudget};
//!
//! let config = TrainConfig::from_file("config.json")?;
//! let params = named_parameters(&varmap)?;
//! let mut setup = build_optimization(&params, &config, &StepBudget::explicit(10_000))?;
//! let mut ctx = TrainingContext::new(config, params)?;
//! ```

pub mod config;
pub mod metrics;
pub mod tasks;
pub mod training;

// Re-export commonly used items
pub use config::{DecayPower, OptimType, TrainConfig, WarmupSteps};
pub use tasks::{TaskKind, TrainingContext};

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shape mismatch: target {target:?} vs estimate {estimate:?}")]
    ShapeMismatch {
        target: Vec<usize>,
        estimate: Vec<usize>,
    },

    #[error("Metric error: {0}")]
    Metric(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrainError>;
