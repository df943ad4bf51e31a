//! Training configuration
//!
//! Mirrors the experiment configuration consumed by the training loop. Loaded
//! from JSON; `loss_names` keeps file order, which is the order tasks are
//! summarized in.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{Result, TrainError};

/// Optimizer family used for every parameter group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimType {
    #[serde(rename = "adamw")]
    AdamW,
    #[serde(rename = "adam")]
    Adam,
    #[serde(rename = "sgd")]
    Sgd,
}

impl OptimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimType::AdamW => "adamw",
            OptimType::Adam => "adam",
            OptimType::Sgd => "sgd",
        }
    }
}

impl fmt::Display for OptimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimType {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "adamw" => Ok(OptimType::AdamW),
            "adam" => Ok(OptimType::Adam),
            "sgd" => Ok(OptimType::Sgd),
            other => Err(TrainError::Config(format!(
                "Invalid optim_type: {}. Must be 'adamw', 'adam', or 'sgd'",
                other
            ))),
        }
    }
}

/// Decay applied after warmup: cosine annealing or polynomial with a power
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDecayPower", into = "RawDecayPower")]
pub enum DecayPower {
    Cosine,
    Polynomial(f64),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawDecayPower {
    Name(String),
    Power(f64),
}

impl TryFrom<RawDecayPower> for DecayPower {
    type Error = String;

    fn try_from(raw: RawDecayPower) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawDecayPower::Name(name) if name == "cosine" => Ok(DecayPower::Cosine),
            RawDecayPower::Name(name) => Err(format!(
                "Invalid decay_power: {}. Must be 'cosine' or a number",
                name
            )),
            RawDecayPower::Power(power) => Ok(DecayPower::Polynomial(power)),
        }
    }
}

impl From<DecayPower> for RawDecayPower {
    fn from(power: DecayPower) -> Self {
        match power {
            DecayPower::Cosine => RawDecayPower::Name("cosine".to_string()),
            DecayPower::Polynomial(p) => RawDecayPower::Power(p),
        }
    }
}

/// Warmup length: an absolute step count (JSON integer) or a fraction of the
/// total step budget (JSON float)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WarmupSteps {
    Steps(usize),
    Fraction(f64),
}

impl WarmupSteps {
    /// Resolve to an absolute step count against `max_steps`
    pub fn resolve(&self, max_steps: usize) -> usize {
        match *self {
            WarmupSteps::Steps(steps) => steps,
            WarmupSteps::Fraction(fraction) => (max_steps as f64 * fraction).floor() as usize,
        }
    }
}

fn default_records_dir() -> PathBuf {
    PathBuf::from("./records")
}

/// Experiment configuration for one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Task name -> loss weight. Active iff weight >= 1; metrics are still
    /// registered for weights in (0, 1).
    pub loss_names: IndexMap<String, f64>,

    /// Base learning rate
    pub learning_rate: f64,

    /// Weight decay for decaying groups
    pub weight_decay: f64,

    /// Learning-rate multiplier for head parameters
    pub lr_mult: f64,

    /// Floor learning rate of the polynomial schedule
    pub end_lr: f64,

    /// `"cosine"` or a polynomial power
    pub decay_power: DecayPower,

    pub optim_type: OptimType,

    pub warmup_steps: WarmupSteps,

    /// Missing-modality ratio under test, written into ablation records
    pub test_ratio: f64,

    /// Ablation experiment name; when set, AVA accuracy is appended to a record file
    #[serde(default)]
    pub test_exp_name: Option<String>,

    /// Missing-modality type under test (e.g. "both", "image", "text")
    pub test_type: String,

    /// Root directory for ablation records
    #[serde(default = "default_records_dir")]
    pub records_dir: PathBuf,
}

impl TrainConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TrainError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainError::Config(format!(
                "learning_rate must be finite and > 0, got {}",
                self.learning_rate
            )));
        }

        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(TrainError::Config(format!(
                "weight_decay must be finite and >= 0, got {}",
                self.weight_decay
            )));
        }

        if !(self.lr_mult.is_finite() && self.lr_mult >= 0.0) {
            return Err(TrainError::Config(format!(
                "lr_mult must be finite and >= 0, got {}",
                self.lr_mult
            )));
        }

        if !(self.end_lr.is_finite() && self.end_lr >= 0.0) {
            return Err(TrainError::Config(format!(
                "end_lr must be finite and >= 0, got {}",
                self.end_lr
            )));
        }

        if let WarmupSteps::Fraction(fraction) = self.warmup_steps {
            if !(fraction.is_finite() && fraction >= 0.0) {
                return Err(TrainError::Config(format!(
                    "warmup_steps fraction must be finite and >= 0, got {}",
                    fraction
                )));
            }
        }

        if let DecayPower::Polynomial(power) = self.decay_power {
            if !power.is_finite() {
                return Err(TrainError::Config(format!(
                    "decay_power must be finite, got {}",
                    power
                )));
            }
            if self.end_lr >= self.learning_rate {
                return Err(TrainError::Config(format!(
                    "end_lr ({}) must be smaller than learning_rate ({})",
                    self.end_lr, self.learning_rate
                )));
            }
        }

        Ok(())
    }

    /// Tasks whose configured weight is >= 1, in configuration order
    pub fn active_tasks(&self) -> Vec<String> {
        self.loss_names
            .iter()
            .filter(|(_, weight)| **weight >= 1.0)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Learning rate of head parameter groups
    pub fn head_learning_rate(&self) -> f64 {
        self.learning_rate * self.lr_mult
    }
}
