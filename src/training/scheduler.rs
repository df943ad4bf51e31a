//! Warmup learning rate schedules
//!
//! Schedules produce a multiplicative factor per optimizer step. The factor is
//! applied to each parameter group's base learning rate, so head groups keep
//! their `lr_mult` ratio throughout training.

use std::f64::consts::PI;

use crate::{Result, TrainError};

/// Decay shape after warmup
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleKind {
    /// Half-cosine from the peak down to zero
    Cosine,
    /// Polynomial decay from `lr_init` to `lr_end`
    Polynomial {
        lr_init: f64,
        lr_end: f64,
        power: f64,
    },
}

/// Warmup scheduler configuration
#[derive(Debug, Clone)]
pub struct WarmupSchedulerConfig {
    pub kind: ScheduleKind,
    /// Number of warmup steps
    pub warmup_steps: usize,
    /// Total number of training steps
    pub total_steps: usize,
}

/// Linear warmup followed by cosine or polynomial decay
///
/// - Linear warmup from 0 to 1 over `warmup_steps`
/// - Decay over the remaining `total_steps - warmup_steps`
pub struct WarmupScheduler {
    config: WarmupSchedulerConfig,
    current_step: usize,
}

impl WarmupScheduler {
    /// Create new warmup scheduler
    pub fn new(config: WarmupSchedulerConfig) -> Result<Self> {
        if let ScheduleKind::Polynomial { lr_init, lr_end, .. } = config.kind {
            if lr_end >= lr_init {
                return Err(TrainError::Config(format!(
                    "lr_end ({}) must be smaller than initial lr ({})",
                    lr_end, lr_init
                )));
            }
        }

        Ok(Self {
            config,
            current_step: 0,
        })
    }

    /// Learning-rate factor for the current step
    pub fn get_factor(&self) -> f64 {
        self.get_factor_at_step(self.current_step)
    }

    /// Learning-rate factor for a specific step
    pub fn get_factor_at_step(&self, step: usize) -> f64 {
        let warmup = self.config.warmup_steps;
        let total = self.config.total_steps;

        if step < warmup {
            return step as f64 / warmup.max(1) as f64;
        }

        match self.config.kind {
            ScheduleKind::Cosine => {
                let progress = (step - warmup) as f64 / total.saturating_sub(warmup).max(1) as f64;
                (0.5 * (1.0 + (PI * progress).cos())).max(0.0)
            }
            ScheduleKind::Polynomial {
                lr_init,
                lr_end,
                power,
            } => {
                if step > total {
                    return lr_end / lr_init;
                }
                let decay_steps = total.saturating_sub(warmup).max(1) as f64;
                let pct_remaining = 1.0 - (step - warmup) as f64 / decay_steps;
                let decayed = (lr_init - lr_end) * pct_remaining.powf(power) + lr_end;
                decayed / lr_init
            }
        }
    }

    /// Step the scheduler (increment step counter)
    pub fn step(&mut self) {
        self.current_step += 1;
    }

    /// Get current step
    pub fn get_step(&self) -> usize {
        self.current_step
    }

    pub fn warmup_steps(&self) -> usize {
        self.config.warmup_steps
    }

    pub fn total_steps(&self) -> usize {
        self.config.total_steps
    }

    /// Reset scheduler to initial state
    pub fn reset(&mut self) {
        self.current_step = 0;
    }
}
