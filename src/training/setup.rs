//! Optimizer and schedule construction
//!
//! Built once at training start. The driver owns the returned
//! `OptimizationSetup` and calls `step`/`backward_step` once per optimizer step.

use candle_core::backprop::GradStore;
use candle_core::Tensor;

use super::optimizer::GroupedOptimizer;
use super::param_groups::{partition_parameters, NamedParameter};
use super::scheduler::{ScheduleKind, WarmupScheduler, WarmupSchedulerConfig};
use crate::{DecayPower, Result, TrainConfig, TrainError};

/// How many optimizer steps the run will take
#[derive(Debug, Clone)]
pub struct StepBudget {
    /// Explicit step limit; derived from the epochs below when absent
    pub max_steps: Option<usize>,
    /// Length of the training data loader
    pub batches_per_epoch: usize,
    pub max_epochs: usize,
    pub accumulate_grad_batches: usize,
}

impl StepBudget {
    /// Budget with an explicit step limit
    pub fn explicit(max_steps: usize) -> Self {
        Self {
            max_steps: Some(max_steps),
            batches_per_epoch: 0,
            max_epochs: 0,
            accumulate_grad_batches: 1,
        }
    }

    /// Budget derived from epochs
    pub fn from_epochs(
        batches_per_epoch: usize,
        max_epochs: usize,
        accumulate_grad_batches: usize,
    ) -> Self {
        Self {
            max_steps: None,
            batches_per_epoch,
            max_epochs,
            accumulate_grad_batches,
        }
    }

    /// Resolve the total number of optimizer steps
    pub fn resolve(&self) -> Result<usize> {
        if let Some(max_steps) = self.max_steps {
            return Ok(max_steps);
        }

        if self.accumulate_grad_batches == 0 {
            return Err(TrainError::Config(
                "accumulate_grad_batches must be > 0".to_string(),
            ));
        }

        Ok(self.batches_per_epoch * self.max_epochs / self.accumulate_grad_batches)
    }
}

/// When the driver advances the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerInterval {
    Step,
    Epoch,
}

/// Optimizer paired with its learning-rate schedule
pub struct OptimizationSetup {
    pub optimizer: GroupedOptimizer,
    pub scheduler: WarmupScheduler,
    pub interval: SchedulerInterval,
}

impl OptimizationSetup {
    /// One optimizer step followed by one scheduler step
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.optimizer.step(grads)?;
        self.scheduler.step();
        self.optimizer.set_lr_factor(self.scheduler.get_factor());
        Ok(())
    }

    /// Backpropagate `loss` and take one step
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }

    /// Current learning rate of each parameter group
    pub fn learning_rates(&self) -> Vec<f64> {
        self.optimizer.learning_rates()
    }
}

/// Build the grouped optimizer and its warmup schedule
///
/// # Arguments
/// * `params` - Every trainable parameter with its dotted name
/// * `config` - Experiment configuration
/// * `budget` - Step budget of the run
pub fn build_optimization(
    params: &[NamedParameter],
    config: &TrainConfig,
    budget: &StepBudget,
) -> Result<OptimizationSetup> {
    let groups = partition_parameters(params, config);
    for group in &groups {
        log::info!(
            "Param group {}: {} params, lr={:.3e}, weight_decay={}",
            group.role.as_str(),
            group.len(),
            group.lr,
            group.weight_decay
        );
    }

    let mut optimizer = GroupedOptimizer::new(config.optim_type, groups)?;

    let max_steps = budget.resolve()?;
    let warmup_steps = config.warmup_steps.resolve(max_steps);

    let kind = match config.decay_power {
        DecayPower::Cosine => ScheduleKind::Cosine,
        DecayPower::Polynomial(power) => ScheduleKind::Polynomial {
            lr_init: config.learning_rate,
            lr_end: config.end_lr,
            power,
        },
    };
    let scheduler = WarmupScheduler::new(WarmupSchedulerConfig {
        kind,
        warmup_steps,
        total_steps: max_steps,
    })?;

    log::info!(
        "Optimizer {} with {:?} schedule: max_steps={}, warmup_steps={}",
        config.optim_type,
        config.decay_power,
        max_steps,
        warmup_steps
    );

    optimizer.set_lr_factor(scheduler.get_factor());

    Ok(OptimizationSetup {
        optimizer,
        scheduler,
        interval: SchedulerInterval::Step,
    })
}
