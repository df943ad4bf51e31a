//! Optimizers over partitioned parameter groups
//!
//! `adamw` uses candle-nn's decoupled-weight-decay AdamW per group. `adam` and
//! `sgd` use the coupled-weight-decay implementations below, which fold
//! `weight_decay * param` into the gradient before the update.

use candle_core::backprop::GradStore;
use candle_core::{Result, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};

use super::param_groups::{GroupRole, ParamGroup};
use crate::OptimType;

/// Adam configuration
#[derive(Debug, Clone)]
pub struct ParamsAdam {
    /// Learning rate
    pub lr: f64,
    /// Coefficient for computing running averages of gradient (beta1)
    pub beta1: f64,
    /// Coefficient for computing running averages of squared gradient (beta2)
    pub beta2: f64,
    /// Term added to denominator for numerical stability
    pub eps: f64,
    /// L2 penalty added to the gradient
    pub weight_decay: f64,
}

impl Default for ParamsAdam {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

/// Per-parameter state for Adam
#[derive(Debug, Clone)]
struct AdamState {
    /// First moment estimate
    m: Tensor,
    /// Second moment estimate
    v: Tensor,
    step: i32,
}

/// Adam with L2 weight decay folded into the gradient
pub struct Adam {
    config: ParamsAdam,
    vars: Vec<Var>,
    states: Vec<AdamState>,
}

impl Optimizer for Adam {
    type Config = ParamsAdam;

    fn new(vars: Vec<Var>, config: ParamsAdam) -> Result<Self> {
        let states = vars
            .iter()
            .map(|var| {
                Ok(AdamState {
                    m: var.zeros_like()?,
                    v: var.zeros_like()?,
                    step: 0,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            vars,
            states,
        })
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        let ParamsAdam {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.config;

        for (var, state) in self.vars.iter().zip(self.states.iter_mut()) {
            let Some(grad) = grads.get(var) else {
                continue;
            };
            let grad = if weight_decay > 0.0 {
                (grad + (var.as_tensor() * weight_decay)?)?
            } else {
                grad.clone()
            };

            state.step += 1;

            // m = beta1 * m + (1 - beta1) * grad
            state.m = ((&state.m * beta1)? + (&grad * (1.0 - beta1))?)?;
            // v = beta2 * v + (1 - beta2) * grad^2
            state.v = ((&state.v * beta2)? + (grad.sqr()? * (1.0 - beta2))?)?;

            let m_hat = (&state.m / (1.0 - beta1.powi(state.step)))?;
            let v_hat = (&state.v / (1.0 - beta2.powi(state.step)))?;

            let update = ((m_hat / (v_hat.sqrt()? + eps)?)? * lr)?;
            var.set(&var.as_tensor().sub(&update)?)?;
        }

        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.config.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
    }
}

/// SGD configuration
#[derive(Debug, Clone)]
pub struct ParamsSgd {
    pub lr: f64,
    pub momentum: f64,
    /// L2 penalty added to the gradient
    pub weight_decay: f64,
}

impl Default for ParamsSgd {
    fn default() -> Self {
        Self {
            lr: 1e-2,
            momentum: 0.9,
            weight_decay: 0.0,
        }
    }
}

/// SGD with heavy-ball momentum (no dampening, no Nesterov)
pub struct SgdMomentum {
    config: ParamsSgd,
    vars: Vec<Var>,
    /// Momentum buffers, seeded with the first gradient seen
    buffers: Vec<Option<Tensor>>,
}

impl Optimizer for SgdMomentum {
    type Config = ParamsSgd;

    fn new(vars: Vec<Var>, config: ParamsSgd) -> Result<Self> {
        let buffers = vec![None; vars.len()];
        Ok(Self {
            config,
            vars,
            buffers,
        })
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        let ParamsSgd {
            lr,
            momentum,
            weight_decay,
        } = self.config;

        for (var, buffer) in self.vars.iter().zip(self.buffers.iter_mut()) {
            let Some(grad) = grads.get(var) else {
                continue;
            };
            let grad = if weight_decay > 0.0 {
                (grad + (var.as_tensor() * weight_decay)?)?
            } else {
                grad.clone()
            };

            let direction = match buffer.take() {
                Some(prev) if momentum != 0.0 => ((prev * momentum)? + &grad)?,
                _ => grad,
            };

            var.set(&var.as_tensor().sub(&(&direction * lr)?)?)?;
            *buffer = Some(direction);
        }

        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.config.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
    }
}

/// Inner optimizer of one parameter group
pub enum GroupOptimizer {
    AdamW(AdamW),
    Adam(Adam),
    Sgd(SgdMomentum),
}

impl GroupOptimizer {
    fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            GroupOptimizer::AdamW(opt) => opt.step(grads),
            GroupOptimizer::Adam(opt) => opt.step(grads),
            GroupOptimizer::Sgd(opt) => opt.step(grads),
        }
    }

    fn learning_rate(&self) -> f64 {
        match self {
            GroupOptimizer::AdamW(opt) => opt.learning_rate(),
            GroupOptimizer::Adam(opt) => opt.learning_rate(),
            GroupOptimizer::Sgd(opt) => opt.learning_rate(),
        }
    }

    fn set_learning_rate(&mut self, lr: f64) {
        match self {
            GroupOptimizer::AdamW(opt) => opt.set_learning_rate(lr),
            GroupOptimizer::Adam(opt) => opt.set_learning_rate(lr),
            GroupOptimizer::Sgd(opt) => opt.set_learning_rate(lr),
        }
    }
}

/// One parameter group with its own optimizer state
pub struct OptimizerGroup {
    pub role: GroupRole,
    /// Learning rate before schedule scaling
    pub base_lr: f64,
    pub weight_decay: f64,
    pub num_params: usize,
    inner: GroupOptimizer,
}

impl OptimizerGroup {
    /// Current (scheduled) learning rate
    pub fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }
}

/// Optimizer over all parameter groups
pub struct GroupedOptimizer {
    optim_type: OptimType,
    groups: Vec<OptimizerGroup>,
}

impl GroupedOptimizer {
    /// Build one inner optimizer per group
    ///
    /// # Arguments
    /// * `optim_type` - Optimizer family shared by every group
    /// * `groups` - Partitioned parameters with per-group lr and weight decay
    pub fn new(optim_type: OptimType, groups: Vec<ParamGroup>) -> Result<Self> {
        let groups = groups
            .into_iter()
            .map(|group| {
                let inner = match optim_type {
                    OptimType::AdamW => GroupOptimizer::AdamW(AdamW::new(
                        group.vars(),
                        ParamsAdamW {
                            lr: group.lr,
                            beta1: 0.9,
                            beta2: 0.98,
                            eps: 1e-8,
                            weight_decay: group.weight_decay,
                        },
                    )?),
                    OptimType::Adam => GroupOptimizer::Adam(Adam::new(
                        group.vars(),
                        ParamsAdam {
                            lr: group.lr,
                            weight_decay: group.weight_decay,
                            ..Default::default()
                        },
                    )?),
                    OptimType::Sgd => GroupOptimizer::Sgd(SgdMomentum::new(
                        group.vars(),
                        ParamsSgd {
                            lr: group.lr,
                            momentum: 0.9,
                            weight_decay: group.weight_decay,
                        },
                    )?),
                };

                Ok(OptimizerGroup {
                    role: group.role,
                    base_lr: group.lr,
                    weight_decay: group.weight_decay,
                    num_params: group.len(),
                    inner,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { optim_type, groups })
    }

    /// Step every group
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        for group in self.groups.iter_mut() {
            group.inner.step(grads)?;
        }
        Ok(())
    }

    /// Set each group's learning rate to `base_lr * factor`
    pub fn set_lr_factor(&mut self, factor: f64) {
        for group in self.groups.iter_mut() {
            group.inner.set_learning_rate(group.base_lr * factor);
        }
    }

    /// Current learning rate of each group, in group order
    pub fn learning_rates(&self) -> Vec<f64> {
        self.groups.iter().map(|g| g.learning_rate()).collect()
    }

    pub fn groups(&self) -> &[OptimizerGroup] {
        &self.groups
    }

    pub fn optim_type(&self) -> OptimType {
        self.optim_type
    }
}
