//! Optimization setup and losses for the training loop

pub mod loss;
pub mod optimizer;
pub mod param_groups;
pub mod scheduler;
pub mod setup;

pub use loss::{emd_loss, EmdLoss};
pub use optimizer::{Adam, GroupedOptimizer, ParamsAdam, ParamsSgd, SgdMomentum};
pub use param_groups::{named_parameters, partition_parameters, GroupRole, NamedParameter, ParamGroup};
pub use scheduler::{ScheduleKind, WarmupScheduler, WarmupSchedulerConfig};
pub use setup::{build_optimization, OptimizationSetup, SchedulerInterval, StepBudget};
