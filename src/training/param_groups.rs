//! Parameter partitioning into optimizer groups
//!
//! Each parameter is classified by two independent substring predicates on its
//! dotted name: *no-decay* (biases and normalization weights) and *head*
//! (the task classifier). The 2x2 cross gives four disjoint groups.

use candle_core::Var;
use candle_nn::VarMap;

use crate::{Result, TrainConfig, TrainError};

/// Name fragments of parameters excluded from weight decay
pub const NO_DECAY: [&str; 9] = [
    "bias",
    "LayerNorm.bias",
    "LayerNorm.weight",
    "norm.bias",
    "norm.weight",
    "norm1.bias",
    "norm1.weight",
    "norm2.bias",
    "norm2.weight",
];

/// Name fragments of head parameters that get `lr * lr_mult`
pub const HEAD_NAMES: [&str; 1] = ["ava_classifier"];

/// A trainable variable and its dotted path
#[derive(Debug, Clone)]
pub struct NamedParameter {
    pub name: String,
    pub var: Var,
}

impl NamedParameter {
    pub fn new(name: impl Into<String>, var: Var) -> Self {
        Self {
            name: name.into(),
            var,
        }
    }
}

/// Collect every variable of a `VarMap`, sorted by name
pub fn named_parameters(varmap: &VarMap) -> Result<Vec<NamedParameter>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| TrainError::Training(format!("VarMap lock poisoned: {}", e)))?;

    let mut params: Vec<NamedParameter> = data
        .iter()
        .map(|(name, var)| NamedParameter::new(name.clone(), var.clone()))
        .collect();
    params.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(params)
}

/// Which of the four groups a parameter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupRole {
    Decay,
    NoDecay,
    HeadDecay,
    HeadNoDecay,
}

impl GroupRole {
    /// Construction order of the groups
    pub const ALL: [GroupRole; 4] = [
        GroupRole::Decay,
        GroupRole::NoDecay,
        GroupRole::HeadDecay,
        GroupRole::HeadNoDecay,
    ];

    /// Classify a parameter by name
    pub fn classify(name: &str) -> Self {
        match (is_no_decay(name), is_head(name)) {
            (false, false) => GroupRole::Decay,
            (true, false) => GroupRole::NoDecay,
            (false, true) => GroupRole::HeadDecay,
            (true, true) => GroupRole::HeadNoDecay,
        }
    }

    pub fn is_head(&self) -> bool {
        matches!(self, GroupRole::HeadDecay | GroupRole::HeadNoDecay)
    }

    pub fn decays(&self) -> bool {
        matches!(self, GroupRole::Decay | GroupRole::HeadDecay)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupRole::Decay => "decay",
            GroupRole::NoDecay => "no_decay",
            GroupRole::HeadDecay => "head_decay",
            GroupRole::HeadNoDecay => "head_no_decay",
        }
    }
}

pub fn is_no_decay(name: &str) -> bool {
    NO_DECAY.iter().any(|nd| name.contains(nd))
}

pub fn is_head(name: &str) -> bool {
    HEAD_NAMES.iter().any(|h| name.contains(h))
}

/// Parameters sharing one weight decay and one base learning rate
#[derive(Debug, Clone)]
pub struct ParamGroup {
    pub role: GroupRole,
    pub params: Vec<NamedParameter>,
    pub weight_decay: f64,
    pub lr: f64,
}

impl ParamGroup {
    pub fn vars(&self) -> Vec<Var> {
        self.params.iter().map(|p| p.var.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Split parameters into the four groups, in `GroupRole::ALL` order.
///
/// Input order is preserved within each group.
pub fn partition_parameters(params: &[NamedParameter], config: &TrainConfig) -> Vec<ParamGroup> {
    let mut groups: Vec<ParamGroup> = GroupRole::ALL
        .iter()
        .map(|&role| ParamGroup {
            role,
            params: Vec::new(),
            weight_decay: if role.decays() { config.weight_decay } else { 0.0 },
            lr: if role.is_head() {
                config.head_learning_rate()
            } else {
                config.learning_rate
            },
        })
        .collect();

    for param in params {
        // Discriminants follow ALL order
        let role = GroupRole::classify(&param.name);
        groups[role as usize].params.push(param.clone());
    }

    groups
}
