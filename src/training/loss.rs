//! Earth Mover's Distance loss over ordered bins
//!
//! Both inputs are `[batch, K]` probability distributions. The loss is the
//! root-mean-square of the CDF difference, averaged jointly over batch and
//! bins (not per row).

use candle_core::Tensor;

use crate::{Result, TrainError};

/// Stateless EMD loss
#[derive(Debug, Clone, Copy, Default)]
pub struct EmdLoss;

impl EmdLoss {
    pub fn new() -> Self {
        Self
    }

    /// Compute `sqrt(mean(|cdf(estimate) - cdf(target)|^2))`
    ///
    /// # Arguments
    /// * `p_target` - Target distributions `[batch, K]`
    /// * `p_estimate` - Estimated distributions, same shape
    ///
    /// # Returns
    /// Scalar tensor
    pub fn forward(&self, p_target: &Tensor, p_estimate: &Tensor) -> Result<Tensor> {
        emd_loss(p_target, p_estimate)
    }
}

/// Functional form of [`EmdLoss::forward`]
pub fn emd_loss(p_target: &Tensor, p_estimate: &Tensor) -> Result<Tensor> {
    if p_target.dims() != p_estimate.dims() {
        return Err(TrainError::ShapeMismatch {
            target: p_target.dims().to_vec(),
            estimate: p_estimate.dims().to_vec(),
        });
    }

    let cdf_target = p_target.cumsum(1)?;
    let cdf_estimate = p_estimate.cumsum(1)?;
    let cdf_diff = (cdf_estimate - cdf_target)?;

    Ok(cdf_diff.abs()?.sqr()?.mean_all()?.sqrt()?)
}
