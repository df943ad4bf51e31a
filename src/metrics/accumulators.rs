//! Epoch metric accumulators
//!
//! Each accumulator collects batch statistics with `update` and reports one
//! scalar with `compute`. Empty accumulators report `0.0`.

use candle_core::{DType, Tensor, D};

use crate::{Result, TrainError};

/// Mean-opinion-score threshold separating high and low quality images
pub const AVA_THRESHOLD: f64 = 5.0;

/// Common accumulator interface
pub trait Metric {
    /// Value over everything seen since the last reset
    fn compute(&self) -> f64;

    /// Clear accumulated state
    fn reset(&mut self);
}

/// Mean opinion score of each row of a `[batch, K]` distribution: `sum (i+1) * p_i`
pub fn mean_scores(dist: &Tensor) -> Result<Vec<f64>> {
    let rows = dist.to_dtype(DType::F64)?.to_vec2::<f64>()?;
    Ok(rows
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, p)| (i + 1) as f64 * p)
                .sum::<f64>()
        })
        .collect())
}

/// Reject a batch whose prediction and target shapes differ
fn check_shapes(pred: &Tensor, target: &Tensor) -> Result<()> {
    if pred.dims() != target.dims() {
        return Err(TrainError::ShapeMismatch {
            target: target.dims().to_vec(),
            estimate: pred.dims().to_vec(),
        });
    }
    Ok(())
}

/// VQA soft score: the target score of each row's arg-max answer
#[derive(Debug, Clone, Default)]
pub struct VqaScore {
    score: f64,
    total: usize,
}

impl VqaScore {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Arguments
    /// * `logits` - Answer logits `[batch, num_answers]`
    /// * `target` - Soft target scores `[batch, num_answers]`
    pub fn update(&mut self, logits: &Tensor, target: &Tensor) -> Result<()> {
        check_shapes(logits, target)?;
        let predicted = logits.argmax(D::Minus1)?.to_vec1::<u32>()?;
        let target = target.to_dtype(DType::F64)?.to_vec2::<f64>()?;

        for (answer, scores) in predicted.iter().zip(target.iter()) {
            self.score += scores.get(*answer as usize).copied().unwrap_or(0.0);
        }
        self.total += predicted.len();

        Ok(())
    }
}

impl Metric for VqaScore {
    fn compute(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.score / self.total as f64
    }

    fn reset(&mut self) {
        self.score = 0.0;
        self.total = 0;
    }
}

/// Running mean of a scalar (batch losses)
#[derive(Debug, Clone, Default)]
pub struct Scalar {
    sum: f64,
    count: usize,
}

impl Scalar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }
}

impl Metric for Scalar {
    fn compute(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

/// Binary aesthetic accuracy: predicted and target mean scores on the same
/// side of [`AVA_THRESHOLD`]
#[derive(Debug, Clone, Default)]
pub struct AvaAccuracy {
    correct: usize,
    total: usize,
}

impl AvaAccuracy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from `[batch, K]` predicted and target distributions
    pub fn update(&mut self, pred: &Tensor, target: &Tensor) -> Result<()> {
        check_shapes(pred, target)?;
        let pred = mean_scores(pred)?;
        let target = mean_scores(target)?;

        self.correct += pred
            .iter()
            .zip(target.iter())
            .filter(|(p, t)| (**p > AVA_THRESHOLD) == (**t > AVA_THRESHOLD))
            .count();
        self.total += pred.len();

        Ok(())
    }
}

impl Metric for AvaAccuracy {
    fn compute(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }
}

/// Predicted/target mean-score pairs collected over an epoch
#[derive(Debug, Clone, Default)]
struct ScorePairs {
    pred: Vec<f64>,
    target: Vec<f64>,
}

impl ScorePairs {
    fn update(&mut self, pred: &Tensor, target: &Tensor) -> Result<()> {
        check_shapes(pred, target)?;
        let pred = mean_scores(pred)?;
        let target = mean_scores(target)?;
        self.pred.extend(pred);
        self.target.extend(target);
        Ok(())
    }

    fn clear(&mut self) {
        self.pred.clear();
        self.target.clear();
    }
}

/// Spearman rank correlation of mean scores
#[derive(Debug, Clone, Default)]
pub struct Srcc {
    pairs: ScorePairs,
}

impl Srcc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, pred: &Tensor, target: &Tensor) -> Result<()> {
        self.pairs.update(pred, target)
    }
}

impl Metric for Srcc {
    fn compute(&self) -> f64 {
        pearson(&ranks(&self.pairs.pred), &ranks(&self.pairs.target))
    }

    fn reset(&mut self) {
        self.pairs.clear();
    }
}

/// Pearson linear correlation of mean scores
#[derive(Debug, Clone, Default)]
pub struct Lcc {
    pairs: ScorePairs,
}

impl Lcc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, pred: &Tensor, target: &Tensor) -> Result<()> {
        self.pairs.update(pred, target)
    }
}

impl Metric for Lcc {
    fn compute(&self) -> f64 {
        pearson(&self.pairs.pred, &self.pairs.target)
    }

    fn reset(&mut self) {
        self.pairs.clear();
    }
}

/// Pearson correlation; 0.0 for fewer than two samples or zero variance
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }

    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x[..n].iter().zip(y[..n].iter()) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }
    cov / denom
}

/// 1-based ranks, ties share their average rank
pub fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut result = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Positions start..end hold ranks start+1..=end
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            result[idx] = rank;
        }
        start = end;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    /// Ten-bin distribution with all mass on `bin` (score = bin + 1)
    fn one_hot_rows(bins: &[usize]) -> Result<Tensor> {
        let mut data = vec![0f32; bins.len() * 10];
        for (row, &bin) in bins.iter().enumerate() {
            data[row * 10 + bin] = 1.0;
        }
        Ok(Tensor::from_vec(data, (bins.len(), 10), &Device::Cpu)?)
    }

    #[test]
    fn test_mean_scores() -> Result<()> {
        let dist = Tensor::new(&[[0.5f32, 0.5, 0.0], [0.0, 0.0, 1.0]], &Device::Cpu)?;
        let scores = mean_scores(&dist)?;
        assert!((scores[0] - 1.5).abs() < 1e-9);
        assert!((scores[1] - 3.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_vqa_score() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[0.1f32, 2.0, 0.3], [3.0, 0.0, 0.0]], &device)?;
        let target = Tensor::new(&[[0.0f32, 0.6, 1.0], [0.3, 0.0, 0.0]], &device)?;

        let mut metric = VqaScore::new();
        metric.update(&logits, &target)?;
        assert!((metric.compute() - 0.45).abs() < 1e-6);

        metric.reset();
        assert_eq!(metric.compute(), 0.0);
        Ok(())
    }

    #[test]
    fn test_scalar_mean() {
        let mut metric = Scalar::new();
        metric.update(1.0);
        metric.update(2.0);
        metric.update(6.0);
        assert!((metric.compute() - 3.0).abs() < 1e-12);

        metric.reset();
        assert_eq!(metric.compute(), 0.0);
    }

    #[test]
    fn test_ava_accuracy() -> Result<()> {
        let mut metric = AvaAccuracy::new();
        // Scores 8 vs 7 (both high), 2 vs 9 (wrong side), 5 vs 3 (both low, 5 is not high)
        let pred = one_hot_rows(&[7, 1, 4])?;
        let target = one_hot_rows(&[6, 8, 2])?;
        metric.update(&pred, &target)?;

        assert!((metric.compute() - 2.0 / 3.0).abs() < 1e-9);

        metric.reset();
        assert_eq!(metric.compute(), 0.0);
        Ok(())
    }

    #[test]
    fn test_ranks_with_ties() {
        assert_eq!(ranks(&[10.0, 30.0, 20.0]), vec![1.0, 3.0, 2.0]);
        assert_eq!(ranks(&[1.0, 2.0, 2.0, 3.0]), vec![1.0, 2.5, 2.5, 4.0]);
        assert!(ranks(&[]).is_empty());
    }

    #[test]
    fn test_pearson() {
        assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-12);
        assert!((pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]) + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&[1.0], &[1.0]), 0.0);
        assert_eq!(pearson(&[1.0, 1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_srcc_is_monotonic_invariant() -> Result<()> {
        let mut srcc = Srcc::new();
        let mut lcc = Lcc::new();
        // Scores 1, 2, 3, 10 vs 1, 2, 3, 4: same order, not linear
        let pred = one_hot_rows(&[0, 1, 2, 9])?;
        let target = one_hot_rows(&[0, 1, 2, 3])?;
        srcc.update(&pred, &target)?;
        lcc.update(&pred, &target)?;

        assert!((srcc.compute() - 1.0).abs() < 1e-12);
        assert!(lcc.compute() < 1.0 - 1e-3);
        assert!(lcc.compute() > 0.0);

        srcc.reset();
        lcc.reset();
        assert_eq!(srcc.compute(), 0.0);
        assert_eq!(lcc.compute(), 0.0);
        Ok(())
    }

    #[test]
    fn test_vqa_score_rejects_mismatched_rows() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[0.0f32, 1.0], [1.0, 0.0], [1.0, 0.0]], &device)?;
        let target = Tensor::new(&[[0.0f32, 1.0], [1.0, 0.0]], &device)?;

        let mut metric = VqaScore::new();
        assert!(matches!(
            metric.update(&logits, &target),
            Err(TrainError::ShapeMismatch { .. })
        ));
        assert_eq!(metric.compute(), 0.0);
        Ok(())
    }

    #[test]
    fn test_ava_accuracy_rejects_mismatched_rows() -> Result<()> {
        let mut metric = AvaAccuracy::new();
        assert!(matches!(
            metric.update(&one_hot_rows(&[7, 1, 4])?, &one_hot_rows(&[6, 8])?),
            Err(TrainError::ShapeMismatch { .. })
        ));

        // Nothing was counted from the rejected batch
        metric.update(&one_hot_rows(&[7, 1])?, &one_hot_rows(&[6, 0])?)?;
        assert!((metric.compute() - 1.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_correlations_stay_aligned_after_rejected_batch() -> Result<()> {
        let mut srcc = Srcc::new();
        let mut lcc = Lcc::new();
        let pred = one_hot_rows(&[0, 1, 2])?;
        let target = one_hot_rows(&[0, 1])?;

        assert!(matches!(
            srcc.update(&pred, &target),
            Err(TrainError::ShapeMismatch { target, estimate })
                if target == vec![2, 10] && estimate == vec![3, 10]
        ));
        assert!(lcc.update(&pred, &target).is_err());

        // Perfectly correlated batch after the rejection
        let aligned = one_hot_rows(&[0, 3, 5, 8])?;
        srcc.update(&aligned, &aligned)?;
        lcc.update(&aligned, &aligned)?;
        assert!((srcc.compute() - 1.0).abs() < 1e-12);
        assert!((lcc.compute() - 1.0).abs() < 1e-12);
        Ok(())
    }
}
