//! Task selection, metric registration and epoch summarization
//!
//! The driver builds one [`TrainingContext`] at setup, feeds batch results into
//! its metric table during each phase and calls [`TrainingContext::epoch_wrapup`]
//! at every epoch boundary.

use candle_core::Tensor;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::metrics::{Metric, MetricKey, MetricKind, MetricSink, MetricTable, Split};
use crate::training::NamedParameter;
use crate::{Result, TrainConfig};

/// Known task families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Vqa,
    Ava,
    /// Configured but without registered metrics
    Other,
}

impl TaskKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "vqa" => TaskKind::Vqa,
            "ava" => TaskKind::Ava,
            _ => TaskKind::Other,
        }
    }

    /// Accumulators registered per split, in logging order
    pub fn metric_kinds(&self) -> &'static [MetricKind] {
        match self {
            TaskKind::Vqa => &[MetricKind::Score, MetricKind::Loss],
            TaskKind::Ava => &[
                MetricKind::Accuracy,
                MetricKind::Srcc,
                MetricKind::Lcc,
                MetricKind::Loss,
            ],
            TaskKind::Other => &[],
        }
    }

    /// Metric added into the running "the_metric" sum
    pub fn primary_metric(&self) -> Option<MetricKind> {
        match self {
            TaskKind::Vqa => Some(MetricKind::Score),
            TaskKind::Ava => Some(MetricKind::Accuracy),
            TaskKind::Other => None,
        }
    }
}

/// Long-lived training state shared by the bookkeeping entry points
pub struct TrainingContext {
    config: TrainConfig,
    pub params: Vec<NamedParameter>,
    current_tasks: Vec<String>,
    pub metrics: MetricTable,
}

impl TrainingContext {
    /// Select active tasks and register their metrics
    pub fn new(config: TrainConfig, params: Vec<NamedParameter>) -> Result<Self> {
        config.validate()?;

        let mut ctx = Self {
            config,
            params,
            current_tasks: Vec::new(),
            metrics: MetricTable::new(),
        };
        ctx.set_task();
        ctx.set_metrics();

        Ok(ctx)
    }

    /// Fix the active task set from the configured loss weights
    fn set_task(&mut self) {
        self.current_tasks = self.config.active_tasks();
        if self.current_tasks.is_empty() {
            log::warn!("No active tasks: every loss weight is below 1");
        } else {
            log::info!("Active tasks: {:?}", self.current_tasks);
        }
    }

    /// Register accumulators for every split and every task with weight > 0
    fn set_metrics(&mut self) {
        for split in Split::ALL {
            for (task, weight) in self.config.loss_names.iter() {
                if *weight <= 0.0 {
                    continue;
                }
                for &kind in TaskKind::from_name(task).metric_kinds() {
                    self.metrics.register(MetricKey::new(split, task.as_str(), kind));
                }
            }
        }
        log::debug!("Registered {} metric accumulators", self.metrics.len());
    }

    /// Configuration the context was built from
    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Tasks with weight >= 1, in configuration order
    pub fn current_tasks(&self) -> &[String] {
        &self.current_tasks
    }

    /// Feed one AVA batch: predicted and target score distributions plus the batch loss
    pub fn update_ava(
        &mut self,
        split: Split,
        task: &str,
        pred: &Tensor,
        target: &Tensor,
        loss: f64,
    ) -> Result<()> {
        for kind in [MetricKind::Accuracy, MetricKind::Srcc, MetricKind::Lcc] {
            self.metrics
                .require_mut(&MetricKey::new(split, task, kind))?
                .update_pair(pred, target)?;
        }
        self.metrics
            .require_mut(&MetricKey::new(split, task, MetricKind::Loss))?
            .update_scalar(loss)
    }

    /// Feed one VQA batch: answer logits and soft target scores plus the batch loss
    pub fn update_vqa(
        &mut self,
        split: Split,
        task: &str,
        logits: &Tensor,
        target: &Tensor,
        loss: f64,
    ) -> Result<()> {
        self.metrics
            .require_mut(&MetricKey::new(split, task, MetricKind::Score))?
            .update_pair(logits, target)?;
        self.metrics
            .require_mut(&MetricKey::new(split, task, MetricKind::Loss))?
            .update_scalar(loss)
    }

    /// Log and reset every active task's metrics for `phase`
    ///
    /// Logs `"{task}/{phase}/{metric}_epoch"` for each metric and the running
    /// sum of primary metrics under `"{phase}/the_metric"` after every task.
    /// Returns the final sum.
    pub fn epoch_wrapup(&mut self, phase: Split, sink: &mut dyn MetricSink) -> Result<f64> {
        let mut the_metric = 0.0;

        for task in self.current_tasks.iter() {
            let kind = TaskKind::from_name(task);
            let mut value = 0.0;

            for &metric in kind.metric_kinds() {
                let accumulator = self.metrics.require_mut(&MetricKey::new(phase, task.as_str(), metric))?;
                let computed = accumulator.compute();
                sink.log(&format!("{}/{}/{}_epoch", task, phase, metric), computed);
                accumulator.reset();

                if kind.primary_metric() == Some(metric) {
                    value = computed;
                }
            }

            if kind == TaskKind::Ava {
                if let Some(exp_name) = &self.config.test_exp_name {
                    let res = format!("Accuracy: {:.2}", 100.0 * value);
                    append_ablation_record(&self.config, task, exp_name, &res)?;
                }
            }

            the_metric += value;
            sink.log(&format!("{}/the_metric", phase), the_metric);
        }

        Ok(the_metric)
    }
}

/// `{records_dir}/{task}/{task}_{exp_name}_on_missing_{test_type}`
pub fn ablation_record_path(config: &TrainConfig, task: &str, exp_name: &str) -> PathBuf {
    config
        .records_dir
        .join(task)
        .join(format!("{}_{}_on_missing_{}", task, exp_name, config.test_type))
}

/// Append one `missing ratio: ..., {res}` line; the directory must already exist
fn append_ablation_record(config: &TrainConfig, task: &str, exp_name: &str, res: &str) -> Result<()> {
    let path = ablation_record_path(config, task, exp_name);
    let line = format!("missing ratio: {}, {}", format_ratio(config.test_ratio), res);

    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "{}", line)?;

    log::info!("Appended ablation record to {:?}: {}", path, line);
    Ok(())
}

/// Shortest round-trip form with a trailing `.0` on integral values
///
/// Magnitudes below 1e-4 or from 1e16 up switch to exponent form with a signed
/// two-digit exponent (`1e-05`, `1e+16`).
fn format_ratio(ratio: f64) -> String {
    if ratio.is_nan() {
        return "nan".to_string();
    }
    if ratio.is_infinite() {
        return if ratio > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let magnitude = ratio.abs();
    if magnitude != 0.0 && (magnitude < 1e-4 || magnitude >= 1e16) {
        let sci = format!("{:e}", ratio);
        if let Some((mantissa, exponent)) = sci.split_once('e') {
            if let Ok(exponent) = exponent.parse::<i32>() {
                let sign = if exponent < 0 { '-' } else { '+' };
                return format!("{}e{}{:02}", mantissa, sign, exponent.abs());
            }
        }
        return sci;
    }

    if ratio.fract() == 0.0 {
        format!("{:.1}", ratio)
    } else {
        format!("{}", ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::metrics::MemorySink;
    use candle_core::Device;
    use indexmap::IndexMap;

    /// Ten-bin distributions with all mass on the given bins
    fn dists(bins: &[usize]) -> Result<Tensor> {
        let mut data = vec![0f32; bins.len() * 10];
        for (row, &bin) in bins.iter().enumerate() {
            data[row * 10 + bin] = 1.0;
        }
        Ok(Tensor::from_vec(data, (bins.len(), 10), &Device::Cpu)?)
    }

    fn context(loss_names: &[(&str, f64)]) -> Result<TrainingContext> {
        let mut config = sample_config();
        config.loss_names = loss_names
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect::<IndexMap<_, _>>();
        TrainingContext::new(config, Vec::new())
    }

    #[test]
    fn test_task_selection() -> Result<()> {
        let ctx = context(&[("vqa", 0.0), ("ava", 1.0), ("mlm", 0.5), ("itm", 3.0)])?;
        assert_eq!(ctx.current_tasks(), &["ava".to_string(), "itm".to_string()]);
        Ok(())
    }

    #[test]
    fn test_metric_registration() -> Result<()> {
        let ctx = context(&[("vqa", 0.5), ("ava", 1.0), ("itm", 1.0), ("mlm", 0.0)])?;

        for split in Split::ALL {
            // Weight in (0, 1) still registers
            assert!(ctx.metrics.contains(&MetricKey::new(split, "vqa", MetricKind::Score)));
            assert!(ctx.metrics.contains(&MetricKey::new(split, "vqa", MetricKind::Loss)));
            for kind in TaskKind::Ava.metric_kinds() {
                assert!(ctx.metrics.contains(&MetricKey::new(split, "ava", *kind)));
            }
        }
        // 2 splits x (2 vqa + 4 ava); unknown kinds register nothing
        assert_eq!(ctx.metrics.len(), 12);
        Ok(())
    }

    #[test]
    fn test_epoch_wrapup_logs_and_resets() -> Result<()> {
        let mut ctx = context(&[("ava", 1.0)])?;

        // Scores 8/2/9/3 vs 7/4/3/1: three of four on the same side of 5
        ctx.update_ava(Split::Val, "ava", &dists(&[7, 1, 8, 2])?, &dists(&[6, 3, 2, 0])?, 0.4)?;
        ctx.update_ava(Split::Val, "ava", &dists(&[0])?, &dists(&[9])?, 0.2)?;

        let mut sink = MemorySink::new();
        let total = ctx.epoch_wrapup(Split::Val, &mut sink)?;

        assert_eq!(
            sink.keys(),
            vec![
                "ava/val/accuracy_epoch",
                "ava/val/srcc_epoch",
                "ava/val/lcc_epoch",
                "ava/val/loss_epoch",
                "val/the_metric",
            ]
        );
        assert!((sink.last("ava/val/accuracy_epoch").unwrap() - 0.6).abs() < 1e-9);
        assert!((sink.last("ava/val/loss_epoch").unwrap() - 0.3).abs() < 1e-9);
        // Correlations are logged but not summed
        assert!((total - 0.6).abs() < 1e-9);

        for kind in TaskKind::Ava.metric_kinds() {
            let metric = ctx.metrics.get(&MetricKey::new(Split::Val, "ava", *kind)).unwrap();
            assert_eq!(metric.compute(), 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_the_metric_relogged_after_each_task() -> Result<()> {
        let mut ctx = context(&[("vqa", 1.0), ("mlm", 0.5), ("ava", 2.0)])?;
        let device = Device::Cpu;

        let logits = Tensor::new(&[[0.0f32, 1.0], [1.0, 0.0]], &device)?;
        let scores = Tensor::new(&[[0.0f32, 1.0], [0.0, 0.0]], &device)?;
        ctx.update_vqa(Split::Train, "vqa", &logits, &scores, 1.0)?;
        ctx.update_ava(Split::Train, "ava", &dists(&[9])?, &dists(&[8])?, 0.1)?;

        let mut sink = MemorySink::new();
        let total = ctx.epoch_wrapup(Split::Train, &mut sink)?;

        assert_eq!(sink.values("train/the_metric"), vec![0.5, 1.5]);
        assert!((total - 1.5).abs() < 1e-9);
        assert_eq!(sink.last("vqa/train/score_epoch"), Some(0.5));
        assert!(sink.keys().iter().all(|k| !k.starts_with("mlm")));
        // Train-phase wrapup leaves val accumulators alone
        assert!(sink.keys().iter().all(|k| !k.contains("/val/")));
        Ok(())
    }

    #[test]
    fn test_unknown_task_contributes_zero() -> Result<()> {
        let mut ctx = context(&[("itm", 1.0)])?;
        let mut sink = MemorySink::new();

        let total = ctx.epoch_wrapup(Split::Val, &mut sink)?;
        assert_eq!(total, 0.0);
        assert_eq!(sink.keys(), vec!["val/the_metric"]);
        Ok(())
    }

    #[test]
    fn test_ablation_record_appended() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = sample_config();
        config.loss_names = IndexMap::from([("ava".to_string(), 1.0)]);
        config.test_exp_name = Some("prompt16".to_string());
        config.records_dir = dir.path().to_path_buf();
        std::fs::create_dir_all(dir.path().join("ava"))?;

        let mut ctx = TrainingContext::new(config, Vec::new())?;
        let mut sink = MemorySink::new();

        ctx.update_ava(Split::Val, "ava", &dists(&[7, 0])?, &dists(&[8, 9])?, 0.5)?;
        ctx.epoch_wrapup(Split::Val, &mut sink)?;
        ctx.epoch_wrapup(Split::Val, &mut sink)?;

        let path = dir.path().join("ava").join("ava_prompt16_on_missing_both");
        let contents = std::fs::read_to_string(path)?;
        assert_eq!(
            contents,
            "missing ratio: 0.7, Accuracy: 50.00\nmissing ratio: 0.7, Accuracy: 0.00\n"
        );
        Ok(())
    }

    #[test]
    fn test_ablation_record_only_for_ava() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = sample_config();
        config.loss_names = IndexMap::from([("vqa".to_string(), 1.0), ("itm".to_string(), 1.0)]);
        config.test_exp_name = Some("exp".to_string());
        config.records_dir = dir.path().to_path_buf();

        let mut ctx = TrainingContext::new(config, Vec::new())?;
        let mut sink = MemorySink::new();

        // No task subdirectory exists, so any append attempt would be an io error
        ctx.epoch_wrapup(Split::Val, &mut sink)?;
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_summarized_tasks_fixed_at_setup() -> Result<()> {
        let mut ctx = context(&[("vqa", 1.0), ("ava", 0.5)])?;
        assert_eq!(ctx.current_tasks(), &["vqa".to_string()]);
        assert_eq!(ctx.config().loss_names.len(), 2);

        let mut sink = MemorySink::new();
        ctx.epoch_wrapup(Split::Train, &mut sink)?;
        assert!(sink.keys().iter().all(|k| !k.starts_with("ava")));
        Ok(())
    }

    #[test]
    fn test_ablation_missing_directory_is_io_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = sample_config();
        config.test_exp_name = Some("exp".to_string());
        config.records_dir = dir.path().join("absent");

        let mut ctx = TrainingContext::new(config, Vec::new())?;
        let mut sink = MemorySink::new();
        assert!(matches!(
            ctx.epoch_wrapup(Split::Val, &mut sink),
            Err(crate::TrainError::Io(_))
        ));
        Ok(())
    }

    #[test]
    fn test_format_ratio() {
        assert_eq!(format_ratio(0.7), "0.7");
        assert_eq!(format_ratio(1.0), "1.0");
        assert_eq!(format_ratio(0.0), "0.0");
        assert_eq!(format_ratio(0.0001), "0.0001");
        assert_eq!(format_ratio(1e-5), "1e-05");
        assert_eq!(format_ratio(1.5e-7), "1.5e-07");
        assert_eq!(format_ratio(1e16), "1e+16");
        assert_eq!(format_ratio(2.5e20), "2.5e+20");
        assert_eq!(format_ratio(123456789.0), "123456789.0");
        assert_eq!(format_ratio(f64::NAN), "nan");
    }
}
