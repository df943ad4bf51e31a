//! Aesthetic-score training demo: grouped optimizer, EMD loss and epoch metrics
//! on a toy model with synthetic 10-bin score distributions
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{ops, VarBuilder, VarMap};
use mmaes_train::metrics::{LogSink, Split};
use mmaes_train::training::{build_optimization, named_parameters, EmdLoss, StepBudget};
use mmaes_train::{TrainConfig, TrainingContext};

const FEATURES: usize = 16;
const HIDDEN: usize = 32;
const BINS: usize = 10;
const BATCH: usize = 8;

struct ToyModel {
    dense: candle_nn::Linear,
    norm: candle_nn::LayerNorm,
    head: candle_nn::Linear,
}

impl ToyModel {
    fn new(vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            dense: candle_nn::linear(FEATURES, HIDDEN, vb.pp("encoder.dense"))?,
            norm: candle_nn::layer_norm(HIDDEN, 1e-5, vb.pp("encoder.LayerNorm"))?,
            head: candle_nn::linear(HIDDEN, BINS, vb.pp("ava_classifier"))?,
        })
    }

    /// Predicted score distribution `[batch, BINS]`
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let hidden = self.norm.forward(&self.dense.forward(xs)?.relu()?)?;
        ops::softmax(&self.head.forward(&hidden)?, D::Minus1)
    }
}

/// Random features with softmax-normalized target distributions
fn synthetic_batch(device: &Device) -> candle_core::Result<(Tensor, Tensor)> {
    let inputs = Tensor::randn(0f32, 1.0, (BATCH, FEATURES), device)?;
    let logits = Tensor::randn(0f32, 1.0, (BATCH, BINS), device)?;
    let targets = ops::softmax(&logits, D::Minus1)?;
    Ok((inputs, targets))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("=== Missing-aware prompting - AVA training demo ===");

    let device = Device::Cpu;

    let config = TrainConfig::from_json_str(
        &serde_json::json!({
            "loss_names": { "ava": 1, "vqa": 0 },
            "learning_rate": 1e-3,
            "weight_decay": 0.01,
            "lr_mult": 10,
            "end_lr": 0,
            "decay_power": 1,
            "optim_type": "adamw",
            "warmup_steps": 0.1,
            "test_ratio": 0.7,
            "test_type": "both"
        })
        .to_string(),
    )?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = ToyModel::new(vb)?;
    let params = named_parameters(&varmap)?;
    log::info!("Model parameters: {}", params.len());

    let max_epochs = 3;
    let batches_per_epoch = 20;
    let budget = StepBudget::from_epochs(batches_per_epoch, max_epochs, 1);
    let mut setup = build_optimization(&params, &config, &budget)?;

    let mut ctx = TrainingContext::new(config, params)?;
    let mut sink = LogSink;
    let emd = EmdLoss::new();

    for epoch in 0..max_epochs {
        log::info!("=== Epoch {}/{} ===", epoch + 1, max_epochs);

        for _ in 0..batches_per_epoch {
            let (inputs, targets) = synthetic_batch(&device)?;
            let pred = model.forward(&inputs)?;
            let loss = emd.forward(&targets, &pred)?;

            setup.backward_step(&loss)?;

            let loss_val = loss.to_scalar::<f32>()? as f64;
            ctx.update_ava(Split::Train, "ava", &pred, &targets, loss_val)?;
        }
        let train_metric = ctx.epoch_wrapup(Split::Train, &mut sink)?;

        for _ in 0..batches_per_epoch / 4 {
            let (inputs, targets) = synthetic_batch(&device)?;
            let pred = model.forward(&inputs)?;
            let loss_val = emd.forward(&targets, &pred)?.to_scalar::<f32>()? as f64;
            ctx.update_ava(Split::Val, "ava", &pred, &targets, loss_val)?;
        }
        let val_metric = ctx.epoch_wrapup(Split::Val, &mut sink)?;

        log::info!(
            "Epoch {} complete: train/the_metric={:.4}, val/the_metric={:.4}, lr={:?}",
            epoch + 1,
            train_metric,
            val_metric,
            setup.learning_rates()
        );
    }

    log::info!("Training complete!");

    Ok(())
}
