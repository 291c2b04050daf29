// ============================================================
// Layer 5 — Burn Execution Engine
// ============================================================
// Owns the model, the AdamW optimiser and the learning-rate
// schedule, and exposes them to the training loop controller
// through three traits:
//
//   StepExecutor   → forward, backward, optimiser step
//   CheckpointSink → model + optimiser records under step_{N}
//   Evaluator      → full pass over dev / test on model.valid()
//
// Key Burn insight:
//   - Training uses B (Autodiff<...>) for gradients
//   - model.valid() returns the model on B::InnerBackend, which
//     shares B's device type, so evaluation needs no autodiff
//
// Reference: Burn Book §5, Loshchilov & Hutter (2019) AdamW

use anyhow::{ensure, Result};
use burn::{
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::config::{InitSource, OptimSettings};
use crate::data::batcher::RetrievalBatch;
use crate::domain::{
    metrics::{EvalOutcome, Split},
    traits::{CheckpointSink, Evaluator, Fetch, StepExecutor, StepOutputs},
};
use crate::infra::checkpoint::{load_model, load_optimizer, CheckpointManager};
use crate::ml::{evaluator::RetrievalEvaluator, model::RetrievalModel, schedule::LrSchedule};

/// AdamW with decoupled weight decay:
///   m = β1*m + (1-β1)*g
///   v = β2*v + (1-β2)*g²
///   θ = θ - lr * (m / (√v + ε) + λθ)
pub fn build_optimizer<B: AutodiffBackend>(
    settings: &OptimSettings,
) -> impl Optimizer<RetrievalModel<B>, B> {
    AdamWConfig::new()
        .with_beta_1(settings.beta1 as f32)
        .with_beta_2(settings.beta2 as f32)
        .with_epsilon(settings.epsilon as f32)
        .with_weight_decay(settings.weight_decay as f32)
        .init::<B, RetrievalModel<B>>()
}

pub struct BurnTrainer<B: AutodiffBackend, O> {
    model:       RetrievalModel<B>,
    optim:       O,
    schedule:    LrSchedule,
    device:      B::Device,
    checkpoints: CheckpointManager,
    evaluator:   RetrievalEvaluator,
    /// Optimisation steps executed by this engine
    steps:       u64,
}

impl<B, O> BurnTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<RetrievalModel<B>, B>,
{
    pub fn new(
        model:       RetrievalModel<B>,
        optim:       O,
        schedule:    LrSchedule,
        device:      B::Device,
        checkpoints: CheckpointManager,
        evaluator:   RetrievalEvaluator,
    ) -> Self {
        Self { model, optim, schedule, device, checkpoints, evaluator, steps: 0 }
    }

    /// Load the starting parameters (and optimiser state, when resuming).
    pub fn restore(self, init: &InitSource) -> Result<Self> {
        match init {
            InitSource::Random => {
                tracing::info!("Starting from randomly initialised parameters");
                Ok(self)
            }
            InitSource::Pretrained(dir) => {
                tracing::info!("Loading parameters from '{}'", dir.display());
                let model = load_model(dir, self.model, &self.device)?;
                Ok(Self { model, ..self })
            }
            InitSource::Checkpoint(dir) => {
                tracing::info!("Resuming from checkpoint '{}'", dir.display());
                let model = load_model(dir, self.model, &self.device)?;
                let optim = load_optimizer(dir, self.optim, &self.device)?;
                Ok(Self { model, optim, ..self })
            }
        }
    }

    #[cfg(test)]
    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl<B, O> StepExecutor<RetrievalBatch<B>> for BurnTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<RetrievalModel<B>, B>,
{
    fn run_step(&mut self, batch: RetrievalBatch<B>, fetch: Fetch) -> Result<Option<StepOutputs>> {
        self.steps += 1;
        let lr   = self.schedule.lr_at(self.steps);
        let loss = self.model.forward_loss(batch);

        let outputs = match fetch {
            Fetch::Nothing   => None,
            Fetch::LossAndLr => {
                let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
                ensure!(loss_val.is_finite(), "Loss diverged at step {}: {}", self.steps, loss_val);
                Some(StepOutputs { loss: loss_val, learning_rate: lr })
            }
        };

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self.optim.step(lr, self.model.clone(), grads);

        Ok(outputs)
    }
}

impl<B, O> CheckpointSink for BurnTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<RetrievalModel<B>, B>,
{
    fn save_checkpoint(&mut self, step: u64) -> Result<()> {
        let dir = self.checkpoints.save(step, &self.model, &self.optim)?;
        tracing::info!("Checkpoint saved to '{}'", dir.display());
        Ok(())
    }
}

impl<B, O> Evaluator for BurnTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<RetrievalModel<B>, B>,
{
    fn evaluate(&mut self, split: Split) -> Result<EvalOutcome> {
        // Dropout off, no autodiff graph
        let model_valid = self.model.valid();
        self.evaluator.evaluate(&model_valid, &self.device, split)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use burn::backend::{Autodiff, NdArray};
    use burn::data::dataloader::batcher::Batcher;

    use crate::application::config::sample_config;
    use crate::data::{batcher::RetrievalBatcher, dataset::RetrievalDataset};
    use crate::ml::model::tests::{tiny_config, tiny_samples};
    use crate::ml::schedule::SchedulerKind;

    type TestBackend = Autodiff<NdArray>;

    fn trainer(dir: &Path) -> BurnTrainer<TestBackend, impl Optimizer<RetrievalModel<TestBackend>, TestBackend>> {
        let device   = Default::default();
        let schedule = LrSchedule::build(SchedulerKind::LinearWarmupDecay, 1e-2, 0, 0, vec![], vec![]).unwrap();
        let evaluator = RetrievalEvaluator::new(4, "avg_recall")
            .with_split(Split::Dev, RetrievalDataset::from_samples(tiny_samples()));

        BurnTrainer::new(
            tiny_config().init(&device),
            build_optimizer(&sample_config().optim),
            schedule,
            device,
            CheckpointManager::new(dir).unwrap(),
            evaluator,
        )
    }

    fn batch() -> RetrievalBatch<TestBackend> {
        RetrievalBatcher::<TestBackend>::new(Default::default()).batch(tiny_samples())
    }

    #[test]
    fn test_fetch_controls_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainer(dir.path());

        assert!(t.run_step(batch(), Fetch::Nothing).unwrap().is_none());
        let out = t.run_step(batch(), Fetch::LossAndLr).unwrap().unwrap();
        assert_eq!(out.learning_rate, 1e-2);
        assert!(out.loss > 0.0);
        assert_eq!(t.steps(), 2);
    }

    #[test]
    fn test_repeated_steps_reduce_loss() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainer(dir.path());

        let first = t.run_step(batch(), Fetch::LossAndLr).unwrap().unwrap().loss;
        for _ in 0..30 {
            t.run_step(batch(), Fetch::Nothing).unwrap();
        }
        let last = t.run_step(batch(), Fetch::LossAndLr).unwrap().unwrap().loss;
        assert!(last < first, "loss went from {first} to {last}");
    }

    #[test]
    fn test_checkpoint_then_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainer(dir.path());
        t.run_step(batch(), Fetch::Nothing).unwrap();
        t.save_checkpoint(1).unwrap();

        let step_dir = dir.path().join("step_1");
        assert!(step_dir.join("model.mpk").exists());
        assert!(step_dir.join("optimizer.mpk").exists());

        let resumed = trainer(dir.path()).restore(&InitSource::Checkpoint(step_dir)).unwrap();
        assert_eq!(resumed.steps(), 0);
    }

    #[test]
    fn test_evaluates_on_loaded_split() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainer(dir.path());
        let outcome = t.evaluate(Split::Dev).unwrap();
        assert_eq!(outcome.primary_metric, "avg_recall");
        assert!(t.evaluate(Split::Test).is_err());
    }
}
