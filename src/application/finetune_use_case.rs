// ============================================================
// Layer 2 — FinetuneUseCase
// ============================================================
// Orchestrates one finetuning / evaluation run:
//
//   Step 1: Validate the run configuration     (Layer 2)
//   Step 2: Load and check the model config    (Layer 5)
//   Step 3: Resolve worker role and device     (Layer 6)
//   Step 4: Load / build the tokenizer         (Layer 6)
//   Step 5: Read train / dev / test splits     (Layer 4)
//   Step 6: Derive step counts and LR schedule (Layer 5)
//   Step 7: Build model, optimiser, engine     (Layer 5)
//   Step 8: Restore initial parameters         (Layer 6)
//   Step 9: Run the training loop + final eval (Layer 2)
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use std::{path::Path, sync::Arc};

use anyhow::{anyhow, ensure, Context, Result};
use burn::{
    backend::{
        ndarray::NdArrayDevice,
        wgpu::WgpuDevice,
        Autodiff, NdArray, Wgpu,
    },
    config::Config,
    data::dataset::Dataset,
    tensor::backend::AutodiffBackend,
};

use crate::application::{
    config::{RunConfig, SplitPaths},
    training_loop::{EvalPlan, FinalReport, LoopSettings, TrainingLoop},
};
use crate::data::{
    batcher::RetrievalBatcher,
    dataset::RetrievalDataset,
    feed::{steps_per_epoch, EpochFeed},
    preprocessor::Preprocessor,
    reader::{ImageFeatureStore, RetrievalCorpus},
};
use crate::domain::{metrics::Split, role::WorkerRole};
use crate::infra::{
    checkpoint::CheckpointManager,
    cluster::{ClusterEnv, SyncPlan},
    metrics::MetricsLogger,
    tokenizer_store::{CaptionEncoder, TokenizerStore},
};
use crate::ml::{
    evaluator::RetrievalEvaluator,
    model::RetrievalModelConfig,
    schedule::{epoch_decay_plan, LrSchedule},
    trainer::{build_optimizer, BurnTrainer},
};

pub struct FinetuneUseCase {
    config: RunConfig,
}

impl FinetuneUseCase {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    /// Execute the full run end to end
    pub fn execute(&self) -> Result<FinalReport> {
        let cfg = &self.config;

        // ── Step 1: Fail fast on unusable options ─────────────────────────────
        cfg.validate()?;
        print_arguments(cfg)?;

        if cfg.use_fp16 {
            tracing::warn!("use_fp16 is not supported by the f32 backends; training in f32");
        }

        // ── Step 2: Model architecture ────────────────────────────────────────
        let model_cfg = RetrievalModelConfig::load(&cfg.model_config)
            .map_err(|e| anyhow!("Cannot load model config '{}': {e:?}", cfg.model_config.display()))?;
        model_cfg.check()?;
        ensure!(
            cfg.max_seq_len <= model_cfg.max_seq_len,
            "max_seq_len {} exceeds the model's position table ({})",
            cfg.max_seq_len,
            model_cfg.max_seq_len
        );
        println!("Model config: {model_cfg}");

        // ── Step 3: Topology and device ───────────────────────────────────────
        let dist = &cfg.distributed;
        let env  = if dist.is_distributed { ClusterEnv::from_env()? } else { ClusterEnv::default() };
        let role = env.role(dist.is_distributed)?;
        println!("is_distributed: {}", dist.is_distributed);
        if dist.is_distributed {
            let plan = SyncPlan::build(dist, role.trainers_num())?;
            tracing::info!(
                "worker_endpoints: {:?} trainers_num: {} current_endpoint: {:?} trainer_id: {}",
                env.endpoints,
                role.trainers_num(),
                env.current_endpoint,
                role.trainer_id()
            );
            tracing::info!("Sync plan: {:?}", plan);
        }

        if cfg.use_gpu {
            let device = match env.device_id() {
                Some(id) => WgpuDevice::DiscreteGpu(id),
                None     => WgpuDevice::default(),
            };
            tracing::info!("Using WGPU device: {:?}", device);
            self.run::<Autodiff<Wgpu>>(model_cfg, role, device, env.device_id().unwrap_or(0))
        } else {
            tracing::info!("Using CPU (ndarray) backend");
            self.run::<Autodiff<NdArray>>(model_cfg, role, NdArrayDevice::Cpu, 0)
        }
    }

    fn run<B: AutodiffBackend>(
        &self,
        model_cfg: RetrievalModelConfig,
        role:      WorkerRole,
        device:    B::Device,
        device_id: usize,
    ) -> Result<FinalReport> {
        let cfg = &self.config;

        if let Some(seed) = cfg.random_seed {
            B::seed(seed);
        }

        // ── Step 4: Tokenizer ─────────────────────────────────────────────────
        let tokenizer = TokenizerStore::new(&cfg.checkpoints).load_or_build(&cfg.tokenizer)?;
        let encoder   = CaptionEncoder::new(tokenizer, cfg.max_seq_len);
        ensure!(
            encoder.vocab_size() <= model_cfg.vocab_size,
            "Tokenizer has {} tokens but the model only embeds {}",
            encoder.vocab_size(),
            model_cfg.vocab_size
        );
        let cleaner = Preprocessor::new(cfg.tokenizer.do_lower_case);

        let load = |paths: &SplitPaths, name: &str| -> Result<RetrievalDataset> {
            load_split(paths, name, model_cfg.image_feature_dim, &cleaner, &encoder)
        };

        // ── Step 5: Data ──────────────────────────────────────────────────────
        let mut evaluator = RetrievalEvaluator::new(cfg.batch_size, cfg.key_eval.clone());
        if cfg.do_val {
            evaluator = evaluator.with_split(Split::Dev, load(&cfg.dev, "dev")?);
        }
        if cfg.do_test {
            evaluator = evaluator.with_split(Split::Test, load(&cfg.test, "test")?);
        }
        let train = if cfg.do_train { Some(load(&cfg.train, "train")?) } else { None };

        // ── Step 6: Step counts and schedule ──────────────────────────────────
        let trainers   = role.trainers_num();
        let per_epoch  = train.as_ref().map_or(0, |ds| steps_per_epoch(ds.len(), cfg.batch_size, trainers));
        let max_steps  = cfg.epoch as u64 * per_epoch;
        if let Some(ds) = &train {
            println!("Device count: {}, device id: {}", trainers, device_id);
            println!("Num train examples: {}", ds.len());
            println!("Max train steps: {}", max_steps);
        }

        let o = &cfg.optim;
        let (boundaries, values) = epoch_decay_plan(
            o.learning_rate,
            o.learning_rate_scale,
            &[o.learning_rate_decay_epoch1, o.learning_rate_decay_epoch2],
            per_epoch,
        );
        let schedule = LrSchedule::build(
            o.lr_scheduler, o.learning_rate, o.warmup_step, max_steps, boundaries, values,
        )?;

        // ── Step 7: Engine ────────────────────────────────────────────────────
        let checkpoints = CheckpointManager::new(&cfg.checkpoints)?;
        if role.is_leader() {
            checkpoints.save_model_config(&model_cfg)?;
        }

        let model = model_cfg.init::<B>(&device);
        tracing::info!("Model ready: {} layers, d_model={}", model_cfg.num_layers, model_cfg.d_model);

        // ── Step 8: Initial parameters ────────────────────────────────────────
        if cfg.do_train && !cfg.run_random && cfg.has_conflicting_init() {
            tracing::warn!(
                "Both init_checkpoint and init_pretraining_params are set; \
                 only init_checkpoint is used"
            );
        }
        let mut engine = BurnTrainer::new(
            model,
            build_optimizer::<B>(&cfg.optim),
            schedule,
            device.clone(),
            checkpoints,
            evaluator,
        )
        .restore(&cfg.init_source())?;

        // ── Step 9: Loop ──────────────────────────────────────────────────────
        let settings = LoopSettings {
            cadences:         cfg.cadences,
            save_checkpoints: cfg.save_checkpoints,
            verbose:          cfg.verbose,
        };
        let plan = EvalPlan { dev: cfg.do_val, test: cfg.do_test };
        let mut controller = TrainingLoop::new(settings, role, plan);
        if let (Some(csv), true) = (&cfg.metrics_csv, role.is_leader()) {
            let logger = MetricsLogger::new(csv)?;
            tracing::info!("Appending evaluation results to '{}'", logger.csv_path().display());
            controller = controller.with_eval_log(logger);
        }

        if let Some(ds) = train {
            let seed = cfg.shuffle_seed();
            let mut feed = EpochFeed::new(
                Arc::new(ds),
                RetrievalBatcher::<B>::new(device),
                cfg.batch_size,
                cfg.epoch,
                role,
                seed,
            )?;
            controller.run(&mut feed, &mut engine)?;
            tracing::info!("Training finished after {} steps", controller.step());
        }

        controller.final_evaluation(&mut engine)
    }
}

fn load_split(
    paths:   &SplitPaths,
    name:    &str,
    dim:     usize,
    cleaner: &Preprocessor,
    encoder: &CaptionEncoder,
) -> Result<RetrievalDataset> {
    let require = |p: &Option<std::path::PathBuf>, what: &str| -> Result<std::path::PathBuf> {
        p.clone().with_context(|| format!("No {what} configured for the {name} split"))
    };
    let captions = require(&paths.image_caption, "caption file")?;
    let features = ImageFeatureStore::new(require(&paths.image_feature_dir, "image feature dir")?, dim);

    let corpus = RetrievalCorpus::load(Path::new(&captions), &features, cleaner)?;
    ensure!(corpus.num_examples() > 0, "The {name} split has no usable captions");
    tracing::info!(
        "{} split: {} examples, {} captions, {} images",
        name,
        corpus.num_examples(),
        corpus.captions_num(),
        corpus.image_num()
    );
    RetrievalDataset::from_corpus(&corpus, encoder)
}

fn print_arguments(cfg: &RunConfig) -> Result<()> {
    println!("-----------  Configuration Arguments -----------");
    println!("{}", serde_json::to_string_pretty(cfg)?);
    println!("------------------------------------------------");
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::application::config::{sample_config, ConfigError, SplitPaths};
    use crate::data::reader;
    use crate::infra::tokenizer_store::tests::write_tiny_bpe;

    /// A complete CPU run over a tiny on-disk corpus.
    fn tiny_run(dir: &Path) -> RunConfig {
        let (captions, feats) = reader::tests::write_split(dir);
        let split = SplitPaths {
            image_feature_dir: Some(feats),
            image_caption:     Some(captions),
        };

        let model_config = dir.join("model_config.json");
        RetrievalModelConfig::new(8, 8, 8, 2, 1, 16, 2)
            .with_embed_dim(4)
            .save(&model_config)
            .unwrap();

        let mut cfg = sample_config();
        cfg.train = split.clone();
        cfg.dev   = split.clone();
        cfg.test  = split;
        cfg.do_test      = true;
        cfg.model_config = model_config;
        cfg.tokenizer    = write_tiny_bpe(dir);
        cfg.checkpoints  = dir.join("ckpt");
        cfg.batch_size   = 1;
        cfg.epoch        = 2;
        cfg.max_seq_len  = 4;
        cfg.cadences.skip_steps       = 1;
        cfg.cadences.save_steps       = 4;
        cfg.cadences.validation_steps = 3;
        cfg.metrics_csv = Some(dir.join("eval.csv"));
        cfg
    }

    #[test]
    fn test_no_mode_fails_before_reading_data() {
        let mut cfg = sample_config();
        cfg.do_train = false;
        cfg.do_val   = false;
        cfg.do_test  = false;

        let err = FinetuneUseCase::new(cfg).execute().unwrap_err();
        assert_eq!(err.downcast_ref::<ConfigError>(), Some(&ConfigError::NoModeRequested));
    }

    #[test]
    fn test_end_to_end_cpu_run() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = tiny_run(dir.path());

        let report = FinetuneUseCase::new(cfg).execute().unwrap();

        // 3 examples × 2 epochs at batch 1 → 6 steps; checkpoints at 4 and 6
        let ckpt = dir.path().join("ckpt");
        assert!(ckpt.join("step_4").join("model.mpk").exists());
        assert!(ckpt.join("step_6").join("model.mpk").exists());
        assert!(ckpt.join("model_config.json").exists());
        assert!(ckpt.join("tokenizer.json").exists());

        // Dev evaluated at steps 3 and 6, then once more at the end
        let best = report.best_dev.unwrap();
        assert_eq!(best.metric, "avg_recall");
        assert!(report.test.is_some());

        let csv = fs::read_to_string(dir.path().join("eval.csv")).unwrap();
        assert_eq!(csv.lines().filter(|l| l.starts_with("dev,")).count(), 3);
        assert_eq!(csv.lines().filter(|l| l.starts_with("test,")).count(), 3);
    }

    #[test]
    fn test_eval_only_run_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = tiny_run(dir.path());
        FinetuneUseCase::new(cfg.clone()).execute().unwrap();

        let mut eval_only = cfg;
        eval_only.do_train        = false;
        eval_only.init_checkpoint = Some(dir.path().join("ckpt").join("step_6"));
        eval_only.metrics_csv     = None;

        let report = FinetuneUseCase::new(eval_only).execute().unwrap();
        assert_eq!(report.best_dev.unwrap().step, 0);
    }
}
