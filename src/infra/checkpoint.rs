// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores parameters using Burn's CompactRecorder.
//
// What gets saved per checkpoint:
//   1. Model weights (.mpk)    — every trainable parameter
//   2. Optimiser state (.mpk)  — AdamW moments, for resuming
//   3. latest_step.json        — step of the newest checkpoint
//
// plus, once per run, model_config.json so the architecture can be
// rebuilt before the weights are loaded into it.
//
// Loading accepts either a `step_N` directory or the checkpoint
// root itself; a root resolves through latest_step.json.
//
// File naming convention:
//   checkpoints/
//     step_100/model.mpk
//     step_100/optimizer.mpk
//     step_200/...
//     latest_step.json
//     model_config.json
//
// CompactRecorder serialises to named MessagePack at half
// precision. Loading fails if the architecture doesn't match.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    optim::Optimizer,
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};

use crate::ml::model::{RetrievalModel, RetrievalModelConfig};

const MODEL_FILE:     &str = "model";
const OPTIMIZER_FILE: &str = "optimizer";
const LATEST_STEP_FILE: &str = "latest_step.json";

/// Manages saving and loading of checkpoints under one root directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create the manager, creating the root directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint dir '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// `{dir}/step_{step}`
    pub fn step_dir(&self, step: u64) -> PathBuf {
        self.dir.join(format!("step_{step}"))
    }

    /// Persist model and optimiser state under `step_{step}`.
    pub fn save<B, O>(&self, step: u64, model: &RetrievalModel<B>, optim: &O) -> Result<PathBuf>
    where
        B: AutodiffBackend,
        O: Optimizer<RetrievalModel<B>, B>,
    {
        let step_dir = self.step_dir(step);
        fs::create_dir_all(&step_dir)
            .with_context(|| format!("Cannot create '{}'", step_dir.display()))?;

        // The recorder appends the .mpk extension
        let recorder = CompactRecorder::new();
        Recorder::<B>::record(&recorder, model.clone().into_record(), step_dir.join(MODEL_FILE))
            .with_context(|| format!("Failed to save model to '{}'", step_dir.display()))?;
        Recorder::<B>::record(&recorder, optim.to_record(), step_dir.join(OPTIMIZER_FILE))
            .with_context(|| format!("Failed to save optimizer to '{}'", step_dir.display()))?;

        let latest_path = self.dir.join(LATEST_STEP_FILE);
        fs::write(&latest_path, serde_json::to_string(&step)?)
            .with_context(|| "Failed to write latest_step.json")?;

        tracing::debug!("Saved checkpoint: step {}", step);
        Ok(step_dir)
    }

    /// Write the architecture next to the checkpoints.
    pub fn save_model_config(&self, cfg: &RetrievalModelConfig) -> Result<()> {
        let path = self.dir.join("model_config.json");
        cfg.save(&path)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved model config to '{}'", path.display());
        Ok(())
    }
}

/// Step of the newest checkpoint written under `root`.
pub fn latest_step(root: &Path) -> Result<u64> {
    let path = root.join(LATEST_STEP_FILE);
    let s = fs::read_to_string(&path)
        .with_context(|| format!("Cannot find '{}'", path.display()))?;
    serde_json::from_str::<u64>(&s)
        .with_context(|| format!("Malformed step marker '{}'", path.display()))
}

/// Map a checkpoint root to its newest `step_N` directory; any other
/// path is taken to be a step directory already.
pub fn resolve_step_dir(from: &Path) -> Result<PathBuf> {
    if !from.join(LATEST_STEP_FILE).is_file() {
        return Ok(from.to_path_buf());
    }
    let step = latest_step(from)?;
    let dir  = from.join(format!("step_{step}"));
    tracing::info!("Resolved '{}' to its latest checkpoint, step {}", from.display(), step);
    Ok(dir)
}

/// Restore model weights from a checkpoint directory.
pub fn load_model<B: Backend>(
    from:   &Path,
    model:  RetrievalModel<B>,
    device: &B::Device,
) -> Result<RetrievalModel<B>> {
    let path = resolve_step_dir(from)?.join(MODEL_FILE);
    let record = CompactRecorder::new()
        .load(path.clone(), device)
        .with_context(|| format!("Cannot load parameters from '{}'", path.display()))?;
    Ok(model.load_record(record))
}

/// Restore optimiser state from a checkpoint directory.
pub fn load_optimizer<B, O>(from: &Path, optim: O, device: &B::Device) -> Result<O>
where
    B: AutodiffBackend,
    O: Optimizer<RetrievalModel<B>, B>,
{
    let path = resolve_step_dir(from)?.join(OPTIMIZER_FILE);
    let record: O::Record = Recorder::<B>::load(&CompactRecorder::new(), path.clone(), device)
        .with_context(|| format!("Cannot load optimizer state from '{}'", path.display()))?;
    Ok(optim.load_record(record))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::AdamWConfig;

    use crate::ml::model::tests::tiny_config;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_save_writes_step_directory() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let mgr    = CheckpointManager::new(dir.path().join("ckpt")).unwrap();

        let model: RetrievalModel<TestBackend> = tiny_config().init(&device);
        let optim = AdamWConfig::new().init::<TestBackend, RetrievalModel<TestBackend>>();

        let step_dir = mgr.save(7, &model, &optim).unwrap();
        assert_eq!(step_dir, mgr.step_dir(7));
        assert!(step_dir.join("model.mpk").exists());
        assert!(step_dir.join("optimizer.mpk").exists());
        assert_eq!(latest_step(&dir.path().join("ckpt")).unwrap(), 7);
    }

    #[test]
    fn test_checkpoint_root_resolves_to_newest_step() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let mgr    = CheckpointManager::new(dir.path()).unwrap();

        let model: RetrievalModel<TestBackend> = tiny_config().init(&device);
        let optim = AdamWConfig::new().init::<TestBackend, RetrievalModel<TestBackend>>();
        mgr.save(2, &model, &optim).unwrap();
        mgr.save(5, &model, &optim).unwrap();

        assert_eq!(resolve_step_dir(dir.path()).unwrap(), mgr.step_dir(5));
        assert_eq!(resolve_step_dir(&mgr.step_dir(2)).unwrap(), mgr.step_dir(2));

        let fresh: RetrievalModel<NdArray> = tiny_config().init(&device);
        assert!(load_model(dir.path(), fresh, &device).is_ok());
        assert!(load_optimizer(dir.path(), optim, &device).is_ok());
    }

    #[test]
    fn test_saved_model_loads_into_fresh_model() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let mgr    = CheckpointManager::new(dir.path()).unwrap();

        let model: RetrievalModel<TestBackend> = tiny_config().init(&device);
        let optim = AdamWConfig::new().init::<TestBackend, RetrievalModel<TestBackend>>();
        let step_dir = mgr.save(1, &model, &optim).unwrap();

        let fresh: RetrievalModel<NdArray> = tiny_config().init(&device);
        let loaded = load_model(&step_dir, fresh, &device).unwrap();
        assert_eq!(loaded.max_seq_len, 4);

        let restored = load_optimizer(&step_dir, optim, &device);
        assert!(restored.is_ok());
    }

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let fresh: RetrievalModel<NdArray> = tiny_config().init(&device);
        assert!(load_model(&dir.path().join("step_9"), fresh, &device).is_err());
    }

    #[test]
    fn test_model_config_saved_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        mgr.save_model_config(&tiny_config()).unwrap();

        let loaded = RetrievalModelConfig::load(dir.path().join("model_config.json")).unwrap();
        assert_eq!(loaded.image_feature_dim, 3);
    }
}
