// ============================================================
// Layer 2 — Run Configuration
// ============================================================
// Every option of a finetuning run, gathered into one immutable
// value that is built once from the CLI (Layer 1) and passed by
// reference to whatever needs it.
//
// `validate()` runs before any data is read, so a run that can
// never succeed (no mode selected, no checkpoint to evaluate,
// zero cadences) fails with a clear message up front.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ml::ranking::RECALL_METRICS;
use crate::ml::schedule::SchedulerKind;

/// Shuffle seed every worker falls back to when `random_seed` is unset
/// in a distributed run. Workers shard one shared permutation, so they
/// must all draw the same one.
pub const SHARED_SHUFFLE_SEED: u64 = 2021;

// ─── Errors ───────────────────────────────────────────────────────────────────
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("For options `do_train`, `do_val`, `do_test`, at least one of them must be set")]
    NoModeRequested,

    #[error("`init_checkpoint` (or `init_pretraining_params`) must be set when only validating or testing")]
    MissingInitCheckpoint,

    #[error("Missing {what} for the {split} split")]
    MissingSplitPath { split: &'static str, what: &'static str },

    #[error("Tokenizer needs either `tokenizer_file` or both `encoder_json_file` and `vocab_bpe_file`")]
    MissingTokenizer,

    #[error("`{0}` must be a positive integer")]
    NotPositive(&'static str),

    #[error("Unknown evaluation metric '{0}' (expected one of: {1})")]
    UnknownKeyEval(String, String),

    #[error("Invalid learning rate: {0} (must be > 0.0)")]
    InvalidLearningRate(f64),
}

// ─── Sub-configurations ───────────────────────────────────────────────────────
/// Where one split's data lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitPaths {
    /// Directory of `<image_id>.json` feature files
    pub image_feature_dir: Option<PathBuf>,
    /// Tab-separated `image_id<TAB>caption` file
    pub image_caption:     Option<PathBuf>,
}

impl SplitPaths {
    fn require(&self, split: &'static str) -> Result<(), ConfigError> {
        if self.image_feature_dir.is_none() {
            return Err(ConfigError::MissingSplitPath { split, what: "image feature dir" });
        }
        if self.image_caption.is_none() {
            return Err(ConfigError::MissingSplitPath { split, what: "caption file" });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenizerPaths {
    /// Pre-built HuggingFace `tokenizer.json`; takes precedence when set
    pub tokenizer_file:    Option<PathBuf>,
    /// GPT-2 style byte-level BPE vocabulary
    pub encoder_json_file: Option<PathBuf>,
    /// GPT-2 style merge list
    pub vocab_bpe_file:    Option<PathBuf>,
    pub do_lower_case:     bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimSettings {
    pub learning_rate:              f64,
    pub lr_scheduler:               SchedulerKind,
    pub warmup_step:                u64,
    pub learning_rate_scale:        f64,
    pub learning_rate_decay_epoch1: u64,
    pub learning_rate_decay_epoch2: u64,
    pub weight_decay:               f64,
    pub beta1:                      f64,
    pub beta2:                      f64,
    pub epsilon:                    f64,
}

/// How often the three periodic side effects fire, in steps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cadences {
    /// Progress line with loss / learning rate
    pub skip_steps:       u64,
    /// Checkpoint persistence
    pub save_steps:       u64,
    /// Dev / test evaluation
    pub validation_steps: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedSettings {
    pub is_distributed:                      bool,
    pub nccl_comm_num:                       usize,
    pub use_hierarchical_allreduce:          bool,
    pub hierarchical_allreduce_inter_nranks: usize,
}

/// Where the starting parameters come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitSource {
    /// Fresh random initialisation
    Random,
    /// Model and optimiser state from a `step_{N}` directory
    Checkpoint(PathBuf),
    /// Model parameters only
    Pretrained(PathBuf),
}

// ─── RunConfig ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub do_train: bool,
    pub do_val:   bool,
    pub do_test:  bool,

    pub train: SplitPaths,
    pub dev:   SplitPaths,
    pub test:  SplitPaths,

    pub model_config: PathBuf,
    pub tokenizer:    TokenizerPaths,

    pub checkpoints:             PathBuf,
    pub save_checkpoints:        bool,
    pub init_checkpoint:         Option<PathBuf>,
    pub init_pretraining_params: Option<PathBuf>,
    pub run_random:              bool,

    pub batch_size:  usize,
    pub epoch:       usize,
    pub max_seq_len: usize,
    pub random_seed: Option<u64>,

    pub optim:    OptimSettings,
    pub cadences: Cadences,

    /// Name of the metric tracked across evaluations
    pub key_eval: String,

    pub distributed: DistributedSettings,

    pub use_gpu:     bool,
    pub use_fp16:    bool,
    pub verbose:     bool,
    pub metrics_csv: Option<PathBuf>,
}

impl RunConfig {
    /// Check every startup invariant. Runs before any file is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.do_train || self.do_val || self.do_test) {
            return Err(ConfigError::NoModeRequested);
        }

        if !self.do_train && self.eval_init_checkpoint().is_none() {
            return Err(ConfigError::MissingInitCheckpoint);
        }

        if self.do_train { self.train.require("train")?; }
        if self.do_val   { self.dev.require("dev")?; }
        if self.do_test  { self.test.require("test")?; }

        let tok = &self.tokenizer;
        if tok.tokenizer_file.is_none()
            && (tok.encoder_json_file.is_none() || tok.vocab_bpe_file.is_none())
        {
            return Err(ConfigError::MissingTokenizer);
        }

        for (name, value) in [
            ("skip_steps",       self.cadences.skip_steps),
            ("save_steps",       self.cadences.save_steps),
            ("validation_steps", self.cadences.validation_steps),
        ] {
            if value == 0 {
                return Err(ConfigError::NotPositive(name));
            }
        }
        if self.batch_size == 0  { return Err(ConfigError::NotPositive("batch_size")); }
        if self.max_seq_len == 0 { return Err(ConfigError::NotPositive("max_seq_len")); }

        if self.optim.learning_rate <= 0.0 {
            return Err(ConfigError::InvalidLearningRate(self.optim.learning_rate));
        }

        if !RECALL_METRICS.contains(&self.key_eval.as_str()) {
            return Err(ConfigError::UnknownKeyEval(
                self.key_eval.clone(),
                RECALL_METRICS.join(", "),
            ));
        }

        Ok(())
    }

    /// Parameters to restore for an evaluation-only run: the checkpoint
    /// when given, otherwise the pretraining parameters.
    pub fn eval_init_checkpoint(&self) -> Option<&PathBuf> {
        self.init_checkpoint
            .as_ref()
            .or(self.init_pretraining_params.as_ref())
    }

    /// Resolve the initialisation flags. Training resumes from
    /// `init_checkpoint` when given, else starts from the pretraining
    /// parameters; evaluation-only runs only need the parameters.
    pub fn init_source(&self) -> InitSource {
        if !self.do_train {
            return self
                .eval_init_checkpoint()
                .map_or(InitSource::Random, |p| InitSource::Pretrained(p.clone()));
        }
        if self.run_random {
            return InitSource::Random;
        }
        match (&self.init_checkpoint, &self.init_pretraining_params) {
            (Some(ckpt), _)    => InitSource::Checkpoint(ckpt.clone()),
            (None, Some(pre))  => InitSource::Pretrained(pre.clone()),
            (None, None)       => InitSource::Random,
        }
    }

    /// Seed for the per-epoch training shuffle. A standalone run without
    /// `random_seed` draws a fresh one.
    pub fn shuffle_seed(&self) -> u64 {
        match self.random_seed {
            Some(seed)                                => seed,
            None if self.distributed.is_distributed   => SHARED_SHUFFLE_SEED,
            None                                      => rand::random(),
        }
    }

    /// Both init paths set: the checkpoint is used, the other ignored.
    pub fn has_conflicting_init(&self) -> bool {
        self.init_checkpoint.is_some() && self.init_pretraining_params.is_some()
    }
}

#[cfg(test)]
pub(crate) fn sample_config() -> RunConfig {
    let split = |name: &str| SplitPaths {
        image_feature_dir: Some(PathBuf::from(format!("data/{name}/feats"))),
        image_caption:     Some(PathBuf::from(format!("data/{name}/captions.tsv"))),
    };
    RunConfig {
        do_train: true,
        do_val:   true,
        do_test:  false,
        train: split("train"),
        dev:   split("dev"),
        test:  split("test"),
        model_config: PathBuf::from("model_config.json"),
        tokenizer: TokenizerPaths {
            tokenizer_file:    None,
            encoder_json_file: Some(PathBuf::from("encoder.json")),
            vocab_bpe_file:    Some(PathBuf::from("vocab.bpe")),
            do_lower_case:     true,
        },
        checkpoints:             PathBuf::from("checkpoints"),
        save_checkpoints:        true,
        init_checkpoint:         None,
        init_pretraining_params: None,
        run_random:              false,
        batch_size:  8,
        epoch:       2,
        max_seq_len: 32,
        random_seed: Some(1),
        optim: OptimSettings {
            learning_rate:              5e-5,
            lr_scheduler:               SchedulerKind::LinearWarmupDecay,
            warmup_step:                10,
            learning_rate_scale:        0.1,
            learning_rate_decay_epoch1: 24,
            learning_rate_decay_epoch2: 32,
            weight_decay:               0.01,
            beta1:                      0.9,
            beta2:                      0.98,
            epsilon:                    1e-6,
        },
        cadences: Cadences { skip_steps: 10, save_steps: 100, validation_steps: 50 },
        key_eval: "avg_recall".to_string(),
        distributed: DistributedSettings {
            is_distributed:                      false,
            nccl_comm_num:                       1,
            use_hierarchical_allreduce:          false,
            hierarchical_allreduce_inter_nranks: 8,
        },
        use_gpu:     false,
        use_fp16:    false,
        verbose:     false,
        metrics_csv: None,
    }
}
