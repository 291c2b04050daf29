// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the `finetune` and `show-config` subcommands and all
// their flags.
//
// clap's derive macros generate help text, error messages for
// bad values, and type conversion (string → usize, f64, paths).
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{ArgAction, Args, Subcommand, ValueEnum};

use crate::application::config::{
    Cadences, DistributedSettings, OptimSettings, RunConfig, SplitPaths, TokenizerPaths,
};
use crate::ml::schedule::SchedulerKind;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Finetune and/or evaluate the retrieval model
    Finetune(Box<FinetuneArgs>),

    /// Print a model config file
    ShowConfig(ShowConfigArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[value(rename_all = "snake_case")]
pub enum LrSchedulerArg {
    LinearWarmupDecay,
    NoamDecay,
    ManualWarmupDecay,
}

impl From<LrSchedulerArg> for SchedulerKind {
    fn from(a: LrSchedulerArg) -> Self {
        match a {
            LrSchedulerArg::LinearWarmupDecay => SchedulerKind::LinearWarmupDecay,
            LrSchedulerArg::NoamDecay         => SchedulerKind::NoamDecay,
            LrSchedulerArg::ManualWarmupDecay => SchedulerKind::ManualWarmupDecay,
        }
    }
}

/// All arguments for the `finetune` command.
#[derive(Args, Debug)]
pub struct FinetuneArgs {
    // ── Modes ─────────────────────────────────────────────────────────────────
    /// Run the training loop
    #[arg(long)]
    pub do_train: bool,

    /// Evaluate on the dev split (periodically and at the end)
    #[arg(long)]
    pub do_val: bool,

    /// Evaluate on the test split (periodically and at the end)
    #[arg(long)]
    pub do_test: bool,

    // ── Data ──────────────────────────────────────────────────────────────────
    /// Directory of `<image_id>.json` feature files for training
    #[arg(long)]
    pub train_image_feature_dir: Option<PathBuf>,

    /// Tab-separated `image_id<TAB>caption` file for training
    #[arg(long)]
    pub train_image_caption: Option<PathBuf>,

    #[arg(long)]
    pub dev_image_feature_dir: Option<PathBuf>,

    #[arg(long)]
    pub dev_image_caption: Option<PathBuf>,

    #[arg(long)]
    pub test_image_feature_dir: Option<PathBuf>,

    #[arg(long)]
    pub test_image_caption: Option<PathBuf>,

    // ── Model and tokenizer ───────────────────────────────────────────────────
    /// JSON model config (vocab size, layers, feature dim, ...)
    #[arg(long)]
    pub model_config: PathBuf,

    /// Ready-made HuggingFace tokenizer.json
    #[arg(long)]
    pub tokenizer_file: Option<PathBuf>,

    /// GPT-2 style BPE vocabulary (token → id)
    #[arg(long)]
    pub encoder_json_file: Option<PathBuf>,

    /// GPT-2 style BPE merge list
    #[arg(long)]
    pub vocab_bpe_file: Option<PathBuf>,

    /// Lowercase captions before tokenisation
    #[arg(long)]
    pub do_lower_case: bool,

    // ── Checkpoints ───────────────────────────────────────────────────────────
    /// Directory for step checkpoints, model config and tokenizer cache
    #[arg(long, default_value = "checkpoints")]
    pub checkpoints: PathBuf,

    /// Write checkpoints (use `--save-checkpoints false` to disable)
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub save_checkpoints: bool,

    /// Resume model and optimiser state from a `step_N` directory
    #[arg(long)]
    pub init_checkpoint: Option<PathBuf>,

    /// Start from these model parameters only
    #[arg(long)]
    pub init_pretraining_params: Option<PathBuf>,

    /// Ignore both init paths and start from random parameters
    #[arg(long)]
    pub run_random: bool,

    // ── Training ──────────────────────────────────────────────────────────────
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    /// Number of full passes through the training data
    #[arg(long, default_value_t = 3)]
    pub epoch: usize,

    /// Maximum caption length in tokens
    #[arg(long, default_value_t = 128)]
    pub max_seq_len: usize,

    #[arg(long)]
    pub random_seed: Option<u64>,

    // ── Optimiser ─────────────────────────────────────────────────────────────
    #[arg(long, default_value_t = 5e-5)]
    pub learning_rate: f64,

    #[arg(long, value_enum, default_value_t = LrSchedulerArg::LinearWarmupDecay)]
    pub lr_scheduler: LrSchedulerArg,

    #[arg(long, default_value_t = 0)]
    pub warmup_step: u64,

    /// Multiplier applied at each decay epoch (manual_warmup_decay)
    #[arg(long, default_value_t = 0.1)]
    pub learning_rate_scale: f64,

    #[arg(long, default_value_t = 24)]
    pub learning_rate_decay_epoch1: u64,

    #[arg(long, default_value_t = 32)]
    pub learning_rate_decay_epoch2: u64,

    #[arg(long, default_value_t = 0.01)]
    pub weight_decay: f64,

    #[arg(long, default_value_t = 0.9)]
    pub beta1: f64,

    #[arg(long, default_value_t = 0.98)]
    pub beta2: f64,

    #[arg(long, default_value_t = 1e-6)]
    pub epsilon: f64,

    // ── Cadences ──────────────────────────────────────────────────────────────
    /// Print a progress line every N steps
    #[arg(long, default_value_t = 10)]
    pub skip_steps: u64,

    /// Save a checkpoint every N steps
    #[arg(long, default_value_t = 10000)]
    pub save_steps: u64,

    /// Evaluate every N steps
    #[arg(long, default_value_t = 1000)]
    pub validation_steps: u64,

    /// Metric tracked for the best dev result
    #[arg(long, default_value = "avg_recall")]
    pub key_eval: String,

    // ── Distributed ───────────────────────────────────────────────────────────
    /// Read worker topology from the environment
    #[arg(long)]
    pub is_distributed: bool,

    #[arg(long, default_value_t = 1)]
    pub nccl_comm_num: usize,

    #[arg(long)]
    pub use_hierarchical_allreduce: bool,

    #[arg(long, default_value_t = 8)]
    pub hierarchical_allreduce_inter_nranks: usize,

    // ── Runtime ───────────────────────────────────────────────────────────────
    /// Train on the GPU (wgpu) instead of the CPU (ndarray)
    #[arg(long)]
    pub use_gpu: bool,

    /// Accepted for compatibility; training always runs in f32
    #[arg(long)]
    pub use_fp16: bool,

    /// Print the learning rate at full precision on log steps
    #[arg(long)]
    pub verbose: bool,

    /// Append evaluation results to this CSV file
    #[arg(long)]
    pub metrics_csv: Option<PathBuf>,
}

/// Convert CLI FinetuneArgs into the application-layer RunConfig.
/// The application layer never sees clap types.
impl From<FinetuneArgs> for RunConfig {
    fn from(a: FinetuneArgs) -> Self {
        RunConfig {
            do_train: a.do_train,
            do_val:   a.do_val,
            do_test:  a.do_test,
            train: SplitPaths {
                image_feature_dir: a.train_image_feature_dir,
                image_caption:     a.train_image_caption,
            },
            dev: SplitPaths {
                image_feature_dir: a.dev_image_feature_dir,
                image_caption:     a.dev_image_caption,
            },
            test: SplitPaths {
                image_feature_dir: a.test_image_feature_dir,
                image_caption:     a.test_image_caption,
            },
            model_config: a.model_config,
            tokenizer: TokenizerPaths {
                tokenizer_file:    a.tokenizer_file,
                encoder_json_file: a.encoder_json_file,
                vocab_bpe_file:    a.vocab_bpe_file,
                do_lower_case:     a.do_lower_case,
            },
            checkpoints:             a.checkpoints,
            save_checkpoints:        a.save_checkpoints,
            init_checkpoint:         a.init_checkpoint,
            init_pretraining_params: a.init_pretraining_params,
            run_random:              a.run_random,
            batch_size:  a.batch_size,
            epoch:       a.epoch,
            max_seq_len: a.max_seq_len,
            random_seed: a.random_seed,
            optim: OptimSettings {
                learning_rate:              a.learning_rate,
                lr_scheduler:               a.lr_scheduler.into(),
                warmup_step:                a.warmup_step,
                learning_rate_scale:        a.learning_rate_scale,
                learning_rate_decay_epoch1: a.learning_rate_decay_epoch1,
                learning_rate_decay_epoch2: a.learning_rate_decay_epoch2,
                weight_decay:               a.weight_decay,
                beta1:                      a.beta1,
                beta2:                      a.beta2,
                epsilon:                    a.epsilon,
            },
            cadences: Cadences {
                skip_steps:       a.skip_steps,
                save_steps:       a.save_steps,
                validation_steps: a.validation_steps,
            },
            key_eval: a.key_eval,
            distributed: DistributedSettings {
                is_distributed:                      a.is_distributed,
                nccl_comm_num:                       a.nccl_comm_num,
                use_hierarchical_allreduce:          a.use_hierarchical_allreduce,
                hierarchical_allreduce_inter_nranks: a.hierarchical_allreduce_inter_nranks,
            },
            use_gpu:     a.use_gpu,
            use_fp16:    a.use_fp16,
            verbose:     a.verbose,
            metrics_csv: a.metrics_csv,
        }
    }
}

/// Arguments for the `show-config` command
#[derive(Args, Debug)]
pub struct ShowConfigArgs {
    /// Model config JSON to print
    #[arg(long)]
    pub model_config: PathBuf,
}
