// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `finetune`    — train and/or evaluate the retrieval model
//   2. `show-config` — print a model config file
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::{anyhow, Result};
use burn::config::Config;
use clap::Parser;
use commands::{Commands, FinetuneArgs, ShowConfigArgs};

use crate::ml::model::RetrievalModelConfig;

#[derive(Parser, Debug)]
#[command(
    name = "retrieval-finetune",
    version = "0.1.0",
    about = "Finetune an image-text retrieval model and report recall@K."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route the subcommand to its use case. This layer only routes, never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Finetune(args)   => run_finetune(*args),
            Commands::ShowConfig(args) => show_config(args),
        }
    }
}

fn run_finetune(args: FinetuneArgs) -> Result<()> {
    use crate::application::finetune_use_case::FinetuneUseCase;

    // CLI args → application config
    let report = FinetuneUseCase::new(args.into()).execute()?;

    if let Some(best) = report.best_dev {
        tracing::info!("Best dev {} = {:.6} at step {}", best.metric, best.value, best.step);
    }
    Ok(())
}

fn show_config(args: ShowConfigArgs) -> Result<()> {
    let cfg = RetrievalModelConfig::load(&args.model_config)
        .map_err(|e| anyhow!("Cannot load '{}': {e:?}", args.model_config.display()))?;
    cfg.check()?;
    println!("{cfg}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::RunConfig;
    use crate::ml::schedule::SchedulerKind;

    fn parse(extra: &[&str]) -> Cli {
        let mut argv = vec!["retrieval-finetune", "finetune", "--model-config", "m.json"];
        argv.extend_from_slice(extra);
        Cli::try_parse_from(argv).unwrap()
    }

    fn run_config(cli: Cli) -> RunConfig {
        match cli.command {
            Commands::Finetune(args) => (*args).into(),
            Commands::ShowConfig(_)  => panic!("expected finetune"),
        }
    }

    #[test]
    fn test_defaults_map_into_run_config() {
        let cfg = run_config(parse(&["--do-train"]));
        assert!(cfg.do_train && !cfg.do_val && !cfg.do_test);
        assert!(cfg.save_checkpoints);
        assert_eq!(cfg.key_eval, "avg_recall");
        assert_eq!(cfg.optim.lr_scheduler, SchedulerKind::LinearWarmupDecay);
        assert_eq!(cfg.cadences.skip_steps, 10);
    }

    #[test]
    fn test_flags_reach_nested_settings() {
        let cfg = run_config(parse(&[
            "--do-val",
            "--dev-image-caption", "dev.tsv",
            "--lr-scheduler", "noam_decay",
            "--save-checkpoints", "false",
            "--validation-steps", "50",
            "--use-hierarchical-allreduce",
        ]));
        assert_eq!(cfg.dev.image_caption.as_deref(), Some(std::path::Path::new("dev.tsv")));
        assert_eq!(cfg.optim.lr_scheduler, SchedulerKind::NoamDecay);
        assert!(!cfg.save_checkpoints);
        assert_eq!(cfg.cadences.validation_steps, 50);
        assert!(cfg.distributed.use_hierarchical_allreduce);
    }

    #[test]
    fn test_unknown_scheduler_is_rejected() {
        let argv = ["retrieval-finetune", "finetune", "--model-config", "m.json", "--lr-scheduler", "cosine"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}
