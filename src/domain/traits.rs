// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The training loop controller only talks to its collaborators
// through these traits:
//
//   BatchSource     → yields Feed::Batch / Feed::Exhausted
//   StepExecutor    → runs one optimisation step on a batch
//   CheckpointSink  → persists a parameter snapshot named by step
//   Evaluator       → one full pass over a held-out split
//
// Implementations:
//   - EpochFeed (Layer 4)   → BatchSource over a shuffled dataset
//   - BurnTrainer (Layer 5) → StepExecutor + CheckpointSink + Evaluator
//   - in-memory mocks       → controller unit tests
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;

use crate::domain::feed::{EpochProgress, Feed};
use crate::domain::metrics::{EvalOutcome, Split};

// ─── BatchSource ──────────────────────────────────────────────────────────────
/// A started stream of training batches.
pub trait BatchSource {
    type Batch;

    /// Pull the next batch, or `Feed::Exhausted` once every epoch is consumed.
    fn next_batch(&mut self) -> Result<Feed<Self::Batch>>;

    /// Rewind to the start of the stream. Called once, after exhaustion.
    fn reset(&mut self);

    /// Current (epoch, position within epoch) for progress lines.
    fn progress(&self) -> EpochProgress;
}

// ─── StepExecutor ─────────────────────────────────────────────────────────────
/// Whether a step should materialise its outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// Run the step only
    Nothing,
    /// Also read back the loss and the learning rate used
    LossAndLr,
}

/// Values read back from a step executed with `Fetch::LossAndLr`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutputs {
    pub loss:          f64,
    pub learning_rate: f64,
}

pub trait StepExecutor<B> {
    /// Execute one optimisation step. Returns outputs only when fetched.
    fn run_step(&mut self, batch: B, fetch: Fetch) -> Result<Option<StepOutputs>>;
}

// ─── CheckpointSink ───────────────────────────────────────────────────────────
pub trait CheckpointSink {
    /// Persist every trainable parameter under a name derived from `step`.
    fn save_checkpoint(&mut self, step: u64) -> Result<()>;
}

// ─── Evaluator ────────────────────────────────────────────────────────────────
pub trait Evaluator {
    /// Exhaust one full pass over `split` and reduce it to metrics.
    fn evaluate(&mut self, split: Split) -> Result<EvalOutcome>;
}
