// ============================================================
// Layer 2 — Training Loop Controller
// ============================================================
// Sequences optimisation steps and interleaves the three
// periodic side effects, always in this order per step:
//
//   1. log check         step % skip_steps == 0        → fetch loss/lr, print progress
//   2. checkpoint check  step % save_steps == 0        → leader persists step_{N}
//   3. eval check        step % validation_steps == 0  → dev then test evaluation
//
// State machine:
//
//   NotStarted ──run()──▶ Running ──Feed::Exhausted──▶ Draining ──▶ Done
//                                                   (final checkpoint + reset)
//
// After the loop, `final_evaluation()` runs one more pass over
// every requested split and reports the best dev result.
//
// The controller is written only against the Layer 3 traits, so
// it never touches Burn directly.

use std::time::Instant;

use anyhow::Result;

use crate::application::config::Cadences;
use crate::domain::feed::{EpochProgress, Feed};
use crate::domain::metrics::{EvalOutcome, MetricHistory, MetricRecord, Split};
use crate::domain::role::WorkerRole;
use crate::domain::traits::{
    BatchSource, CheckpointSink, Evaluator, Fetch, StepExecutor, StepOutputs,
};
use crate::infra::metrics::{EvalRow, MetricsLogger};

/// Which held-out splits get evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvalPlan {
    pub dev:  bool,
    pub test: bool,
}

impl EvalPlan {
    /// Requested splits, dev first.
    pub fn splits(&self) -> Vec<Split> {
        let mut splits = Vec::with_capacity(2);
        if self.dev  { splits.push(Split::Dev); }
        if self.test { splits.push(Split::Test); }
        splits
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    NotStarted,
    Running,
    Draining,
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub cadences:         Cadences,
    pub save_checkpoints: bool,
    /// Also print the learning rate at full precision on log steps
    pub verbose:          bool,
}

/// What the final evaluation pass produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalReport {
    /// Best dev record across the whole run (leader only)
    pub best_dev: Option<MetricRecord>,
    pub dev:      Option<EvalOutcome>,
    pub test:     Option<EvalOutcome>,
}

pub struct TrainingLoop {
    settings:     LoopSettings,
    role:         WorkerRole,
    plan:         EvalPlan,
    step:         u64,
    state:        LoopState,
    last_saved:   Option<u64>,
    dev_history:  MetricHistory,
    test_history: MetricHistory,
    eval_log:     Option<MetricsLogger>,
}

impl TrainingLoop {
    pub fn new(settings: LoopSettings, role: WorkerRole, plan: EvalPlan) -> Self {
        Self {
            settings,
            role,
            plan,
            step:         0,
            state:        LoopState::NotStarted,
            last_saved:   None,
            dev_history:  MetricHistory::new(),
            test_history: MetricHistory::new(),
            eval_log:     None,
        }
    }

    /// Append every leader-side evaluation event to a CSV file.
    pub fn with_eval_log(mut self, logger: MetricsLogger) -> Self {
        self.eval_log = Some(logger);
        self
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    #[cfg(test)]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[cfg(test)]
    pub fn history(&self, split: Split) -> &MetricHistory {
        match split {
            Split::Dev  => &self.dev_history,
            Split::Test => &self.test_history,
        }
    }

    /// Drive steps until the source reports exhaustion.
    ///
    /// Any error from the source or the engine ends the run immediately;
    /// only `Feed::Exhausted` is treated as normal termination.
    pub fn run<S, E>(&mut self, source: &mut S, engine: &mut E) -> Result<()>
    where
        S: BatchSource,
        E: StepExecutor<S::Batch> + CheckpointSink + Evaluator,
    {
        anyhow::ensure!(
            self.state == LoopState::NotStarted,
            "training loop cannot be restarted (state: {:?})",
            self.state
        );
        self.state = LoopState::Running;

        let cadences       = self.settings.cadences;
        let mut time_begin = Instant::now();

        loop {
            let batch = match source.next_batch()? {
                Feed::Batch(batch) => batch,
                Feed::Exhausted    => break,
            };
            self.step += 1;
            let step = self.step;

            // ── 1. Log check ─────────────────────────────────────────────────
            if step % cadences.skip_steps == 0 {
                let outputs = engine.run_step(batch, Fetch::LossAndLr)?;
                let used    = time_begin.elapsed().as_secs_f64();
                if let Some(outputs) = outputs {
                    self.print_progress(source.progress(), outputs, used);
                }
                time_begin = Instant::now();
            } else {
                engine.run_step(batch, Fetch::Nothing)?;
            }

            // ── 2. Checkpoint check ──────────────────────────────────────────
            if self.role.is_leader()
                && self.settings.save_checkpoints
                && step % cadences.save_steps == 0
            {
                engine.save_checkpoint(step)?;
                self.last_saved = Some(step);
            }

            // ── 3. Eval check ────────────────────────────────────────────────
            if step % cadences.validation_steps == 0 {
                for split in self.plan.splits() {
                    let outcome = engine.evaluate(split)?;
                    self.record(split, &outcome)?;
                }
            }
        }

        // ── Draining: final checkpoint + reset ───────────────────────────────
        // The last step may already be on disk from the cadence check
        self.state = LoopState::Draining;
        if self.role.is_leader()
            && self.settings.save_checkpoints
            && self.last_saved != Some(self.step)
        {
            engine.save_checkpoint(self.step)?;
            self.last_saved = Some(self.step);
        }
        source.reset();
        self.state = LoopState::Done;

        tracing::info!("Training stream exhausted after {} steps", self.step);
        Ok(())
    }

    /// One final pass over each requested split.
    ///
    /// The dev result joins the history and the best dev record is
    /// reported. The test result is printed only; it is not added to the
    /// test history and no best test result is reported.
    pub fn final_evaluation<E: Evaluator>(&mut self, engine: &mut E) -> Result<FinalReport> {
        let mut report = FinalReport::default();

        if self.plan.dev {
            if self.role.is_leader() {
                println!("Final validation result:");
            }
            let outcome = engine.evaluate(Split::Dev)?;
            self.record(Split::Dev, &outcome)?;

            if self.role.is_leader() {
                if let Some(best) = self.dev_history.best() {
                    println!(
                        "Best validation result: step {} {} {:.6}",
                        best.step, best.metric, best.value
                    );
                    report.best_dev = Some(best.clone());
                }
            }
            report.dev = Some(outcome);
        }

        if self.plan.test {
            if self.role.is_leader() {
                println!("Final test result:");
            }
            let outcome = engine.evaluate(Split::Test)?;
            if self.role.is_leader() {
                println!("[test] step {}: {}", self.step, outcome.summary());
                self.log_row(Split::Test, &outcome)?;
            }
            report.test = Some(outcome);
        }

        Ok(report)
    }

    /// Leader-only: print, append to the split's history, and log.
    fn record(&mut self, split: Split, outcome: &EvalOutcome) -> Result<()> {
        if !self.role.is_leader() {
            return Ok(());
        }
        println!("[{split}] step {}: {}", self.step, outcome.summary());

        let record = MetricRecord::from_outcome(self.step, outcome);
        match split {
            Split::Dev  => self.dev_history.push(record),
            Split::Test => self.test_history.push(record),
        }
        self.log_row(split, outcome)
    }

    fn log_row(&self, split: Split, outcome: &EvalOutcome) -> Result<()> {
        if let Some(logger) = &self.eval_log {
            logger.log(&EvalRow::new(split, self.step, outcome))?;
        }
        Ok(())
    }

    fn print_progress(&self, progress: EpochProgress, outputs: StepOutputs, used_secs: f64) {
        if self.settings.verbose {
            println!("learning_rate: {:.10}", outputs.learning_rate);
        }
        let speed = self.settings.cadences.skip_steps as f64 / used_secs.max(f64::EPSILON);
        println!(
            "epoch: {}, progress: {}/{}, step: {}, ave loss: {:.6}, lr: {:.3e}, speed: {:.4} steps/s",
            progress.epoch,
            progress.example,
            progress.total_examples,
            self.step,
            outputs.loss,
            outputs.learning_rate,
            speed,
        );
    }
}
