// ============================================================
// Layer 4 — Epoch Feed
// ============================================================
// The training BatchSource. Cycles through `epochs` passes over
// the dataset; each epoch:
//
//   1. shuffles every sample index with a seeded StdRng
//   2. keeps only this worker's shard (every n-th index)
//   3. drops the tail that doesn't fill a whole batch
//
// so every worker takes the same number of steps per epoch.
// After the last epoch `next_batch()` returns Feed::Exhausted.
//
// Reference: Burn Book §4 (Datasets), rand crate (SliceRandom)

use std::sync::Arc;

use anyhow::{ensure, Result};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::data::{
    batcher::{RetrievalBatch, RetrievalBatcher},
    dataset::RetrievalDataset,
};
use crate::domain::{
    feed::{EpochProgress, Feed},
    role::WorkerRole,
    traits::BatchSource,
};

/// Steps one worker takes per epoch.
pub fn steps_per_epoch(examples: usize, batch_size: usize, trainers: usize) -> u64 {
    (examples / batch_size.max(1) / trainers.max(1)) as u64
}

pub struct EpochFeed<B: Backend> {
    dataset:    Arc<RetrievalDataset>,
    batcher:    RetrievalBatcher<B>,
    batch_size: usize,
    epochs:     usize,
    role:       WorkerRole,
    seed:       u64,
    rng:        StdRng,

    order:  Vec<usize>,
    cursor: usize,
    /// 0 until the first batch is pulled
    epoch:  usize,
}

impl<B: Backend> EpochFeed<B> {
    pub fn new(
        dataset:    Arc<RetrievalDataset>,
        batcher:    RetrievalBatcher<B>,
        batch_size: usize,
        epochs:     usize,
        role:       WorkerRole,
        seed:       u64,
    ) -> Result<Self> {
        ensure!(batch_size > 0, "batch size must be positive");
        Ok(Self {
            dataset,
            batcher,
            batch_size,
            epochs,
            role,
            seed,
            rng: StdRng::seed_from_u64(seed),
            order:  Vec::new(),
            cursor: 0,
            epoch:  0,
        })
    }

    fn start_epoch(&mut self) {
        let mut all: Vec<usize> = (0..self.dataset.len()).collect();
        all.shuffle(&mut self.rng);

        let n  = self.role.trainers_num().max(1);
        let id = self.role.trainer_id();
        let mut shard: Vec<usize> = all.into_iter().skip(id).step_by(n).collect();

        // All workers must agree on the step count
        let per_worker = self.dataset.len() / n;
        shard.truncate(per_worker - per_worker % self.batch_size);

        self.order  = shard;
        self.cursor = 0;
        self.epoch += 1;
        tracing::debug!("Epoch {} starts with {} samples", self.epoch, self.order.len());
    }
}

impl<B: Backend> BatchSource for EpochFeed<B> {
    type Batch = RetrievalBatch<B>;

    fn next_batch(&mut self) -> Result<Feed<Self::Batch>> {
        if self.epoch == 0 || self.cursor + self.batch_size > self.order.len() {
            if self.epoch >= self.epochs {
                return Ok(Feed::Exhausted);
            }
            self.start_epoch();
            if self.order.len() < self.batch_size {
                tracing::warn!(
                    "Not enough samples for one batch of {} on this worker",
                    self.batch_size
                );
                self.epoch = self.epochs;
                return Ok(Feed::Exhausted);
            }
        }

        let items = self.order[self.cursor..self.cursor + self.batch_size]
            .iter()
            .filter_map(|&i| self.dataset.get(i))
            .collect();
        self.cursor += self.batch_size;

        Ok(Feed::Batch(self.batcher.batch(items)))
    }

    fn reset(&mut self) {
        self.rng    = StdRng::seed_from_u64(self.seed);
        self.order  = Vec::new();
        self.cursor = 0;
        self.epoch  = 0;
    }

    fn progress(&self) -> EpochProgress {
        EpochProgress {
            epoch:          self.epoch,
            example:        self.cursor,
            total_examples: self.dataset.len(),
        }
    }
}
