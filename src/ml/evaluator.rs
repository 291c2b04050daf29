// ============================================================
// Layer 5 — Retrieval Evaluator
// ============================================================
// One full pass over a held-out split:
//
//   1. Embed every caption         (batched)   → [captions, E]
//   2. Embed every unique image    (batched)   → [images, E]
//   3. Score all pairs                         → SimilarityMatrix
//   4. Reduce to recall@K in both directions
//   5. Select the primary metric named by `key_eval`
//
// Runs on the inner (non-autodiff) backend; the caller passes
// `model.valid()` so dropout is disabled.

use anyhow::{anyhow, Result};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
};

use crate::data::{
    batcher::{features_tensor, RetrievalBatcher},
    dataset::RetrievalDataset,
};
use crate::domain::metrics::{EvalOutcome, Split};
use crate::ml::model::RetrievalModel;
use crate::ml::ranking::{into_outcome, recall_metrics, SimilarityMatrix};

pub struct RetrievalEvaluator {
    dev:        Option<RetrievalDataset>,
    test:       Option<RetrievalDataset>,
    batch_size: usize,
    key_eval:   String,
}

impl RetrievalEvaluator {
    pub fn new(batch_size: usize, key_eval: impl Into<String>) -> Self {
        Self { dev: None, test: None, batch_size: batch_size.max(1), key_eval: key_eval.into() }
    }

    pub fn with_split(mut self, split: Split, dataset: RetrievalDataset) -> Self {
        match split {
            Split::Dev  => self.dev  = Some(dataset),
            Split::Test => self.test = Some(dataset),
        }
        self
    }

    fn dataset(&self, split: Split) -> Result<&RetrievalDataset> {
        let loaded = match split {
            Split::Dev  => self.dev.as_ref(),
            Split::Test => self.test.as_ref(),
        };
        loaded.ok_or_else(|| anyhow!("No {split} data was loaded"))
    }

    pub fn evaluate<B: Backend>(
        &self,
        model:  &RetrievalModel<B>,
        device: &B::Device,
        split:  Split,
    ) -> Result<EvalOutcome> {
        let ds = self.dataset(split)?;
        let batcher = RetrievalBatcher::<B>::new(device.clone());

        // ── Captions ──────────────────────────────────────────────────────────
        let mut captions = Vec::new();
        let mut dim = 0;
        for start in (0..ds.len()).step_by(self.batch_size) {
            let end   = (start + self.batch_size).min(ds.len());
            let items = (start..end).filter_map(|i| ds.get(i)).collect();
            let batch = batcher.batch(items);
            let emb   = model.encode_text(batch.input_ids, batch.attention_mask);
            dim = emb.dims()[1];
            captions.extend(to_vec(emb)?);
        }

        // ── Images ────────────────────────────────────────────────────────────
        let mut images = Vec::new();
        for chunk in ds.image_features().chunks(self.batch_size) {
            let emb = model.encode_image(features_tensor::<B>(chunk, device));
            images.extend(to_vec(emb)?);
        }

        let sim     = SimilarityMatrix::from_embeddings(&captions, &images, dim)?;
        let metrics = recall_metrics(&sim, &ds.caption_images())?;
        tracing::debug!("{} metrics: {:?}", split, metrics);

        into_outcome(metrics, &self.key_eval)
    }
}

fn to_vec<B: Backend>(t: Tensor<B, 2>) -> Result<Vec<f32>> {
    t.into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("Cannot read embeddings back: {e:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    use crate::ml::model::tests::{tiny_config, tiny_samples};

    #[test]
    fn test_outcome_carries_requested_key_and_bounded_values() {
        let device = Default::default();
        let model: RetrievalModel<NdArray> = tiny_config().init(&device);
        let evaluator = RetrievalEvaluator::new(3, "t2i_r@1")
            .with_split(Split::Dev, RetrievalDataset::from_samples(tiny_samples()));

        let outcome = evaluator.evaluate(&model, &device, Split::Dev).unwrap();
        assert_eq!(outcome.primary_metric, "t2i_r@1");
        assert!((0.0..=1.0).contains(&outcome.primary_value));
        assert_eq!(outcome.auxiliary.len(), 6);

        // Ten or more candidates never exist here, so r@10 is perfect
        assert_eq!(outcome.auxiliary["i2t_r@10"], 1.0);
        assert_eq!(outcome.auxiliary["t2i_r@10"], 1.0);
    }

    #[test]
    fn test_unloaded_split_is_an_error() {
        let device = Default::default();
        let model: RetrievalModel<NdArray> = tiny_config().init(&device);
        let evaluator = RetrievalEvaluator::new(2, "avg_recall");
        assert!(evaluator.evaluate(&model, &device, Split::Test).is_err());
    }
}
