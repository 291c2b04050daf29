// ============================================================
// Layer 5 — Ranking Metrics
// ============================================================
// Reduces a caption × image similarity matrix to recall@K in
// both retrieval directions:
//
//   t2i_r@K  — for each caption, is its image in the top K images?
//   i2t_r@K  — for each image, is any of its captions in the top K captions?
//   avg_recall — mean of the six recall values
//
// Ranks are strict: an item's rank is the number of candidates
// scoring strictly higher than it, so ties favour the ground truth.

use std::collections::BTreeMap;

use anyhow::{anyhow, ensure, Result};

use crate::domain::metrics::EvalOutcome;

/// Every metric name `recall_metrics` produces.
pub const RECALL_METRICS: [&str; 7] = [
    "avg_recall",
    "i2t_r@1", "i2t_r@5", "i2t_r@10",
    "t2i_r@1", "t2i_r@5", "t2i_r@10",
];

const RECALL_KS: [usize; 3] = [1, 5, 10];

/// Row-major similarity scores: one row per caption, one column per image.
#[derive(Debug, Clone)]
pub struct SimilarityMatrix {
    captions: usize,
    images:   usize,
    scores:   Vec<f32>,
}

impl SimilarityMatrix {
    /// Dot products between every caption embedding and every image embedding.
    /// Both inputs are flat row-major `[n, dim]` buffers.
    pub fn from_embeddings(captions: &[f32], images: &[f32], dim: usize) -> Result<Self> {
        ensure!(dim > 0, "embedding dim must be positive");
        ensure!(
            captions.len() % dim == 0 && images.len() % dim == 0,
            "embedding buffers are not multiples of dim {dim}"
        );
        let n_captions = captions.len() / dim;
        let n_images   = images.len() / dim;

        let mut scores: Vec<f32> = Vec::with_capacity(n_captions * n_images);
        for c in captions.chunks_exact(dim) {
            for i in images.chunks_exact(dim) {
                scores.push(c.iter().zip(i).map(|(a, b)| a * b).sum());
            }
        }
        // NaN never compares greater, so it would rank every target first
        ensure!(
            scores.iter().all(|s| s.is_finite()),
            "similarity scores are not finite; the model has likely diverged"
        );
        Ok(Self { captions: n_captions, images: n_images, scores })
    }

    #[cfg(test)]
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let images = rows.first().map(Vec::len).unwrap_or(0);
        ensure!(rows.iter().all(|r| r.len() == images), "ragged similarity rows");
        Ok(Self { captions: rows.len(), images, scores: rows.concat() })
    }

    pub fn get(&self, caption: usize, image: usize) -> f32 {
        self.scores[caption * self.images + image]
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.captions, self.images)
    }
}

/// Compute all recall metrics. `caption_image[r]` is the ground-truth
/// image column of caption row `r`.
pub fn recall_metrics(sim: &SimilarityMatrix, caption_image: &[usize]) -> Result<BTreeMap<String, f64>> {
    let (n_captions, n_images) = sim.dims();
    ensure!(n_captions > 0 && n_images > 0, "cannot rank an empty split");
    ensure!(
        caption_image.len() == n_captions,
        "{} ground-truth labels for {} captions",
        caption_image.len(),
        n_captions
    );
    ensure!(
        caption_image.iter().all(|&img| img < n_images),
        "ground-truth image index out of range"
    );

    // ── Text → image ──────────────────────────────────────────────────────────
    let t2i_ranks: Vec<usize> = caption_image
        .iter()
        .enumerate()
        .map(|(row, &gt)| {
            let target = sim.get(row, gt);
            (0..n_images).filter(|&col| sim.get(row, col) > target).count()
        })
        .collect();

    // ── Image → text: best rank among the image's captions ───────────────────
    let mut i2t_ranks = Vec::with_capacity(n_images);
    for col in 0..n_images {
        let best = caption_image
            .iter()
            .enumerate()
            .filter(|&(_, &gt)| gt == col)
            .map(|(row, _)| {
                let target = sim.get(row, col);
                (0..n_captions).filter(|&r| sim.get(r, col) > target).count()
            })
            .min();
        // Images without any caption cannot be scored
        if let Some(rank) = best {
            i2t_ranks.push(rank);
        }
    }

    let mut metrics = BTreeMap::new();
    for k in RECALL_KS {
        metrics.insert(format!("i2t_r@{k}"), recall_at(&i2t_ranks, k));
        metrics.insert(format!("t2i_r@{k}"), recall_at(&t2i_ranks, k));
    }
    let avg = metrics.values().sum::<f64>() / metrics.len() as f64;
    metrics.insert("avg_recall".to_string(), avg);
    Ok(metrics)
}

fn recall_at(ranks: &[usize], k: usize) -> f64 {
    if ranks.is_empty() {
        return 0.0;
    }
    ranks.iter().filter(|&&r| r < k).count() as f64 / ranks.len() as f64
}

/// Split a metric map into the primary metric named `key` and the rest.
pub fn into_outcome(mut metrics: BTreeMap<String, f64>, key: &str) -> Result<EvalOutcome> {
    let value = metrics
        .remove(key)
        .ok_or_else(|| anyhow!("evaluator produced no metric named '{key}'"))?;
    Ok(metrics
        .into_iter()
        .fold(EvalOutcome::new(key, value), |outcome, (name, v)| outcome.with_auxiliary(name, v)))
}
