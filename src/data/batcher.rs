// ============================================================
// Layer 4 — Retrieval Batcher
// ============================================================
// Implements Burn's Batcher trait to convert a Vec<RetrievalSample>
// into device tensors.
//
//   Input:  N samples, captions padded to length S, features of dim D
//   Output: RetrievalBatch with
//             image_feats    [N, D]
//             input_ids      [N, S]
//             attention_mask [N, S]
//
// Sequences are already padded in RetrievalSample, so batching is
// a flatten + reshape.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::RetrievalSample;

/// A batch of (caption, image) pairs. Row `i` of every tensor
/// belongs to the same pair, which makes the diagonal of the
/// caption × image score matrix the positives.
#[derive(Debug, Clone)]
pub struct RetrievalBatch<B: Backend> {
    /// Pooled image features — shape: [batch_size, feature_dim]
    pub image_feats: Tensor<B, 2>,

    /// Token ID sequences — shape: [batch_size, seq_len]
    pub input_ids: Tensor<B, 2, Int>,

    /// 1 = real token, 0 = padding — shape: [batch_size, seq_len]
    pub attention_mask: Tensor<B, 2, Int>,
}

#[derive(Clone, Debug)]
pub struct RetrievalBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> RetrievalBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

/// Stack equal-length feature rows into a [rows, dim] tensor.
pub fn features_tensor<B: Backend>(rows: &[Vec<f32>], device: &B::Device) -> Tensor<B, 2> {
    let dim  = rows.first().map(Vec::len).unwrap_or(0);
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([rows.len(), dim])
}

impl<B: Backend> Batcher<RetrievalSample, RetrievalBatch<B>> for RetrievalBatcher<B> {
    fn batch(&self, items: Vec<RetrievalSample>) -> RetrievalBatch<B> {
        let batch_size = items.len();
        let seq_len    = items[0].input_ids.len();

        // Burn Int tensors take i32
        let input_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.input_ids.iter().map(|&x| x as i32))
            .collect();

        let mask_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.attention_mask.iter().map(|&x| x as i32))
            .collect();

        let features: Vec<Vec<f32>> = items.into_iter().map(|s| s.image_feature).collect();

        let input_ids = Tensor::<B, 1, Int>::from_ints(
            input_flat.as_slice(), &self.device
        ).reshape([batch_size, seq_len]);

        let attention_mask = Tensor::<B, 1, Int>::from_ints(
            mask_flat.as_slice(), &self.device
        ).reshape([batch_size, seq_len]);

        RetrievalBatch {
            image_feats: features_tensor(&features, &self.device),
            input_ids,
            attention_mask,
        }
    }
}
