use anyhow::{ensure, Result};
use burn::{
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        loss::CrossEntropyLossConfig,
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
};

use crate::data::batcher::RetrievalBatch;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct RetrievalModelConfig {
    pub vocab_size:        usize,
    pub max_seq_len:       usize,
    pub d_model:           usize,
    pub num_heads:         usize,
    pub num_layers:        usize,
    pub d_ff:              usize,
    /// Width of the pooled image features on disk
    pub image_feature_dim: usize,
    /// Shared caption / image embedding width
    #[config(default = 256)]
    pub embed_dim:         usize,
    #[config(default = 0.1)]
    pub dropout:           f64,
    /// Softmax temperature applied to cosine similarities
    #[config(default = 0.07)]
    pub temperature:       f64,
}

impl RetrievalModelConfig {
    pub fn check(&self) -> Result<()> {
        ensure!(self.num_heads > 0 && self.d_model % self.num_heads == 0,
            "d_model ({}) must be divisible by num_heads ({})", self.d_model, self.num_heads);
        ensure!(self.temperature > 0.0, "temperature must be positive, got {}", self.temperature);
        ensure!(self.image_feature_dim > 0, "image_feature_dim must be positive");
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> RetrievalModel<B> {
        let token_embedding    = EmbeddingConfig::new(self.vocab_size, self.d_model).init(device);
        let position_embedding = EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device);
        let layers: Vec<EncoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();
        let final_norm = LayerNormConfig::new(self.d_model).init(device);
        let text_proj  = LinearConfig::new(self.d_model, self.embed_dim).init(device);
        let image_proj = LinearConfig::new(self.image_feature_dim, self.embed_dim).init(device);
        let dropout    = DropoutConfig::new(self.dropout).init();
        RetrievalModel {
            token_embedding, position_embedding, layers,
            final_norm, text_proj, image_proj, dropout,
            max_seq_len: self.max_seq_len,
            temperature: self.temperature,
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// `pad`: [batch, seq_len], true where the position is padding.
    pub fn forward(&self, x: Tensor<B, 3>, pad: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let input = MhaInput::self_attn(x.clone()).mask_pad(pad);
        let attn_output = self.self_attn.forward(input).context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(
            burn::tensor::activation::gelu(self.ffn_linear1.forward(x.clone()))
        );
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

/// Caption encoder + image projection into one embedding space.
#[derive(Module, Debug)]
pub struct RetrievalModel<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub layers:             Vec<EncoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub text_proj:          Linear<B>,
    pub image_proj:         Linear<B>,
    pub dropout:            Dropout,
    pub max_seq_len:        usize,
    pub temperature:        f64,
}

/// Scale every row to unit length.
fn l2_normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(1e-12);
    x / norm
}

impl<B: Backend> RetrievalModel<B> {
    /// input_ids, attention_mask: [batch, seq_len] → unit embeddings [batch, embed_dim]
    pub fn encode_text(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 2> {
        let [batch_size, seq_len] = input_ids.dims();

        let tok_emb = self.token_embedding.forward(input_ids);

        // Self-attention is permutation-invariant, so position must be injected explicitly.
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &tok_emb.device())
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_emb = self.position_embedding.forward(positions);

        let pad = attention_mask.clone().equal_elem(0);
        let mut x = self.dropout.forward(tok_emb + pos_emb);
        for layer in &self.layers {
            x = layer.forward(x, pad.clone());
        }
        let x = self.final_norm.forward(x); // [batch, seq_len, d_model]
        let [_, _, d_model] = x.dims();

        // Mean over real tokens only
        let mask   = attention_mask.float().unsqueeze_dim::<3>(2); // [batch, seq_len, 1]
        let summed = (x * mask.clone()).sum_dim(1).reshape([batch_size, d_model]);
        let counts = mask.sum_dim(1).reshape([batch_size, 1]).clamp_min(1.0);

        l2_normalize(self.text_proj.forward(summed / counts))
    }

    /// image_feats: [batch, image_feature_dim] → unit embeddings [batch, embed_dim]
    pub fn encode_image(&self, image_feats: Tensor<B, 2>) -> Tensor<B, 2> {
        l2_normalize(self.image_proj.forward(image_feats))
    }

    /// Symmetric in-batch contrastive loss: row i's caption and image are
    /// the positive pair, every other row in the batch is a negative.
    pub fn forward_loss(&self, batch: RetrievalBatch<B>) -> Tensor<B, 1> {
        let text  = self.encode_text(batch.input_ids, batch.attention_mask);
        let image = self.encode_image(batch.image_feats);
        let [batch_size, _] = text.dims();
        let device = text.device();

        let logits  = text.matmul(image.transpose()).div_scalar(self.temperature); // [batch, batch]
        let targets = Tensor::<B, 1, Int>::arange(0..batch_size as i64, &device);

        let ce = CrossEntropyLossConfig::new().init(&device);
        // Loss = (CE_text→image + CE_image→text) / 2
        (ce.forward(logits.clone(), targets.clone())
            + ce.forward(logits.transpose(), targets)) / 2.0_f64
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn::backend::NdArray;

    use crate::data::{batcher::RetrievalBatcher, dataset::RetrievalSample};
    use burn::data::dataloader::batcher::Batcher;

    pub(crate) fn tiny_config() -> RetrievalModelConfig {
        RetrievalModelConfig::new(8, 4, 8, 2, 1, 16, 3)
            .with_embed_dim(4)
            .with_dropout(0.0)
    }

    pub(crate) fn tiny_samples() -> Vec<RetrievalSample> {
        (0..4)
            .map(|i| {
                let mut feature = vec![0.0f32; 3];
                feature[i % 3] = 1.0;
                RetrievalSample {
                    image_feature:  feature,
                    input_ids:      vec![(i + 1) as u32, (i + 2) as u32, 0, 0],
                    attention_mask: vec![1, 1, 0, 0],
                    image_index:    i,
                }
            })
            .collect()
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_config.json");
        tiny_config().save(&path).unwrap();

        let loaded = RetrievalModelConfig::load(&path).unwrap();
        assert_eq!(loaded.embed_dim, 4);
        assert_eq!(loaded.temperature, 0.07);
    }

    #[test]
    fn test_check_rejects_indivisible_heads() {
        let cfg = RetrievalModelConfig::new(8, 4, 10, 3, 1, 16, 3);
        assert!(cfg.check().is_err());
        assert!(tiny_config().check().is_ok());
    }

    #[test]
    fn test_embeddings_are_unit_length() {
        let device = Default::default();
        let model: RetrievalModel<NdArray> = tiny_config().init(&device);
        let batch = RetrievalBatcher::<NdArray>::new(device).batch(tiny_samples());

        let text = model.encode_text(batch.input_ids, batch.attention_mask);
        assert_eq!(text.dims(), [4, 4]);
        let norms = text.powf_scalar(2.0).sum_dim(1).into_data().to_vec::<f32>().unwrap();
        assert!(norms.iter().all(|n| (n - 1.0).abs() < 1e-4));

        let image = model.encode_image(batch.image_feats);
        assert_eq!(image.dims(), [4, 4]);
    }

    #[test]
    fn test_loss_is_finite_and_positive() {
        let device = Default::default();
        let model: RetrievalModel<NdArray> = tiny_config().init(&device);
        let batch = RetrievalBatcher::<NdArray>::new(device).batch(tiny_samples());

        let loss: f64 = model.forward_loss(batch).into_scalar().elem::<f64>();
        assert!(loss.is_finite());
        assert!(loss > 0.0);
    }
}
