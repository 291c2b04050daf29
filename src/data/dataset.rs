// ============================================================
// Layer 4 — Retrieval Dataset
// ============================================================
// Tokenised captions paired with their image's pooled feature,
// exposed through Burn's Dataset trait.
//
// Besides the per-caption samples, the dataset keeps every
// unique image feature once, in image-index order, so the
// evaluator can embed each image a single time and score it
// against every caption.

use anyhow::Result;
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::data::reader::RetrievalCorpus;
use crate::infra::tokenizer_store::CaptionEncoder;

/// One tokenised caption paired with its image's pooled feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSample {
    pub image_feature:  Vec<f32>,
    pub input_ids:      Vec<u32>,
    pub attention_mask: Vec<u32>,
    /// Index of the image within its split
    pub image_index:    usize,
}

#[cfg(test)]
impl RetrievalSample {
    pub fn token_count(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }
}

pub struct RetrievalDataset {
    samples:        Vec<RetrievalSample>,
    image_features: Vec<Vec<f32>>,
}

impl RetrievalDataset {
    pub fn from_corpus(corpus: &RetrievalCorpus, encoder: &CaptionEncoder) -> Result<Self> {
        let samples = corpus
            .captions
            .iter()
            .zip(&corpus.caption_image)
            .map(|(caption, &img)| {
                let (input_ids, attention_mask) = encoder.encode(caption)?;
                Ok(RetrievalSample {
                    image_feature: corpus.image_features[img].clone(),
                    input_ids,
                    attention_mask,
                    image_index: img,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { samples, image_features: corpus.image_features.clone() })
    }

    /// Build from ready samples; each image's feature is taken from
    /// the first sample that references it.
    #[cfg(test)]
    pub fn from_samples(samples: Vec<RetrievalSample>) -> Self {
        let images = samples.iter().map(|s| s.image_index + 1).max().unwrap_or(0);
        let mut image_features = vec![Vec::new(); images];
        for s in &samples {
            if image_features[s.image_index].is_empty() {
                image_features[s.image_index] = s.image_feature.clone();
            }
        }
        Self { samples, image_features }
    }

    #[cfg(test)]
    pub fn image_count(&self) -> usize { self.image_features.len() }

    /// Unique image features, in image-index order
    pub fn image_features(&self) -> &[Vec<f32>] { &self.image_features }

    /// Ground-truth image index of every sample, in sample order
    pub fn caption_images(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.image_index).collect()
    }
}

impl Dataset<RetrievalSample> for RetrievalDataset {
    fn get(&self, index: usize) -> Option<RetrievalSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{preprocessor::Preprocessor, reader::{self, ImageFeatureStore}};
    use crate::infra::tokenizer_store::{tests::write_tiny_bpe, TokenizerStore};

    #[test]
    fn test_samples_carry_image_features_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        let (captions, feats) = reader::tests::write_split(dir.path());
        let corpus = RetrievalCorpus::load(
            &captions,
            &ImageFeatureStore::new(feats, 2),
            &Preprocessor::default(),
        ).unwrap();

        let tok = TokenizerStore::new(dir.path()).load_or_build(&write_tiny_bpe(dir.path())).unwrap();
        let ds  = RetrievalDataset::from_corpus(&corpus, &CaptionEncoder::new(tok, 4)).unwrap();

        assert_eq!(ds.len(), 3);
        assert_eq!(ds.image_count(), 2);
        assert_eq!(ds.caption_images(), vec![0, 0, 1]);

        let third = ds.get(2).unwrap();
        assert_eq!(third.image_feature, vec![0.0, 2.0]);
        assert_eq!(third.token_count(), 3);
        assert!(ds.get(3).is_none());
    }
}
