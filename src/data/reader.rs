// ============================================================
// Layer 4 — Split Reader
// ============================================================
// Reads one split from disk and joins captions with image
// features:
//
//   captions.tsv                 features/
//     img1#0<TAB>a dog runs        img1.json  → [f32; D]
//     img1#1<TAB>a brown dog       img2.json  → [[f32; D]; R]
//     img2#0<TAB>two cats
//
// An id of the form `name#k` is the k-th caption of image
// `name`. Region features are mean pooled into one vector.
// Captions whose image has no feature file are dropped with a
// warning, as are blank or malformed lines.
//
// Reference: Rust Book §8 (HashMap), §9 (Error Handling)

use anyhow::{anyhow, ensure, Context, Result};
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::data::preprocessor::Preprocessor;

/// The two layouts accepted in a feature file
#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureFile {
    Pooled(Vec<f32>),
    Regions(Vec<Vec<f32>>),
}

/// Split a caption line into (image id, caption text).
/// Returns None for blank lines and lines without a tab.
pub fn parse_caption_line(line: &str) -> Option<(&str, &str)> {
    let (id, caption) = line.split_once('\t')?;
    let id = id.trim();
    if id.is_empty() {
        return None;
    }
    let image = id.split_once('#').map_or(id, |(name, _)| name);
    Some((image, caption))
}

// ─── ImageFeatureStore ────────────────────────────────────────────────────────
pub struct ImageFeatureStore {
    dir: PathBuf,
    dim: usize,
}

impl ImageFeatureStore {
    pub fn new(dir: impl Into<PathBuf>, dim: usize) -> Self {
        Self { dir: dir.into(), dim }
    }

    pub fn path_for(&self, image_id: &str) -> PathBuf {
        self.dir.join(format!("{image_id}.json"))
    }

    /// Load and pool the feature vector of one image.
    pub fn load(&self, image_id: &str) -> Result<Vec<f32>> {
        let path = self.path_for(image_id);
        let raw  = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        let file: FeatureFile = serde_json::from_str(&raw)
            .with_context(|| format!("'{}' is neither [f32] nor [[f32]]", path.display()))?;

        let pooled = match file {
            FeatureFile::Pooled(v) => v,
            FeatureFile::Regions(regions) => mean_pool(&regions)
                .ok_or_else(|| anyhow!("'{}' has no regions or ragged regions", path.display()))?,
        };

        ensure!(
            pooled.len() == self.dim,
            "'{}' has dimension {}, expected {}",
            path.display(),
            pooled.len(),
            self.dim
        );
        Ok(pooled)
    }
}

fn mean_pool(regions: &[Vec<f32>]) -> Option<Vec<f32>> {
    let dim = regions.first()?.len();
    if regions.iter().any(|r| r.len() != dim) {
        return None;
    }
    let mut sum = vec![0.0f32; dim];
    for region in regions {
        for (s, v) in sum.iter_mut().zip(region) {
            *s += v;
        }
    }
    let n = regions.len() as f32;
    Some(sum.into_iter().map(|s| s / n).collect())
}

// ─── RetrievalCorpus ──────────────────────────────────────────────────────────
/// One split, joined: unique images with their features, and every
/// caption with the index of its image.
#[derive(Debug, Clone, Default)]
pub struct RetrievalCorpus {
    pub image_ids:      Vec<String>,
    pub image_features: Vec<Vec<f32>>,
    pub captions:       Vec<String>,
    /// `caption_image[i]` indexes `image_ids` for caption `i`
    pub caption_image:  Vec<usize>,
}

impl RetrievalCorpus {
    pub fn load(
        caption_file: &Path,
        features:     &ImageFeatureStore,
        cleaner:      &Preprocessor,
    ) -> Result<Self> {
        let raw = fs::read_to_string(caption_file)
            .with_context(|| format!("Cannot read caption file '{}'", caption_file.display()))?;

        let mut corpus = Self::default();
        let mut index: HashMap<String, Option<usize>> = HashMap::new();
        let mut skipped_lines = 0usize;
        let mut skipped_captions = 0usize;

        for line in raw.lines() {
            let Some((image, caption)) = parse_caption_line(line) else {
                if !line.trim().is_empty() {
                    skipped_lines += 1;
                }
                continue;
            };

            let slot = match index.get(image) {
                Some(slot) => *slot,
                None => {
                    let slot = match features.load(image) {
                        Ok(feature) => {
                            corpus.image_ids.push(image.to_string());
                            corpus.image_features.push(feature);
                            Some(corpus.image_ids.len() - 1)
                        }
                        Err(e) => {
                            tracing::warn!("Skipping image '{}': {:#}", image, e);
                            None
                        }
                    };
                    index.insert(image.to_string(), slot);
                    slot
                }
            };

            match slot {
                Some(img) => {
                    corpus.captions.push(cleaner.clean(caption));
                    corpus.caption_image.push(img);
                }
                None => skipped_captions += 1,
            }
        }

        if skipped_lines > 0 {
            tracing::warn!(
                "Skipped {} malformed lines in '{}'",
                skipped_lines,
                caption_file.display()
            );
        }
        if skipped_captions > 0 {
            tracing::warn!("Dropped {} captions without image features", skipped_captions);
        }

        tracing::info!(
            "Read '{}': {} captions over {} images",
            caption_file.display(),
            corpus.captions_num(),
            corpus.image_num()
        );
        Ok(corpus)
    }

    pub fn captions_num(&self) -> usize {
        self.captions.len()
    }

    pub fn image_num(&self) -> usize {
        self.image_ids.len()
    }

    /// Training examples are (caption, image) pairs, one per caption.
    pub fn num_examples(&self) -> usize {
        self.captions_num()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Lay out a split on disk: two images, three captions.
    pub(crate) fn write_split(dir: &Path) -> (PathBuf, PathBuf) {
        let feats = dir.join("features");
        fs::create_dir_all(&feats).unwrap();
        fs::write(feats.join("img1.json"), "[1.0, 0.0]").unwrap();
        fs::write(feats.join("img2.json"), "[[0.0, 1.0], [0.0, 3.0]]").unwrap();

        let captions = dir.join("captions.tsv");
        fs::write(
            &captions,
            "img1#0\tab ab\nimg1#1\tab\n\nimg2#0\tab  ab ab\nmissing#0\tab\nno tab here\n",
        ).unwrap();
        (captions, feats)
    }

    #[test]
    fn test_parse_caption_line_strips_caption_index() {
        assert_eq!(parse_caption_line("img7#3\ta cat"), Some(("img7", "a cat")));
        assert_eq!(parse_caption_line("img7\ta cat"), Some(("img7", "a cat")));
        assert_eq!(parse_caption_line("no tab"), None);
        assert_eq!(parse_caption_line("\tempty id"), None);
    }

    #[test]
    fn test_region_features_are_mean_pooled() {
        let dir = tempfile::tempdir().unwrap();
        let (_, feats) = write_split(dir.path());
        let store = ImageFeatureStore::new(feats, 2);
        assert_eq!(store.load("img2").unwrap(), vec![0.0, 2.0]);
    }

    #[test]
    fn test_wrong_dimension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (_, feats) = write_split(dir.path());
        let store = ImageFeatureStore::new(feats, 3);
        assert!(store.load("img1").is_err());
    }

    #[test]
    fn test_corpus_joins_captions_with_images() {
        let dir = tempfile::tempdir().unwrap();
        let (captions, feats) = write_split(dir.path());
        let store  = ImageFeatureStore::new(feats, 2);
        let corpus = RetrievalCorpus::load(&captions, &store, &Preprocessor::default()).unwrap();

        assert_eq!(corpus.image_ids, vec!["img1", "img2"]);
        assert_eq!(corpus.caption_image, vec![0, 0, 1]);
        assert_eq!(corpus.captions[2], "ab ab ab");
        assert_eq!(corpus.num_examples(), 3);
        assert_eq!(corpus.image_num(), 2);
    }
}
