// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Provides the byte-level BPE tokenizer used for captions.
//
// Three sources, checked in order:
//   1. `tokenizer_file`         → a ready HuggingFace tokenizer.json
//   2. {dir}/tokenizer.json     → cached from a previous run
//   3. encoder.json + vocab.bpe → GPT-2 style files, converted once
//
// In tokenizers 0.15 the simplest reliable way to assemble a BPE
// tokenizer from raw files is to write the tokenizer JSON
// ourselves and load it with `Tokenizer::from_file`.
//
// Reference: Sennrich et al. (2016) BPE paper
//            Radford et al. (2019) GPT-2 byte-level BPE

use anyhow::{anyhow, ensure, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tokenizers::Tokenizer;

use crate::application::config::TokenizerPaths;

/// GPT-2's only special token, reused as the padding id
const END_OF_TEXT: &str = "<|endoftext|>";

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the cached tokenizer JSON
    pub fn cache_path(&self) -> PathBuf {
        self.dir.join("tokenizer.json")
    }

    /// Load the configured tokenizer, converting the BPE files on first use
    pub fn load_or_build(&self, paths: &TokenizerPaths) -> Result<Tokenizer> {
        if let Some(file) = &paths.tokenizer_file {
            tracing::info!("Loading tokenizer from '{}'", file.display());
            return load(file);
        }

        let cached = self.cache_path();
        if cached.exists() {
            tracing::info!("Loading cached tokenizer from '{}'", cached.display());
            return load(&cached);
        }

        match (&paths.encoder_json_file, &paths.vocab_bpe_file) {
            (Some(encoder), Some(merges)) => self.build_and_save(encoder, merges),
            _ => Err(anyhow!("No tokenizer file and no encoder.json / vocab.bpe pair given")),
        }
    }

    /// Convert a GPT-2 vocabulary + merge list into a tokenizer JSON,
    /// write it to the cache, and load it back.
    fn build_and_save(&self, encoder_json: &Path, vocab_bpe: &Path) -> Result<Tokenizer> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        // ── Step 1: Vocabulary (token → id) ───────────────────────────────────
        let raw = fs::read_to_string(encoder_json)
            .with_context(|| format!("Cannot read '{}'", encoder_json.display()))?;
        let vocab: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw)
            .with_context(|| format!("'{}' is not a JSON object", encoder_json.display()))?;
        ensure!(!vocab.is_empty(), "'{}' holds an empty vocabulary", encoder_json.display());

        // ── Step 2: Merge list, skipping the "#version" header ────────────────
        let raw = fs::read_to_string(vocab_bpe)
            .with_context(|| format!("Cannot read '{}'", vocab_bpe.display()))?;
        let merges = parse_merges(&raw)?;

        let (vocab_len, merges_len) = (vocab.len(), merges.len());

        // ── Step 3: Write tokenizer JSON in HuggingFace format ────────────────
        let byte_level = serde_json::json!({
            "type": "ByteLevel",
            "add_prefix_space": false,
            "trim_offsets": true,
            "use_regex": true
        });
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": byte_level.clone(),
            "post_processor": null,
            "decoder": byte_level,
            "model": {
                "type": "BPE",
                "dropout": null,
                "unk_token": null,
                "continuing_subword_prefix": "",
                "end_of_word_suffix": "",
                "fuse_unk": false,
                "byte_fallback": false,
                "vocab": vocab,
                "merges": merges
            }
        });

        let tok_path = self.cache_path();
        fs::write(&tok_path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| format!("Cannot write '{}'", tok_path.display()))?;

        tracing::info!(
            "Tokenizer built with {} tokens and {} merges, saved to '{}'",
            vocab_len,
            merges_len,
            tok_path.display()
        );

        load(&tok_path)
    }
}

fn load(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path)
        .map_err(|e| anyhow!("Cannot load tokenizer from '{}': {e}", path.display()))
}

/// Parse a GPT-2 `vocab.bpe` body into "left right" merge strings.
fn parse_merges(raw: &str) -> Result<Vec<String>> {
    let mut merges = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with("#version") {
            continue;
        }
        let mut parts = line.split(' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), None) if !a.is_empty() && !b.is_empty() => {
                merges.push(format!("{a} {b}"));
            }
            _ => return Err(anyhow!("Malformed merge on line {}: '{line}'", lineno + 1)),
        }
    }
    Ok(merges)
}

// ─── CaptionEncoder ───────────────────────────────────────────────────────────
/// Turns a caption into fixed-length `input_ids` + `attention_mask`.
pub struct CaptionEncoder {
    tokenizer:   Tokenizer,
    max_seq_len: usize,
    pad_id:      u32,
}

impl CaptionEncoder {
    pub fn new(tokenizer: Tokenizer, max_seq_len: usize) -> Self {
        let pad_id = tokenizer.token_to_id(END_OF_TEXT).unwrap_or(0);
        Self { tokenizer, max_seq_len, pad_id }
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// Tokenise, truncate to `max_seq_len`, then pad.
    /// Mask is 1 for real tokens and 0 for padding.
    pub fn encode(&self, text: &str) -> Result<(Vec<u32>, Vec<u32>)> {
        let enc = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow!("Tokenisation error: {e}"))?;

        let mut input_ids: Vec<u32> = enc.get_ids().to_vec();
        input_ids.truncate(self.max_seq_len);

        let mut attention_mask = vec![1u32; input_ids.len()];
        input_ids.resize(self.max_seq_len, self.pad_id);
        attention_mask.resize(self.max_seq_len, 0);

        Ok((input_ids, attention_mask))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Writes a tiny GPT-2 style vocabulary where "ab" and " ab" are single tokens.
    pub(crate) fn write_tiny_bpe(dir: &Path) -> TokenizerPaths {
        let encoder = dir.join("encoder.json");
        let merges  = dir.join("vocab.bpe");
        fs::write(
            &encoder,
            r#"{"a": 0, "b": 1, "ab": 2, "Ġ": 3, "Ġab": 4, "<|endoftext|>": 5}"#,
        ).unwrap();
        fs::write(&merges, "#version: 0.2\na b\nĠ ab\n").unwrap();

        TokenizerPaths {
            tokenizer_file:    None,
            encoder_json_file: Some(encoder),
            vocab_bpe_file:    Some(merges),
            do_lower_case:     false,
        }
    }

    #[test]
    fn test_parse_merges_skips_header() {
        let merges = parse_merges("#version: 0.2\na b\n\nĠ ab\n").unwrap();
        assert_eq!(merges, vec!["a b", "Ġ ab"]);
    }

    #[test]
    fn test_parse_merges_rejects_malformed_line() {
        assert!(parse_merges("a b c\n").is_err());
    }

    #[test]
    fn test_builds_and_caches_from_bpe_files() {
        let dir   = tempfile::tempdir().unwrap();
        let paths = write_tiny_bpe(dir.path());
        let store = TokenizerStore::new(dir.path().join("ckpt"));

        let tok = store.load_or_build(&paths).unwrap();
        assert!(store.cache_path().exists());

        let ids = tok.encode("ab ab", false).unwrap().get_ids().to_vec();
        assert_eq!(ids, vec![2, 4]);

        // Second call reads the cache even without source files
        let cached = store.load_or_build(&TokenizerPaths::default()).unwrap();
        assert_eq!(cached.get_vocab_size(true), tok.get_vocab_size(true));
    }

    #[test]
    fn test_caption_encoder_pads_and_truncates() {
        let dir   = tempfile::tempdir().unwrap();
        let paths = write_tiny_bpe(dir.path());
        let tok   = TokenizerStore::new(dir.path()).load_or_build(&paths).unwrap();

        let enc = CaptionEncoder::new(tok, 4);
        let (ids, mask) = enc.encode("ab ab").unwrap();
        assert_eq!(ids,  vec![2, 4, 5, 5]);
        assert_eq!(mask, vec![1, 1, 0, 0]);

        let (ids, mask) = enc.encode("ab ab ab ab ab").unwrap();
        assert_eq!(ids.len(), 4);
        assert_eq!(mask, vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_missing_sources_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        assert!(store.load_or_build(&TokenizerPaths::default()).is_err());
    }
}
