// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from files on disk to tensor batches.
//
//   captions.tsv + features/*.json
//       │
//       ▼
//   reader        → joins captions with pooled image features
//       │
//       ▼
//   Preprocessor  → cleans caption text
//       │
//       ▼
//   CaptionEncoder (infra) → fixed-length token ids + mask
//       │
//       ▼
//   RetrievalDataset → implements Burn's Dataset trait
//       │
//       ▼
//   RetrievalBatcher → stacks samples into tensor batches
//       │
//       ▼
//   EpochFeed     → shuffled, sharded, epoch-cycling BatchSource
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Caption file and image feature parsing
pub mod reader;

/// Cleans and normalises caption text
pub mod preprocessor;

/// Implements Burn's Dataset trait for retrieval samples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Training batch source with epochs, shuffling and sharding
pub mod feed;
