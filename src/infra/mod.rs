// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns that don't belong to any one layer:
//
//   checkpoint.rs      — model + optimiser records per step,
//                        model config JSON (Burn CompactRecorder)
//
//   tokenizer_store.rs — byte-level BPE tokenizer: converts GPT-2
//                        vocabulary files once, caches tokenizer.json,
//                        encodes captions to fixed length
//
//   metrics.rs         — CSV log of evaluation events
//
//   cluster.rs         — worker topology from the environment
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Tokenizer conversion, caching and caption encoding
pub mod tokenizer_store;

/// Evaluation metrics CSV logger
pub mod metrics;

/// Worker role and collective-communication plan
pub mod cluster;
