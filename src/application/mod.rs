// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one goal: a
// finetuning and/or evaluation run.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No direct file formats (that's Layer 4 and 6)
//   - Only workflow coordination and the run's control flow
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

/// Immutable run options and their validation
pub mod config;

/// Step sequencing, periodic side effects, best-result tracking
pub mod training_loop;

/// The end-to-end finetuning workflow
pub mod finetune_use_case;
