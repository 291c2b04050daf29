// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn model and optimiser code lives here.
//
//   model.rs     — Dual encoder: transformer caption encoder with
//                  masked mean pooling, linear image projection,
//                  symmetric in-batch contrastive loss
//
//   trainer.rs   — Execution engine: one AdamW step per batch,
//                  checkpoint persistence, evaluation hook
//
//   evaluator.rs — Embeds a held-out split and scores it
//
//   ranking.rs   — Similarity matrix → recall@K metrics
//
//   schedule.rs  — Learning rate schedules
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)
//            Vaswani et al. (2017) Attention Is All You Need
//            Radford et al. (2021) CLIP

/// Caption / image dual encoder
pub mod model;

/// Optimisation steps, checkpoints and evaluation on Burn
pub mod trainer;

/// Full-split retrieval evaluation
pub mod evaluator;

/// Recall@K ranking metrics
pub mod ranking;

/// Learning rate schedules
pub mod schedule;
