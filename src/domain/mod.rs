// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums, and traits describing a finetuning
// run: what a batch feed yields, what an evaluation returns,
// who is allowed to write checkpoints.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O or environment access
//   - Only plain Rust structs, enums, and traits
//
// The training loop controller (Layer 2) is written entirely
// against these types, so it can be driven by the Burn engine
// in production and by in-memory mocks in tests.
//
// Reference: Rust Book §5 (Structs), §6 (Enums), §10 (Traits)

// What a batch source yields: a batch or the end of the stream
pub mod feed;

// Evaluation outcomes and the per-split metric history
pub mod metrics;

// Leader / follower role of this worker in a multi-worker run
pub mod role;

// Core abstractions (traits) that the engine and data layers implement
pub mod traits;
