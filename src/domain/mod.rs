// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs and traits describing the tagging problem:
// sentences, vocabularies, tasks, head descriptors and errors.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits

/// Typed error taxonomy shared by the library layers
pub mod error;

/// Output head query grammar and head descriptors
pub mod head_spec;

/// Sentences, corpora, indexed instances
pub mod instance;

/// Word / character / tag vocabularies and task descriptors
pub mod vocab;

/// Core abstractions (traits) that other layers implement
pub mod traits;
