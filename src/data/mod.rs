// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between files on disk and integer instances.
//
// The pipeline flows in this order:
//
//   CoNLL / CoNLL-U / raw files
//       │
//       ▼
//   Corpus readers     → (tokens, tags) sentences per task
//       │
//       ▼
//   FeatureIndexer     → vocabularies + indexed instances
//       │
//       ▼
//   PretrainedEmbeddings (optional) → extra vocabulary rows
//       │
//       ▼
//   Splitter (optional) → held-out dev set
//
// Each module is responsible for exactly one step.

/// CoNLL, CoNLL-U and raw text readers
pub mod conll;

/// Pre-trained word vectors: loading and export
pub mod embeddings;

/// Vocabulary construction and instance indexing
pub mod indexer;

/// Shuffles and holds out a dev share of the training data
pub mod splitter;
