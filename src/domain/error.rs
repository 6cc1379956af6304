// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Typed errors raised by the library layers (domain, data, ml).
// The application and CLI layers wrap them in anyhow::Error
// together with file-path context.
//
//   Configuration errors — raised before or at the start of
//                          training, never retried
//   Data errors          — empty corpora, malformed rows,
//                          embedding width mismatches
//
// Training-time numeric issues (a PTA dropout jitter leaving its
// bounds) are not errors: they are rejected locally and logged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaggerError {
    // ─── Configuration ───────────────────────────────────────────────────────
    #[error("invalid output head query '{query}': {reason}")]
    InvalidHeadQuery { query: String, reason: String },

    #[error(
        "cannot have task {task} at layer {layer}, outside the model's layers 1..={depth}; \
         adjust the layer or increase h_layers ({depth})"
    )]
    LayerBeyondEncoder { task: String, layer: usize, depth: usize },

    #[error("got {layers} prediction layers for {tasks} tasks")]
    TaskLayerCount { layers: usize, tasks: usize },

    #[error("periodic head adaptation ({0} checkpoints per epoch) requires a dev set")]
    PeriodicAdaptationWithoutDev(usize),

    #[error("patience requires a dev set")]
    PatienceWithoutDev,

    #[error("minibatch training is not supported (minibatch size {0})")]
    MinibatchUnsupported(usize),

    #[error("got {found} initial dropout rates for {expected} output heads")]
    DropoutListLength { found: usize, expected: usize },

    #[error("head index {index} is out of range for {out_num} output heads")]
    HeadOutOfRange { index: usize, out_num: usize },

    #[error("dropout rate {0} must lie in [0, 1)")]
    DropoutOutOfRange(f64),

    // ─── Data ────────────────────────────────────────────────────────────────
    #[error("no data read from {0}")]
    EmptyCorpus(String),

    #[error("malformed row at {source_name}:{line}: {content:?}")]
    MalformedRow { source_name: String, line: usize, content: String },

    #[error("embedding dimension {found} does not match configured input width {expected}")]
    EmbeddingDimMismatch { found: usize, expected: usize },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
}

impl TaggerError {
    /// True for errors that reject a configuration before any training step runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TaggerError::InvalidHeadQuery { .. }
                | TaggerError::LayerBeyondEncoder { .. }
                | TaggerError::TaskLayerCount { .. }
                | TaggerError::PeriodicAdaptationWithoutDev(_)
                | TaggerError::PatienceWithoutDev
                | TaggerError::MinibatchUnsupported(_)
                | TaggerError::DropoutListLength { .. }
                | TaggerError::HeadOutOfRange { .. }
                | TaggerError::DropoutOutOfRange(_)
        )
    }
}
