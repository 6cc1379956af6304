// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// Seams the application layer programs against.
//
//   CorpusSource  — anything that yields annotated sentences
//                   (CoNLL files, CoNLL-U files, raw text)
//   PredictionSink — anything that receives token-level
//                   predictions (files, stdout, test buffers)

use anyhow::Result;

use crate::domain::instance::TaggedSentence;

// ─── CorpusSource ─────────────────────────────────────────────────────────────
/// A restartable source of (tokens, tags) sentences.
///
/// Implementations:
///   - ConllReader  → two-column `token<TAB>tag` files
///   - ConllUReader → CoNLL-U files (FORM / UPOS columns)
///   - RawReader    → one whitespace-tokenised sentence per line
pub trait CorpusSource {
    /// Human-readable origin used in diagnostics.
    fn name(&self) -> String;

    /// Read every sentence. Calling it again restarts from the beginning.
    fn read_sentences(&self) -> Result<Vec<TaggedSentence>>;
}

// ─── PredictionSink ───────────────────────────────────────────────────────────
/// Receives one line per token and a separator after each sentence.
pub trait PredictionSink {
    fn token(&mut self, word: &str, gold: Option<&str>, predicted: &str, confidence: Option<f32>) -> Result<()>;

    fn end_sentence(&mut self) -> Result<()>;
}
