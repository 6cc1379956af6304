// ============================================================
// Layer 4 — Pre-trained Word Embeddings
// ============================================================
// Text format, one vector per line:
//
//   word v1 v2 ... vd
//
// An optional "count dim" header line is skipped. Lines whose
// values do not parse are logged and skipped.
//
// Loading never touches tensors: the model layer asks for the
// rows to overwrite in a flat row-major [num_words, dim] table.

use anyhow::{Context, Result};
use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::domain::error::TaggerError;
use crate::domain::vocab::Vocabulary;

/// Word vectors in file order.
#[derive(Debug, Clone, Default)]
pub struct PretrainedEmbeddings {
    pub dim: usize,
    pub entries: Vec<(String, Vec<f32>)>,
}

impl PretrainedEmbeddings {
    /// Read an embeddings file and check its width against `expected_dim`.
    pub fn load(path: &Path, expected_dim: usize) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Cannot read embeddings '{}'", path.display()))?;
        let emb = Self::parse(&text);
        tracing::info!(
            "Loaded pre-trained embeddings from '{}': {} words, dim {}",
            path.display(),
            emb.entries.len(),
            emb.dim
        );
        if emb.dim != expected_dim {
            return Err(TaggerError::EmbeddingDimMismatch { found: emb.dim, expected: expected_dim }.into());
        }
        Ok(emb)
    }

    pub fn parse(text: &str) -> Self {
        let mut emb = Self::default();

        for line in text.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if emb.entries.is_empty()
                && fields.len() == 2
                && fields.iter().all(|f| f.chars().all(|c| c.is_ascii_digit()))
            {
                continue;
            }

            let values: Result<Vec<f32>, _> = fields[1..].iter().map(|v| v.parse::<f32>()).collect();
            let Ok(values) = values else {
                tracing::warn!("Error converting embeddings line: {}", line);
                continue;
            };

            if emb.entries.is_empty() {
                emb.dim = values.len();
            } else if values.len() != emb.dim {
                tracing::warn!(
                    "Skipping vector for '{}': width {} differs from {}",
                    fields[0],
                    values.len(),
                    emb.dim
                );
                continue;
            }
            emb.entries.push((fields[0].to_string(), values));
        }
        emb
    }

    /// Append every word missing from the vocabulary. Returns how many were added.
    pub fn extend_vocabulary(&self, vocab: &mut Vocabulary) -> usize {
        let before = vocab.words.len();
        for (word, _) in &self.entries {
            vocab.words.get_or_insert(word);
        }
        vocab.words.len() - before
    }

    /// Overwrite the rows of `table` (row-major, `dim` columns) for every word
    /// that has a vector. Returns the number of rows initialised.
    pub fn initialise_rows(&self, vocab: &Vocabulary, table: &mut [f32]) -> usize {
        let mut initialised = 0;
        for (word, vector) in &self.entries {
            let Some(id) = vocab.words.get(word) else { continue };
            let start = id * self.dim;
            if let Some(row) = table.get_mut(start..start + self.dim) {
                row.copy_from_slice(vector);
                initialised += 1;
            }
        }
        tracing::info!("Initialised {} word embedding rows", initialised);
        initialised
    }
}

/// Path of the exported embeddings file for `prefix`.
pub fn export_path(prefix: &Path) -> PathBuf {
    let mut s = prefix.as_os_str().to_owned();
    s.push(".w.emb");
    PathBuf::from(s)
}

/// Write one `word v1 .. vd` line per word id.
pub fn save_word_vectors(prefix: &Path, vocab: &Vocabulary, table: &[f32], dim: usize) -> Result<PathBuf> {
    let path = export_path(prefix);
    let file = fs::File::create(&path)
        .with_context(|| format!("Cannot create embeddings file '{}'", path.display()))?;
    let mut out = BufWriter::new(file);

    for (id, word) in vocab.words.symbols().iter().enumerate() {
        let Some(row) = table.get(id * dim..(id + 1) * dim) else { break };
        let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(out, "{} {}", word, values.join(" "))?;
    }
    out.flush()?;

    tracing::info!("Saved word embeddings to '{}'", path.display());
    Ok(path)
}
