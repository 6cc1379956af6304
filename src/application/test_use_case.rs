// ============================================================
// Layer 2 — Test Use Case
// ============================================================
// Loads a saved tagger and evaluates test file i as task i:
//
//   Step 1: Load model + metadata           (Layer 6 - infra)
//   Step 2: Read and index each test file   (Layer 4 - data)
//   Step 3: Evaluate, writing predictions
//           to <output>.task<i>             (Layer 5 - ml)

use anyhow::{Context, Result};
use std::{
    fs,
    io::BufWriter,
    path::{Path, PathBuf},
};

use crate::data::{conll::read_corpus, indexer::index_sentences};
use crate::domain::error::TaggerError;
use crate::infra::{
    checkpoint::{with_suffix, ModelStore},
    predictions::TsvPredictions,
};
use crate::ml::{
    evaluator::{evaluate, format_accuracies, Evaluation},
    model::Tagger,
    Device, InferBackend,
};

/// Result of evaluating one test file.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub task: usize,
    pub path: PathBuf,
    pub sentences: usize,
    pub evaluation: Evaluation,
}

/// Evaluate `files[i]` as task `i`. With `output`, predictions of
/// task `i` go to `<output>.task<i>`.
pub fn evaluate_test_files(
    tagger: &Tagger<InferBackend>,
    files: &[PathBuf],
    raw: bool,
    output: Option<&Path>,
    with_confidence: bool,
) -> Result<Vec<TestReport>> {
    let mut reports = Vec::with_capacity(files.len());

    for (i, path) in files.iter().enumerate() {
        let Some(task) = tagger.meta.tasks.get(i) else {
            anyhow::bail!("Test file '{}' has no task {} in a model with {} tasks", path.display(), i, tagger.meta.tasks.len());
        };
        let corpus = read_corpus(path, raw)?;
        let data = index_sentences(&tagger.meta.vocab, task, i, &corpus.sentences, tagger.meta.use_chars());

        let evaluation = match output {
            Some(prefix) => {
                let out_path = with_suffix(prefix, &format!(".task{i}"));
                let file = fs::File::create(&out_path)
                    .with_context(|| format!("Cannot create prediction file '{}'", out_path.display()))?;
                let mut sink = TsvPredictions::new(BufWriter::new(file), raw, with_confidence);
                let evaluation = evaluate(tagger, &data, Some(&mut sink), None)?;
                tracing::info!("Wrote predictions to '{}'", out_path.display());
                evaluation
            }
            None => evaluate(tagger, &data, None, None)?,
        };

        tracing::info!(
            "Task{} test accuracy on {} items: {}",
            i,
            data.len(),
            format_accuracies(&evaluation.accuracies())
        );
        reports.push(TestReport { task: i, path: path.clone(), sentences: data.len(), evaluation });
    }

    Ok(reports)
}

#[derive(Debug, Clone)]
pub struct TestConfig {
    pub model: PathBuf,
    pub test: Vec<PathBuf>,
    pub raw: bool,
    pub output: Option<PathBuf>,
    pub output_confidences: bool,
    /// Evaluate a single head instead of the one the model was saved with.
    pub predict_on_head: Option<usize>,
}

pub struct TestUseCase {
    config: TestConfig,
}

impl TestUseCase {
    pub fn new(config: TestConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<Vec<TestReport>> {
        let cfg = &self.config;
        let mut tagger: Tagger<InferBackend> = ModelStore::new(&cfg.model).load(&Device::default())?;

        if let Some(index) = cfg.predict_on_head {
            if index >= tagger.meta.out_num() {
                return Err(TaggerError::HeadOutOfRange { index, out_num: tagger.meta.out_num() }.into());
            }
            tagger.meta.config.predict_on_head = Some(index);
        }

        evaluate_test_files(&tagger, &cfg.test, cfg.raw, cfg.output.as_deref(), cfg.output_confidences)
    }
}
