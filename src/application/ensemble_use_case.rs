// ============================================================
// Layer 2 — Ensemble Use Case
// ============================================================
// Combines several independently trained models on one task0
// test file:
//
//   Step 1: Load every model                 (Layer 6 - infra)
//   Step 2: Index the test file per model    (Layer 4 - data)
//   Step 3: Keep each model's selected head  (Layer 5 - ml)
//   Step 4: Sum, argmax, score, write
//           <output>.ensemble_task0          (Layer 5 - ml)
//
// Every member must share task0's tag vocabulary; the word
// vocabularies may differ, so the file is indexed per model.

use anyhow::{Context, Result};
use std::{fs, io::BufWriter, path::PathBuf};

use crate::data::{conll::read_corpus, indexer::index_sentences};
use crate::domain::error::TaggerError;
use crate::infra::{
    checkpoint::{with_suffix, ModelStore},
    predictions::TsvPredictions,
};
use crate::ml::{
    ensemble::{combine, write_predictions, EnsembleOutcome},
    evaluator::{evaluate, Tally},
    model::Tagger,
    Device, InferBackend,
};

/// Which output index each member contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadSelection {
    /// The averaged head of every member.
    Averaged,
    /// The same head of every member.
    Fixed(usize),
    /// Head i of member i.
    ByMember,
}

impl HeadSelection {
    fn index_for(self, member: usize, out_num: usize) -> usize {
        match self {
            HeadSelection::Averaged => out_num,
            HeadSelection::Fixed(k) => k,
            HeadSelection::ByMember => member,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    pub models: Vec<PathBuf>,
    pub test: PathBuf,
    pub raw: bool,
    pub output: Option<PathBuf>,
    pub output_confidences: bool,
    pub heads: HeadSelection,
}

#[derive(Debug, Clone)]
pub struct EnsembleReport {
    pub members: usize,
    pub tally: Tally,
    pub outcome: EnsembleOutcome,
}

pub struct EnsembleUseCase {
    config: EnsembleConfig,
}

impl EnsembleUseCase {
    pub fn new(config: EnsembleConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<EnsembleReport> {
        let cfg = &self.config;
        if cfg.models.is_empty() {
            anyhow::bail!("No models to ensemble");
        }
        let device = Device::default();
        let corpus = read_corpus(&cfg.test, cfg.raw)?;

        let mut members = Vec::with_capacity(cfg.models.len());
        let mut gold = None;
        let mut tag_table = None;

        for (m, path) in cfg.models.iter().enumerate() {
            // ── Step 1: load ─────────────────────────────────────────────────
            let mut tagger: Tagger<InferBackend> = ModelStore::new(path)
                .load(&device)
                .with_context(|| format!("Cannot load ensemble member {m}"))?;
            let out_num = tagger.meta.out_num();
            let index = cfg.heads.index_for(m, out_num);
            if index > out_num {
                return Err(TaggerError::HeadOutOfRange { index, out_num }.into());
            }
            if index < out_num {
                tagger.meta.config.predict_on_head = Some(index);
            }

            let Some(task0) = tagger.meta.tasks.first() else {
                anyhow::bail!("Model '{}' has no tasks", path.display());
            };
            match &tag_table {
                None => tag_table = Some(task0.tags.clone()),
                Some(first) if *first != task0.tags => {
                    return Err(TaggerError::ShapeMismatch(format!(
                        "model '{}' has a different task0 tag set than the first member",
                        path.display()
                    ))
                    .into());
                }
                Some(_) => {}
            }

            // ── Step 2: index per model ──────────────────────────────────────
            let data = index_sentences(&tagger.meta.vocab, task0, 0, &corpus.sentences, tagger.meta.use_chars());

            // ── Step 3: keep the selected distributions ──────────────────────
            let evaluation = evaluate(&tagger, &data, None, Some(index))?;
            tracing::info!(
                "Member {} ('{}'), output {}: accuracy {:.4}",
                m,
                path.display(),
                index,
                evaluation.tally(index).unwrap_or_default().accuracy()
            );
            members.push(evaluation.distributions);
            gold.get_or_insert(data);
        }

        // ── Step 4: combine ──────────────────────────────────────────────────
        let (Some(gold), Some(tags)) = (gold, tag_table) else {
            anyhow::bail!("No ensemble members evaluated");
        };
        let outcome = combine(&members, &gold)?;
        tracing::info!(
            "Ensemble of {} models: accuracy {:.4} on {} tokens",
            members.len(),
            outcome.tally.accuracy(),
            outcome.tally.total
        );

        if let Some(prefix) = &cfg.output {
            let out_path = with_suffix(prefix, ".ensemble_task0");
            let file = fs::File::create(&out_path)
                .with_context(|| format!("Cannot create prediction file '{}'", out_path.display()))?;
            let mut sink = TsvPredictions::new(BufWriter::new(file), cfg.raw, cfg.output_confidences);
            write_predictions(&outcome, &gold, &tags, &mut sink)?;
            tracing::info!("Wrote ensemble predictions to '{}'", out_path.display());
        }

        Ok(EnsembleReport { members: members.len(), tally: outcome.tally, outcome })
    }
}
