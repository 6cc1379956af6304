// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Read the training corpora          (Layer 4 - data)
//   Step 2: Index words, chars and tags        (Layer 4 - data)
//   Step 3: Apply the training cutoff          (Layer 3 - domain)
//   Step 4: Extend the vocabulary from
//           pre-trained embeddings             (Layer 4 - data)
//   Step 5: Read or hold out the dev set       (Layer 4 - data)
//   Step 6: Build and validate the tagger      (Layer 5 - ml)
//   Step 7: Save the run config                (Layer 6 - infra)
//   Step 8: Run the training loop              (Layer 5 - ml)
//   Step 9: Save, reload, export embeddings,
//           evaluate on test files             (Layers 5, 6)

use anyhow::{Context, Result};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::application::test_use_case::{evaluate_test_files, TestReport};
use crate::data::{
    conll::read_corpus,
    embeddings::{save_word_vectors, PretrainedEmbeddings},
    indexer::{index_sentences, FeatureIndexer},
    splitter::split_held_out,
};
use crate::domain::head_spec::Activation;
use crate::domain::instance::LabeledData;
use crate::infra::{
    checkpoint::{with_suffix, ModelStore},
    metrics::MetricsLogger,
};
use crate::ml::{
    model::{EmbeddingInit, Tagger, TaggerConfig, TaggerMeta},
    pta::PtaConfig,
    seed_backend,
    trainer::{train_with, FitOptions, FitReport, FitSinks, OptimizerKind},
    Device, InferBackend, TrainBackend,
};

/// Share of the training data held out when the dev file is missing.
const HELD_OUT_SHARE: f64 = 0.1;

// ─── Training Configuration ──────────────────────────────────────────────────
// All settings of a training run. Serialisable so it can be saved
// next to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// One training file per task, task0 first.
    pub train: Vec<PathBuf>,
    /// Encoder layer (1-based) each task reads from.
    pub pred_layers: Vec<usize>,
    pub dev: Option<PathBuf>,
    pub test: Vec<PathBuf>,
    /// Prefix of prediction files.
    pub output: Option<PathBuf>,
    /// Prefix of the saved model files.
    pub model: Option<PathBuf>,
    pub raw: bool,
    pub output_confidences: bool,
    pub embeds: Option<PathBuf>,
    pub save_embeds: Option<PathBuf>,

    pub iters: usize,
    pub in_dim: usize,
    pub c_in_dim: usize,
    pub h_dim: usize,
    pub h_layers: usize,
    pub sigma: f64,
    pub encoder_activation: Activation,
    pub initializer: EmbeddingInit,

    /// Explicit head query; when absent `output_heads` identical heads
    /// of `head_activation` with `mlp` hidden units are built.
    pub head_query: Option<String>,
    pub head_activation: Activation,
    pub mlp: usize,
    pub output_heads: usize,
    pub predict_on_head: Option<usize>,

    pub trainer: OptimizerKind,
    /// Overrides the trainer's default rate when positive.
    pub learning_rate: Option<f64>,
    pub word_dropout_rate: f64,
    pub label_noise: f64,
    pub patience: usize,
    pub minibatch_size: usize,
    pub max_vocab_size: Option<usize>,
    /// Keep only the first len/x training instances.
    pub training_cutoff: Option<usize>,
    pub disable_backprop_embeds: bool,
    pub log_losses: bool,
    pub seed: u64,

    pub pta: PtaConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train: Vec::new(),
            pred_layers: Vec::new(),
            dev: None,
            test: Vec::new(),
            output: None,
            model: None,
            raw: false,
            output_confidences: false,
            embeds: None,
            save_embeds: None,
            iters: 30,
            in_dim: 64,
            c_in_dim: 100,
            h_dim: 100,
            h_layers: 1,
            sigma: 0.2,
            encoder_activation: Activation::Tanh,
            initializer: EmbeddingInit::Constant,
            head_query: None,
            head_activation: Activation::Rectify,
            mlp: 0,
            output_heads: 5,
            predict_on_head: None,
            trainer: OptimizerKind::Sgd,
            learning_rate: None,
            word_dropout_rate: 0.25,
            label_noise: 0.0,
            patience: 0,
            minibatch_size: 1,
            max_vocab_size: None,
            training_cutoff: None,
            disable_backprop_embeds: false,
            log_losses: false,
            seed: 1,
            pta: PtaConfig::default(),
        }
    }
}

impl TrainConfig {
    /// The explicit query, or `output_heads` copies of the default head.
    pub fn resolved_head_query(&self) -> String {
        self.head_query
            .clone()
            .unwrap_or_else(|| format!("({} {})x{}", self.head_activation, self.mlp, self.output_heads))
    }

    pub fn resolved_learning_rate(&self) -> f64 {
        self.learning_rate
            .filter(|&lr| lr > 0.0)
            .unwrap_or_else(|| self.trainer.default_learning_rate())
    }

    fn fit_options(&self) -> FitOptions {
        FitOptions {
            iterations: self.iters,
            learning_rate: self.resolved_learning_rate(),
            word_dropout_rate: self.word_dropout_rate,
            label_noise: self.label_noise,
            patience: self.patience,
            minibatch_size: self.minibatch_size,
            update_word_embeddings: !self.disable_backprop_embeds,
        }
    }
}

/// Everything a training run produced.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub report: FitReport,
    pub tests: Vec<TestReport>,
    pub tagger: Tagger<InferBackend>,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainOutcome> {
        let cfg = &self.config;
        let device = Device::default();
        seed_backend(cfg.seed);
        let mut rng = StdRng::seed_from_u64(cfg.seed);

        // ── Step 1: Read the training corpora ────────────────────────────────
        if cfg.train.is_empty() {
            anyhow::bail!("No training files given");
        }
        let corpora = cfg
            .train
            .iter()
            .map(|path| read_corpus(path, false))
            .collect::<Result<Vec<_>>>()?;

        // ── Step 2: Index ────────────────────────────────────────────────────
        let use_chars = cfg.c_in_dim > 0;
        let indexed = FeatureIndexer::new(cfg.max_vocab_size, use_chars).index_training(&corpora, &cfg.pred_layers)?;
        let mut vocab = indexed.vocab;
        let tasks = indexed.tasks;
        let mut train = indexed.data;

        // ── Step 3: Training cutoff ──────────────────────────────────────────
        if let Some(x) = cfg.training_cutoff.filter(|&x| x > 1) {
            let keep = train.len() / x;
            train.truncate(keep);
            tracing::info!("Training cutoff 1/{}: using {} instances", x, train.len());
        }

        // ── Step 4: Pre-trained embeddings ───────────────────────────────────
        let embeddings = match &cfg.embeds {
            Some(path) => {
                let emb = PretrainedEmbeddings::load(path, cfg.in_dim)?;
                let added = emb.extend_vocabulary(&mut vocab);
                tracing::info!("Added {} words from the embeddings to the vocabulary", added);
                Some(emb)
            }
            None => None,
        };

        // ── Step 5: Dev set ──────────────────────────────────────────────────
        let dev: Option<LabeledData> = match &cfg.dev {
            Some(path) if path.exists() => {
                let corpus = read_corpus(path, false)?;
                Some(index_sentences(&vocab, &tasks[0], 0, &corpus.sentences, use_chars))
            }
            Some(path) => {
                tracing::warn!(
                    "Dev file '{}' not found, holding out {:.0}% of the training data",
                    path.display(),
                    HELD_OUT_SHARE * 100.0
                );
                let (kept, held) = split_held_out(train.into_rows(), HELD_OUT_SHARE, &mut rng);
                train = LabeledData::from_rows(kept);
                Some(LabeledData::from_rows(held))
            }
            None => None,
        };

        // ── Step 6: Build the tagger ─────────────────────────────────────────
        let model_cfg = TaggerConfig::new(
            cfg.in_dim,
            cfg.c_in_dim,
            cfg.h_dim,
            cfg.h_layers,
            cfg.pred_layers.clone(),
            cfg.resolved_head_query(),
        )
        .with_activation(cfg.encoder_activation)
        .with_noise_sigma(cfg.sigma)
        .with_initializer(cfg.initializer)
        .with_predict_on_head(cfg.predict_on_head);
        let meta = TaggerMeta::new(vocab, tasks, model_cfg, cfg.pta.clone())?;
        let mut tagger = Tagger::<TrainBackend>::new(meta, embeddings.as_ref(), &device)?;

        // ── Step 7: Save the run config ──────────────────────────────────────
        let store = cfg.model.as_ref().map(ModelStore::new);
        let metrics = match (&store, &dev) {
            (Some(store), Some(_)) => Some(MetricsLogger::new(
                with_suffix(store.prefix(), ".metrics.csv"),
                &tagger.meta.reported_indices(),
            )?),
            _ => None,
        };
        if let Some(store) = &store {
            store.save_run_config(cfg)?;
        }

        // ── Step 8: Train ────────────────────────────────────────────────────
        let sinks = FitSinks { store: store.as_ref(), metrics };
        let report = train_with(cfg.trainer, cfg.fit_options(), sinks, &mut tagger, &train, dev.as_ref(), &mut rng)?;

        // ── Step 9: Save, reload, export, test ───────────────────────────────
        let trained = match &store {
            Some(store) => {
                store.save(&tagger.valid(), &report.dropout)?;
                if cfg.log_losses {
                    store.save_losses(&report.task_losses)?;
                }
                store.load::<InferBackend>(&device)?
            }
            None => tagger.valid(),
        };

        if let Some(prefix) = &cfg.save_embeds {
            let table = trained.net.word_vectors()?;
            save_word_vectors(prefix, &trained.meta.vocab, &table, cfg.in_dim)
                .with_context(|| format!("Cannot export embeddings to '{}'", prefix.display()))?;
        }

        let tests = evaluate_test_files(&trained, &cfg.test, cfg.raw, cfg.output.as_deref(), cfg.output_confidences)?;

        Ok(TrainOutcome { report, tests, tagger: trained })
    }
}
