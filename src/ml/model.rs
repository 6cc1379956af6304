// ============================================================
// Layer 5 — Tagger Model
// ============================================================
// The full network and everything needed to rebuild it.
//
//   TaggerConfig — hyperparameters (Burn Config, saved as JSON)
//   TaggerMeta   — config + vocabularies + tasks + parsed heads +
//                  PTA settings; validated once, at construction
//   TaggerNet    — the parameter tree (Burn Module):
//
//       word ids ─► word Embedding ─┐
//       char ids ─► CharEncoder ────┴─► concat ─► EncoderStack
//                                                      │ tap at task layer
//                                                      ▼
//                                         task heads[0..out_num] ─► logits
//
//   Tagger       — net + meta + device; the public entry point
//
// Every parameter lives in one module tree and is addressed by a
// stable ParamId. Heads own their parameters; the embeddings and
// encoder are shared by every head of every task and receive the
// sum of their gradients.

use std::{fmt, str::FromStr};

use burn::{
    module::{list_param_ids, AutodiffModule, ParamId},
    nn::{Embedding, EmbeddingConfig, Initializer},
    prelude::*,
    tensor::{activation::softmax, backend::AutodiffBackend, Distribution},
};
use serde::{Deserialize, Serialize};

use crate::data::embeddings::PretrainedEmbeddings;
use crate::domain::error::TaggerError;
use crate::domain::head_spec::{Activation, HeadQuery};
use crate::domain::vocab::{Task, Vocabulary};
use crate::ml::encoder::{CharEncoder, EncoderStack};
use crate::ml::head::{overwrite_param, OutputHead, TaskHeads};
use crate::ml::pta::PtaConfig;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Initial values of the word and character embedding tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingInit {
    Constant,
    Glorot,
    Normal,
    Uniform,
}

impl EmbeddingInit {
    pub const ALL: [EmbeddingInit; 4] =
        [EmbeddingInit::Constant, EmbeddingInit::Glorot, EmbeddingInit::Normal, EmbeddingInit::Uniform];

    /// Initializer of a `[rows, dim]` table. Glorot draws from
    /// `±sqrt(6 / (rows + dim))`; `EmbeddingConfig` supplies no fan-in.
    pub fn initializer(self, rows: usize, dim: usize) -> Initializer {
        match self {
            EmbeddingInit::Constant => Initializer::Constant { value: 0.01 },
            EmbeddingInit::Glorot => {
                let bound = (6.0 / (rows + dim).max(1) as f64).sqrt();
                Initializer::Uniform { min: -bound, max: bound }
            }
            EmbeddingInit::Normal => Initializer::Normal { mean: 0.0, std: 1.0 },
            EmbeddingInit::Uniform => Initializer::Uniform { min: -0.1, max: 0.1 },
        }
    }
}

impl FromStr for EmbeddingInit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constant" => Ok(EmbeddingInit::Constant),
            "glorot" | "xavier" => Ok(EmbeddingInit::Glorot),
            "normal" => Ok(EmbeddingInit::Normal),
            "uniform" => Ok(EmbeddingInit::Uniform),
            other => Err(format!("unknown initializer '{other}' (constant, glorot, normal, uniform)")),
        }
    }
}

impl fmt::Display for EmbeddingInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmbeddingInit::Constant => "constant",
            EmbeddingInit::Glorot => "glorot",
            EmbeddingInit::Normal => "normal",
            EmbeddingInit::Uniform => "uniform",
        };
        f.write_str(name)
    }
}

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct TaggerConfig {
    /// Word embedding width.
    pub in_dim: usize,
    /// Character embedding width; 0 disables the character encoder.
    pub c_in_dim: usize,
    pub h_dim: usize,
    pub h_layers: usize,
    /// 1-based encoder layer each task reads from, in task order.
    pub pred_layers: Vec<usize>,
    pub head_query: String,
    /// Applied between stacked encoder layers.
    #[config(default = "Activation::Tanh")]
    pub activation: Activation,
    #[config(default = 0.2)]
    pub noise_sigma: f64,
    #[config(default = "EmbeddingInit::Constant")]
    pub initializer: EmbeddingInit,
    /// Restrict prediction (and training) to this head.
    pub predict_on_head: Option<usize>,
}

// ─── Metadata ─────────────────────────────────────────────────────────────────

/// Everything besides parameter values needed to rebuild a tagger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggerMeta {
    pub vocab: Vocabulary,
    pub tasks: Vec<Task>,
    pub config: TaggerConfig,
    pub heads: HeadQuery,
    pub pta: PtaConfig,
}

impl TaggerMeta {
    /// Validate the architecture against the tasks. All configuration errors
    /// surface here, before any parameter is allocated.
    pub fn new(vocab: Vocabulary, tasks: Vec<Task>, config: TaggerConfig, pta: PtaConfig) -> Result<Self, TaggerError> {
        let heads = HeadQuery::parse(&config.head_query)?;
        tracing::info!("Output layers query: {}", heads.as_str());

        if config.pred_layers.len() != tasks.len() {
            return Err(TaggerError::TaskLayerCount { layers: config.pred_layers.len(), tasks: tasks.len() });
        }
        for task in &tasks {
            if task.layer == 0 || task.layer > config.h_layers {
                return Err(TaggerError::LayerBeyondEncoder {
                    task: task.id.clone(),
                    layer: task.layer,
                    depth: config.h_layers,
                });
            }
        }
        if let Some(index) = config.predict_on_head {
            if index >= heads.head_count() {
                return Err(TaggerError::HeadOutOfRange { index, out_num: heads.head_count() });
            }
        }
        let pta = pta.resolve(heads.head_count())?;

        Ok(Self { vocab, tasks, config, heads, pta })
    }

    /// Heads per task.
    pub fn out_num(&self) -> usize {
        self.heads.head_count()
    }

    pub fn use_chars(&self) -> bool {
        self.config.c_in_dim > 0
    }

    /// Heads that produce predictions and losses.
    pub fn active_heads(&self) -> Vec<usize> {
        match self.config.predict_on_head {
            Some(k) => vec![k],
            None => (0..self.out_num()).collect(),
        }
    }

    /// Output indices reported by evaluation; `out_num` is the averaged head.
    pub fn reported_indices(&self) -> Vec<usize> {
        let mut indices = self.active_heads();
        indices.push(self.out_num());
        indices
    }

    pub fn task_index(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    fn features_dim(&self) -> usize {
        if self.use_chars() {
            self.config.in_dim + 2 * self.config.c_in_dim
        } else {
            self.config.in_dim
        }
    }
}

// ─── Network ──────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct TaggerNet<B: Backend> {
    pub word_embeddings: Embedding<B>,
    pub char_encoder: Option<CharEncoder<B>>,
    pub encoder: EncoderStack<B>,
    pub tasks: Vec<TaskHeads<B>>,
}

/// Training mode enables feature noise and per-head dropout.
#[derive(Debug, Clone, Copy)]
pub enum Mode<'a> {
    Train { dropout: &'a [f64] },
    Eval,
}

fn with_noise<B: Backend>(x: Tensor<B, 2>, sigma: f64) -> Tensor<B, 2> {
    let noise = Tensor::random(x.shape(), Distribution::Normal(0.0, sigma), &x.device());
    x + noise
}

impl<B: Backend> TaggerNet<B> {
    pub fn init(meta: &TaggerMeta, device: &B::Device) -> Self {
        let cfg = &meta.config;
        let (num_words, num_chars) = (meta.vocab.words.len(), meta.vocab.chars.len());

        let word_embeddings = EmbeddingConfig::new(num_words, cfg.in_dim)
            .with_initializer(cfg.initializer.initializer(num_words, cfg.in_dim))
            .init(device);
        let char_encoder = meta.use_chars().then(|| {
            CharEncoder::new(num_chars, cfg.c_in_dim, cfg.initializer.initializer(num_chars, cfg.c_in_dim), device)
        });
        let encoder = EncoderStack::new(meta.features_dim(), cfg.h_dim, cfg.h_layers, device);

        let tasks = meta
            .tasks
            .iter()
            .map(|task| TaskHeads {
                heads: meta
                    .heads
                    .heads()
                    .iter()
                    .map(|spec| OutputHead::new(spec, 2 * cfg.h_dim, task.num_tags(), device))
                    .collect(),
            })
            .collect();

        Self { word_embeddings, char_encoder, encoder, tasks }
    }

    /// Logits [seq, num_tags] of every active head of `task`, tagged with the head index.
    pub fn forward(
        &self,
        meta: &TaggerMeta,
        words: &[usize],
        chars: &[Vec<usize>],
        task: usize,
        mode: Mode<'_>,
        device: &B::Device,
    ) -> Vec<(usize, Tensor<B, 2>)> {
        let train = matches!(mode, Mode::Train { .. });
        let sigma = meta.config.noise_sigma;
        let n = words.len();

        // ── Step 1: token features ───────────────────────────────────────────
        let ids: Vec<i64> = words.iter().map(|&w| w as i64).collect();
        let ids = Tensor::<B, 2, Int>::from_data(TensorData::new(ids, [1, n]), device);
        let mut features = self.word_embeddings.forward(ids).squeeze::<2>(0);
        if let Some(char_encoder) = &self.char_encoder {
            features = Tensor::cat(vec![features, char_encoder.forward(chars, device)], 1);
        }
        if train && sigma > 0.0 {
            features = with_noise(features, sigma);
        }

        // ── Step 2: shared encoder, tapped at the task's layer ───────────────
        let mut tapped = self.encoder.forward(features, meta.config.activation, meta.tasks[task].layer);
        if train && sigma > 0.0 {
            tapped = with_noise(tapped, sigma);
        }

        // ── Step 3: heads ────────────────────────────────────────────────────
        let specs = meta.heads.heads();
        meta.active_heads()
            .into_iter()
            .map(|j| {
                let dropout = match mode {
                    Mode::Train { dropout } => dropout.get(j).copied(),
                    Mode::Eval => None,
                };
                (j, self.tasks[task].heads[j].forward(tapped.clone(), &specs[j], dropout))
            })
            .collect()
    }

    pub fn head_param_ids(&self, task: usize, head: usize) -> Vec<ParamId> {
        list_param_ids(&self.tasks[task].heads[head])
    }

    pub fn word_embedding_param_ids(&self) -> Vec<ParamId> {
        list_param_ids(&self.word_embeddings)
    }

    /// Word embedding table, row-major [num_words, in_dim].
    pub fn word_vectors(&self) -> Result<Vec<f32>, TaggerError> {
        self.word_embeddings
            .weight
            .val()
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| TaggerError::ShapeMismatch(format!("{e:?}")))
    }

    /// Replace the word embedding table with `table` (row-major, same shape).
    pub fn with_word_vectors(mut self, table: Vec<f32>, device: &B::Device) -> Result<Self, TaggerError> {
        let [rows, dim] = self.word_embeddings.weight.dims();
        if table.len() != rows * dim {
            return Err(TaggerError::ShapeMismatch(format!(
                "word table of {} values for a [{rows}, {dim}] embedding",
                table.len()
            )));
        }
        let value = Tensor::<B, 2>::from_data(TensorData::new(table, [rows, dim]), device);
        self.word_embeddings.weight = overwrite_param(self.word_embeddings.weight, value);
        Ok(self)
    }
}

// ─── Tagger ───────────────────────────────────────────────────────────────────

/// A network together with its metadata and device.
#[derive(Debug, Clone)]
pub struct Tagger<B: Backend> {
    pub net: TaggerNet<B>,
    pub meta: TaggerMeta,
    pub device: B::Device,
}

impl<B: Backend> Tagger<B> {
    /// Build a freshly initialised tagger, seeding word rows from
    /// `pretrained` when given.
    pub fn new(meta: TaggerMeta, pretrained: Option<&PretrainedEmbeddings>, device: &B::Device) -> Result<Self, TaggerError> {
        let mut net = TaggerNet::init(&meta, device);
        if let Some(pretrained) = pretrained {
            if pretrained.dim != meta.config.in_dim {
                return Err(TaggerError::EmbeddingDimMismatch { found: pretrained.dim, expected: meta.config.in_dim });
            }
            let mut table = net.word_vectors()?;
            pretrained.initialise_rows(&meta.vocab, &mut table);
            net = net.with_word_vectors(table, device)?;
        }
        tracing::info!(
            "Built tagger: {} tasks, {} heads each, {} encoder layers, {} words, {} chars",
            meta.tasks.len(),
            meta.out_num(),
            meta.config.h_layers,
            meta.vocab.words.len(),
            meta.vocab.chars.len(),
        );
        Ok(Self { net, meta, device: device.clone() })
    }

    /// Per-token tag distributions of every active head, in evaluation mode.
    pub fn predict(&self, words: &[usize], chars: &[Vec<usize>], task: usize) -> Vec<(usize, Tensor<B, 2>)> {
        self.net
            .forward(&self.meta, words, chars, task, Mode::Eval, &self.device)
            .into_iter()
            .map(|(j, logits)| (j, softmax(logits, 1)))
            .collect()
    }

    /// Frobenius norms of the output weight matrices of `task`'s heads.
    pub fn head_norms(&self, task: usize) -> Vec<f64> {
        self.net.tasks[task].heads.iter().map(OutputHead::output_norm).collect()
    }
}

impl<B: AutodiffBackend> Tagger<B> {
    /// Same weights on the inner backend: no autodiff graph, no dropout.
    pub fn valid(&self) -> Tagger<B::InnerBackend> {
        Tagger { net: self.net.valid(), meta: self.meta.clone(), device: self.device.clone() }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::InferBackend;

    type B = InferBackend;

    fn meta(query: &str, layers: Vec<usize>, h_layers: usize, c_in_dim: usize) -> Result<TaggerMeta, TaggerError> {
        let mut vocab = Vocabulary::new();
        for w in ["the", "dog", "runs"] {
            vocab.words.get_or_insert(w);
        }
        for c in ["t", "h", "e"] {
            vocab.chars.get_or_insert(c);
        }
        let tasks: Vec<Task> = layers
            .iter()
            .enumerate()
            .map(|(i, &layer)| {
                let mut t = Task::new(i, layer);
                for tag in ["DET", "NOUN", "VERB"] {
                    t.tags.get_or_insert(tag);
                }
                t
            })
            .collect();
        let config = TaggerConfig::new(4, c_in_dim, 6, h_layers, layers, query.to_string())
            .with_initializer(EmbeddingInit::Glorot);
        TaggerMeta::new(vocab, tasks, config, PtaConfig::default())
    }

    #[test]
    fn test_layer_beyond_depth_is_rejected_at_construction() {
        let err = meta("(tanh 0)x2", vec![1, 3], 2, 0).unwrap_err();
        assert!(matches!(err, TaggerError::LayerBeyondEncoder { layer: 3, depth: 2, .. }));
    }

    #[test]
    fn test_invalid_query_is_rejected_at_construction() {
        assert!(matches!(meta("tanh 0 x2", vec![1], 1, 0), Err(TaggerError::InvalidHeadQuery { .. })));
    }

    #[test]
    fn test_predict_returns_one_distribution_per_head() {
        let device = Default::default();
        let meta = meta("(tanh 0)x2 (relu 5)x1", vec![1], 1, 3).unwrap();
        let tagger = Tagger::<B>::new(meta, None, &device).unwrap();
        let chars = vec![vec![1, 3, 4, 5, 2], vec![1, 0, 2]];
        let out = tagger.predict(&[1, 2], &chars, 0);
        assert_eq!(out.len(), 3);
        for (_, probs) in out {
            assert_eq!(probs.dims(), [2, 3]);
            let sums = probs.sum_dim(1).into_data().to_vec::<f32>().unwrap();
            assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-4));
        }
    }

    #[test]
    fn test_single_head_restriction() {
        let device = Default::default();
        let mut meta = meta("(tanh 0)x3", vec![1], 1, 0).unwrap();
        meta.config.predict_on_head = Some(2);
        assert_eq!(meta.reported_indices(), vec![2, 3]);
        let tagger = Tagger::<B>::new(meta, None, &device).unwrap();
        let out = tagger.predict(&[1, 2, 3], &[], 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, 2);
    }

    #[test]
    fn test_every_initializer_builds_a_usable_tagger() {
        let device = Default::default();
        for init in EmbeddingInit::ALL {
            let mut meta = meta("(tanh 0)x2", vec![1], 1, 3).unwrap();
            meta.config.initializer = init;
            let tagger = Tagger::<B>::new(meta, None, &device).unwrap();
            let table = tagger.net.word_vectors().unwrap();
            assert!(table.iter().all(|v| v.is_finite()), "{init}");
            let out = tagger.predict(&[1, 2], &[vec![1, 3, 2], vec![1, 4, 5, 2]], 0);
            assert_eq!(out.len(), 2, "{init}");
        }
    }

    #[test]
    fn test_glorot_bound_follows_table_shape() {
        match EmbeddingInit::Glorot.initializer(10, 14) {
            Initializer::Uniform { min, max } => {
                assert!((max - 0.5).abs() < 1e-12);
                assert_eq!(min, -max);
            }
            other => panic!("unexpected initializer {other:?}"),
        }
    }

    #[test]
    fn test_pretrained_rows_are_copied() {
        let device = Default::default();
        let meta = meta("(tanh 0)x1", vec![1], 1, 0).unwrap();
        let emb = PretrainedEmbeddings::parse("dog 1 2 3 4\n");
        let tagger = Tagger::<B>::new(meta, Some(&emb), &device).unwrap();
        let table = tagger.net.word_vectors().unwrap();
        assert_eq!(&table[8..12], &[1.0, 2.0, 3.0, 4.0]);
    }
}
