// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the subcommands `train`, `test`, `ensemble` and
// `norms` and all their configurable flags.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → usize, f64, Activation, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{ArgAction, Args, Subcommand};
use std::path::PathBuf;

use crate::application::{
    ensemble_use_case::{EnsembleConfig, HeadSelection},
    test_use_case::TestConfig,
    train_use_case::TrainConfig,
};
use crate::domain::head_spec::Activation;
use crate::ml::{model::EmbeddingInit, pta::PtaConfig, trainer::OptimizerKind};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a multi-task tagger, optionally evaluating on test files
    Train(TrainArgs),

    /// Evaluate a saved model; test file i is scored as task i
    Test(TestArgs),

    /// Sum the predicted distributions of several saved models
    Ensemble(EnsembleArgs),

    /// Print the output weight norm of every task0 head
    Norms(NormsArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Training files, one per task (task0 first)
    #[arg(long, num_args = 1.., required = true)]
    pub train: Vec<PathBuf>,

    /// Encoder layer (1-based) each task predicts from
    #[arg(long, num_args = 1.., required = true)]
    pub pred_layers: Vec<usize>,

    /// Dev file for task0; if it does not exist 10% of the training data is held out
    #[arg(long)]
    pub dev: Option<PathBuf>,

    /// Test files, one per task
    #[arg(long, num_args = 1..)]
    pub test: Vec<PathBuf>,

    /// Prefix for prediction files
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Prefix for the saved model
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Test files are raw text, one sentence per line
    #[arg(long)]
    pub raw: bool,

    /// Append the prediction confidence to every output line
    #[arg(long)]
    pub output_confidences: bool,

    /// Pre-trained word embeddings (text format)
    #[arg(long)]
    pub embeds: Option<PathBuf>,

    /// Export the trained word embeddings to <prefix>.w.emb
    #[arg(long)]
    pub save_embeds: Option<PathBuf>,

    #[arg(long, default_value_t = 30)]
    pub iters: usize,

    /// Word embedding width
    #[arg(long, default_value_t = 64)]
    pub in_dim: usize,

    /// Character embedding width; 0 disables the character encoder
    #[arg(long, default_value_t = 100)]
    pub c_in_dim: usize,

    #[arg(long, default_value_t = 100)]
    pub h_dim: usize,

    #[arg(long, default_value_t = 1)]
    pub h_layers: usize,

    /// Std of the Gaussian noise added to features during training
    #[arg(long, default_value_t = 0.2)]
    pub sigma: f64,

    /// Activation between stacked encoder layers
    #[arg(long, default_value = "tanh")]
    pub activation: Activation,

    /// Initializer of the embedding tables
    #[arg(long, default_value = "constant")]
    pub initializer: EmbeddingInit,

    /// Heterogeneous head query, e.g. "(tanh 0)x2 (relu 5)x1"
    #[arg(long)]
    pub head_query: Option<String>,

    /// Activation of the default heads (without --head-query)
    #[arg(long, default_value = "rectify")]
    pub head_activation: Activation,

    /// Hidden units of the default heads; 0 means no hidden layer
    #[arg(long, default_value_t = 0)]
    pub mlp: usize,

    /// Number of default heads per task
    #[arg(long, default_value_t = 5)]
    pub output_heads: usize,

    /// Train and predict with this head only
    #[arg(long)]
    pub predict_on_head: Option<usize>,

    /// sgd, momentum, adam or adagrad
    #[arg(long, default_value = "sgd")]
    pub trainer: OptimizerKind,

    /// Overrides the trainer's default learning rate
    #[arg(long)]
    pub learning_rate: Option<f64>,

    #[arg(long, default_value_t = 0.25)]
    pub word_dropout_rate: f64,

    /// Probability of replacing a gold tag with a random one
    #[arg(long, default_value_t = 0.0)]
    pub label_noise: f64,

    /// Stop after this many epochs without dev improvement; 0 disables
    #[arg(long, default_value_t = 0)]
    pub patience: usize,

    #[arg(long, default_value_t = 1)]
    pub minibatch_size: usize,

    #[arg(long)]
    pub max_vocab_size: Option<usize>,

    /// Train on the first 1/x of the training data
    #[arg(long)]
    pub training_cutoff: Option<usize>,

    /// Keep the word embeddings fixed
    #[arg(long)]
    pub disable_backprop_embeds: bool,

    /// Save per-task losses to <model>.losses.json
    #[arg(long)]
    pub log_losses: bool,

    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// PTA I: heads start from independent values (false copies head 0)
    #[arg(long = "pta-i", default_value_t = true, action = ArgAction::Set)]
    pub pta_independent_init: bool,

    /// PTA F: only head 0 of each task is updated
    #[arg(long = "pta-f")]
    pub pta_freeze_followers: bool,

    /// PTA D: initial dropout per head (one value is broadcast)
    #[arg(long = "pta-d", num_args = 1.., default_value = "0")]
    pub pta_dropout: Vec<f64>,

    #[arg(long = "pta-d-lower", default_value_t = 0.0)]
    pub pta_dropout_lower: f64,

    #[arg(long = "pta-d-upper", default_value_t = 0.0)]
    pub pta_dropout_upper: f64,

    /// PTA P: variance of the noise added to non-best output weights
    #[arg(long = "pta-p", default_value_t = 0.0)]
    pub pta_weight_noise: f64,

    /// PTA H: std of the dropout jitter of non-best heads
    #[arg(long = "pta-h", default_value_t = 0.0)]
    pub pta_dropout_jitter: f64,

    /// PTA G: clone the best head into the others at checkpoints
    #[arg(long = "pta-g")]
    pub pta_clone_best: bool,

    /// PTA M: checkpoints per epoch (requires --dev); 0 or negative disables
    #[arg(long = "pta-m", allow_negative_numbers = true)]
    pub pta_checkpoints: Option<i64>,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// This is the boundary between Layer 1 and Layer 2 —
/// the application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            train: a.train,
            pred_layers: a.pred_layers,
            dev: a.dev,
            test: a.test,
            output: a.output,
            model: a.model,
            raw: a.raw,
            output_confidences: a.output_confidences,
            embeds: a.embeds,
            save_embeds: a.save_embeds,
            iters: a.iters,
            in_dim: a.in_dim,
            c_in_dim: a.c_in_dim,
            h_dim: a.h_dim,
            h_layers: a.h_layers,
            sigma: a.sigma,
            encoder_activation: a.activation,
            initializer: a.initializer,
            head_query: a.head_query,
            head_activation: a.head_activation,
            mlp: a.mlp,
            output_heads: a.output_heads,
            predict_on_head: a.predict_on_head,
            trainer: a.trainer,
            learning_rate: a.learning_rate,
            word_dropout_rate: a.word_dropout_rate,
            label_noise: a.label_noise,
            patience: a.patience,
            minibatch_size: a.minibatch_size,
            max_vocab_size: a.max_vocab_size,
            training_cutoff: a.training_cutoff,
            disable_backprop_embeds: a.disable_backprop_embeds,
            log_losses: a.log_losses,
            seed: a.seed,
            pta: PtaConfig {
                independent_init: a.pta_independent_init,
                freeze_followers: a.pta_freeze_followers,
                dropout: a.pta_dropout,
                dropout_lower: a.pta_dropout_lower,
                dropout_upper: a.pta_dropout_upper,
                weight_noise: a.pta_weight_noise,
                dropout_jitter: a.pta_dropout_jitter,
                clone_best: a.pta_clone_best,
                checkpoints_per_epoch: a.pta_checkpoints.filter(|&m| m > 0).and_then(|m| usize::try_from(m).ok()),
            },
        }
    }
}

/// All arguments for the `test` command
#[derive(Args, Debug)]
pub struct TestArgs {
    /// Prefix of the saved model
    #[arg(long)]
    pub model: PathBuf,

    /// Test files, one per task
    #[arg(long, num_args = 1.., required = true)]
    pub test: Vec<PathBuf>,

    #[arg(long)]
    pub raw: bool,

    /// Prefix for prediction files (<output>.task<i>)
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub output_confidences: bool,

    /// Evaluate this head only
    #[arg(long)]
    pub predict_on_head: Option<usize>,
}

impl From<TestArgs> for TestConfig {
    fn from(a: TestArgs) -> Self {
        TestConfig {
            model: a.model,
            test: a.test,
            raw: a.raw,
            output: a.output,
            output_confidences: a.output_confidences,
            predict_on_head: a.predict_on_head,
        }
    }
}

/// All arguments for the `ensemble` command
#[derive(Args, Debug)]
pub struct EnsembleArgs {
    /// Prefixes of the saved models
    #[arg(long, num_args = 1.., required = true)]
    pub models: Vec<PathBuf>,

    /// Test file for task0
    #[arg(long)]
    pub test: PathBuf,

    #[arg(long)]
    pub raw: bool,

    /// Prefix for the prediction file (<output>.ensemble_task0)
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub output_confidences: bool,

    /// Use this head of every model instead of the averaged head
    #[arg(long, conflicts_with = "by_member")]
    pub head: Option<usize>,

    /// Use head i of model i
    #[arg(long)]
    pub by_member: bool,
}

impl From<EnsembleArgs> for EnsembleConfig {
    fn from(a: EnsembleArgs) -> Self {
        let heads = match (a.head, a.by_member) {
            (Some(k), _) => HeadSelection::Fixed(k),
            (None, true) => HeadSelection::ByMember,
            (None, false) => HeadSelection::Averaged,
        };
        EnsembleConfig {
            models: a.models,
            test: a.test,
            raw: a.raw,
            output: a.output,
            output_confidences: a.output_confidences,
            heads,
        }
    }
}

/// All arguments for the `norms` command
#[derive(Args, Debug)]
pub struct NormsArgs {
    /// Prefix of the saved model
    #[arg(long)]
    pub model: PathBuf,
}
