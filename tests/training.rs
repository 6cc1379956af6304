use std::fs;
use std::path::{Path, PathBuf};

use multitask_tagger::application::{
    ensemble_use_case::{EnsembleConfig, EnsembleUseCase, HeadSelection},
    train_use_case::{TrainConfig, TrainUseCase},
};
use multitask_tagger::data::indexer::{index_sentences, FeatureIndexer};
use multitask_tagger::domain::error::TaggerError;
use multitask_tagger::domain::instance::{Corpus, LabeledData, TaggedSentence};
use multitask_tagger::infra::checkpoint::ModelStore;
use multitask_tagger::ml::{
    evaluator::evaluate,
    model::{EmbeddingInit, Tagger, TaggerConfig, TaggerMeta},
    pta::PtaConfig,
    trainer::{train_with, FitOptions, FitSinks, OptimizerKind},
    InferBackend, TrainBackend,
};
use rand::{rngs::StdRng, SeedableRng};

// ─── Fixtures ─────────────────────────────────────────────────────────────────

const DETS: [&str; 2] = ["the", "a"];
const NOUNS: [&str; 4] = ["dog", "cat", "bird", "fish"];
const VERBS: [&str; 3] = ["runs", "sleeps", "sings"];

fn sentences(n: usize, offset: usize) -> Vec<TaggedSentence> {
    (0..n)
        .map(|i| {
            let j = i + offset;
            TaggedSentence::new(
                vec![DETS[j % 2].into(), NOUNS[j % 4].into(), VERBS[j % 3].into()],
                vec!["DET".into(), "NOUN".into(), "VERB".into()],
            )
        })
        .collect()
}

fn conll(sentences: &[TaggedSentence]) -> String {
    sentences
        .iter()
        .map(|s| {
            s.words
                .iter()
                .zip(&s.tags)
                .map(|(w, t)| format!("{w}\t{t}\n"))
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn write_corpus(dir: &Path, name: &str, n: usize, offset: usize) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, conll(&sentences(n, offset))).unwrap();
    path
}

fn small_config(dir: &Path) -> TrainConfig {
    TrainConfig {
        train: vec![write_corpus(dir, "train.conll", 24, 0)],
        pred_layers: vec![1],
        dev: Some(write_corpus(dir, "dev.conll", 6, 1)),
        iters: 2,
        in_dim: 8,
        c_in_dim: 4,
        h_dim: 8,
        output_heads: 2,
        initializer: EmbeddingInit::Glorot,
        ..Default::default()
    }
}

struct Setup {
    tagger: Tagger<TrainBackend>,
    train: LabeledData,
    dev: LabeledData,
}

fn setup(query: &str, pta: PtaConfig) -> Setup {
    let corpus = Corpus::new("train", sentences(20, 0));
    let indexed = FeatureIndexer::new(None, false).index_training(&[corpus], &[1]).unwrap();
    let dev = index_sentences(&indexed.vocab, &indexed.tasks[0], 0, &sentences(6, 2), false);
    let config = TaggerConfig::new(6, 0, 6, 1, vec![1], query.to_string()).with_initializer(EmbeddingInit::Glorot);
    let meta = TaggerMeta::new(indexed.vocab, indexed.tasks, config, pta).unwrap();
    let tagger = Tagger::new(meta, None, &Default::default()).unwrap();
    Setup { tagger, train: indexed.data, dev }
}

fn options(iterations: usize) -> FitOptions {
    FitOptions { iterations, word_dropout_rate: 0.0, ..Default::default() }
}

fn two_task_setup(pta: PtaConfig) -> Setup {
    let pos = Corpus::new("pos", sentences(16, 0));
    let shape = Corpus::new(
        "shape",
        sentences(16, 1)
            .into_iter()
            .map(|s| {
                let tags = s.words.iter().map(|w| String::from(if w.len() > 3 { "LONG" } else { "SHORT" })).collect();
                TaggedSentence::new(s.words, tags)
            })
            .collect(),
    );
    let indexed = FeatureIndexer::new(None, true).index_training(&[pos, shape], &[1, 2]).unwrap();
    let dev = index_sentences(&indexed.vocab, &indexed.tasks[0], 0, &sentences(6, 2), true);
    let config = TaggerConfig::new(6, 3, 6, 2, vec![1, 2], "(tanh 0)x3".to_string())
        .with_initializer(EmbeddingInit::Glorot);
    let meta = TaggerMeta::new(indexed.vocab, indexed.tasks, config, pta).unwrap();
    let tagger = Tagger::new(meta, None, &Default::default()).unwrap();
    Setup { tagger, train: indexed.data, dev }
}

fn task_head_values(tagger: &Tagger<TrainBackend>, task: usize, head: usize) -> (Vec<f32>, Vec<f32>) {
    let output = &tagger.net.tasks[task].heads[head].output;
    let w = output.weight.val().into_data().to_vec::<f32>().unwrap();
    let b = output.bias.as_ref().unwrap().val().into_data().to_vec::<f32>().unwrap();
    (w, b)
}

fn head_values(tagger: &Tagger<TrainBackend>, head: usize) -> (Vec<f32>, Vec<f32>) {
    task_head_values(tagger, 0, head)
}

fn encoder_layer_values(tagger: &Tagger<TrainBackend>, layer: usize) -> Vec<f32> {
    let gate = &tagger.net.encoder.layers[layer].fwd.input_gate.input_transform;
    gate.weight.val().into_data().to_vec::<f32>().unwrap()
}

// ─── Persistence ──────────────────────────────────────────────────────────────

#[test]
fn saved_and_reloaded_model_predicts_identically() {
    let dir = tempfile::tempdir().unwrap();
    let Setup { mut tagger, train, dev } = setup("(tanh 0)x2 (rectify 4)x1", PtaConfig::default());
    let mut rng = StdRng::seed_from_u64(5);
    let report = train_with(OptimizerKind::Sgd, options(2), FitSinks::default(), &mut tagger, &train, Some(&dev), &mut rng)
        .unwrap();

    let before = evaluate(&tagger.valid(), &dev, None, Some(3)).unwrap();
    let store = ModelStore::new(dir.path().join("model"));
    store.save(&tagger.valid(), &report.dropout).unwrap();
    let loaded: Tagger<InferBackend> = store.load(&Default::default()).unwrap();
    let after = evaluate(&loaded, &dev, None, Some(3)).unwrap();

    assert_eq!(before.distributions, after.distributions);
    assert_eq!(before.tallies, after.tallies);
}

// ─── PTA invariants ───────────────────────────────────────────────────────────

#[test]
fn frozen_followers_mirror_initial_head_zero_when_equalized() {
    let pta = PtaConfig { independent_init: false, freeze_followers: true, ..Default::default() };
    let Setup { mut tagger, train, dev } = setup("(tanh 0)x3", pta);
    let initial_head0 = head_values(&tagger, 0);
    let mut rng = StdRng::seed_from_u64(9);
    train_with(OptimizerKind::Sgd, options(2), FitSinks::default(), &mut tagger, &train, Some(&dev), &mut rng).unwrap();

    assert_ne!(head_values(&tagger, 0), initial_head0);
    for follower in 1..3 {
        assert_eq!(head_values(&tagger, follower), initial_head0);
    }
}

#[test]
fn frozen_followers_keep_their_own_values_when_independent() {
    let pta = PtaConfig { independent_init: true, freeze_followers: true, ..Default::default() };
    let Setup { mut tagger, train, dev } = setup("(tanh 0)x2", pta);
    let initial_follower = head_values(&tagger, 1);
    let mut rng = StdRng::seed_from_u64(9);
    train_with(OptimizerKind::Sgd, options(2), FitSinks::default(), &mut tagger, &train, Some(&dev), &mut rng).unwrap();

    assert_eq!(head_values(&tagger, 1), initial_follower);
}

#[test]
fn periodic_jitter_keeps_dropout_within_bounds() {
    let pta = PtaConfig {
        dropout: vec![0.3],
        dropout_lower: 0.1,
        dropout_upper: 0.5,
        dropout_jitter: 0.2,
        checkpoints_per_epoch: Some(4),
        ..Default::default()
    };
    let Setup { mut tagger, train, dev } = setup("(tanh 0)x4", pta);
    let mut rng = StdRng::seed_from_u64(13);
    let report =
        train_with(OptimizerKind::Sgd, options(3), FitSinks::default(), &mut tagger, &train, Some(&dev), &mut rng)
            .unwrap();

    assert_eq!(report.dropout.len(), 4);
    assert!(report.dropout.iter().all(|d| (0.1..0.5).contains(d)));
    assert_eq!(tagger.meta.pta.dropout, report.dropout);
}

#[test]
fn periodic_adaptation_requires_a_dev_set() {
    let pta = PtaConfig { checkpoints_per_epoch: Some(2), ..Default::default() };
    let Setup { mut tagger, train, .. } = setup("(tanh 0)x2", pta);
    let mut rng = StdRng::seed_from_u64(1);
    let err = train_with(OptimizerKind::Sgd, options(1), FitSinks::default(), &mut tagger, &train, None, &mut rng)
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<TaggerError>(), Some(TaggerError::PeriodicAdaptationWithoutDev(2))));
}

#[test]
fn frozen_followers_hold_across_tasks_layers_and_optimizers() {
    for kind in [OptimizerKind::Adam, OptimizerKind::Momentum, OptimizerKind::Adagrad] {
        let pta = PtaConfig { independent_init: false, freeze_followers: true, ..Default::default() };
        let Setup { mut tagger, train, dev } = two_task_setup(pta);
        let initial: Vec<_> = (0..2).map(|task| task_head_values(&tagger, task, 0)).collect();
        let top_layer = encoder_layer_values(&tagger, 1);
        let mut rng = StdRng::seed_from_u64(17);
        let opts = FitOptions { learning_rate: kind.default_learning_rate(), ..options(2) };
        train_with(kind, opts, FitSinks::default(), &mut tagger, &train, Some(&dev), &mut rng).unwrap();

        for (task, initial) in initial.iter().enumerate() {
            assert_ne!(&task_head_values(&tagger, task, 0), initial, "{kind}: task{task} head 0");
            for follower in 1..3 {
                assert_eq!(&task_head_values(&tagger, task, follower), initial, "{kind}: task{task} head {follower}");
            }
        }
        // only task1 reads layer 2, so its updates come from task1 alone
        assert_ne!(encoder_layer_values(&tagger, 1), top_layer, "{kind}");
    }
}

#[test]
fn checkpoint_clones_the_best_head_after_the_update() {
    let pta = PtaConfig {
        freeze_followers: true,
        clone_best: true,
        checkpoints_per_epoch: Some(1),
        ..Default::default()
    };
    let Setup { mut tagger, mut train, dev } = setup("(tanh 0)x3", pta);
    train.truncate(1);
    let mut rng = StdRng::seed_from_u64(3);
    train_with(OptimizerKind::Sgd, options(1), FitSinks::default(), &mut tagger, &train, Some(&dev), &mut rng).unwrap();

    let head0 = head_values(&tagger, 0);
    for follower in 1..3 {
        assert_eq!(head_values(&tagger, follower), head0);
    }
}

// ─── Early stopping ───────────────────────────────────────────────────────────

#[test]
fn early_stopping_halts_patience_epochs_after_the_last_improvement() {
    let Setup { mut tagger, train, dev } = setup("(tanh 0)x2", PtaConfig::default());
    let mut rng = StdRng::seed_from_u64(4);
    // a zero rate keeps the weights fixed, so every epoch after the first ties it
    let opts = FitOptions { patience: 3, learning_rate: 0.0, ..options(10) };
    let report = train_with(OptimizerKind::Sgd, opts, FitSinks::default(), &mut tagger, &train, Some(&dev), &mut rng)
        .unwrap();

    assert!(report.stopped_early);
    assert_eq!(report.best_epoch, Some(1));
    assert_eq!(report.epochs_run, 4);
    assert_eq!(report.dev_accuracies.len(), 4);
    assert!(report.dev_accuracies.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn early_stopping_keeps_and_persists_the_best_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let store = ModelStore::new(dir.path().join("best"));
    let Setup { mut tagger, train, dev } = setup("(tanh 0)x2", PtaConfig::default());
    let mut rng = StdRng::seed_from_u64(21);
    let opts = FitOptions { patience: 2, ..options(12) };
    let sinks = FitSinks { store: Some(&store), metrics: None };
    let report = train_with(OptimizerKind::Adam, opts, sinks, &mut tagger, &train, Some(&dev), &mut rng).unwrap();

    let best_epoch = report.best_epoch.unwrap();
    let mean = |accs: &Vec<f64>| accs.iter().sum::<f64>() / accs.len() as f64;
    let best_score = mean(&report.dev_accuracies[best_epoch - 1]);
    for accs in &report.dev_accuracies {
        assert!(mean(accs) <= best_score);
    }

    let in_memory = evaluate(&tagger.valid(), &dev, None, None).unwrap();
    assert!((in_memory.mean_accuracy().unwrap() - best_score).abs() < 1e-12);
    let persisted: Tagger<InferBackend> = store.load(&Default::default()).unwrap();
    let reloaded = evaluate(&persisted, &dev, None, None).unwrap();
    assert_eq!(reloaded.tallies, in_memory.tallies);
}

// ─── Use cases ────────────────────────────────────────────────────────────────

#[test]
fn task_layer_beyond_encoder_aborts_before_training() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig {
        pred_layers: vec![2],
        model: Some(dir.path().join("never")),
        ..small_config(dir.path())
    };
    let err = TrainUseCase::new(cfg).execute().unwrap_err();
    assert!(matches!(err.downcast_ref::<TaggerError>(), Some(TaggerError::LayerBeyondEncoder { layer: 2, depth: 1, .. })));
    assert!(!dir.path().join("never.mpk.gz").exists());
}

#[test]
fn train_use_case_writes_model_predictions_and_logs() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig {
        test: vec![write_corpus(dir.path(), "test.conll", 4, 3)],
        output: Some(dir.path().join("pred")),
        model: Some(dir.path().join("model")),
        log_losses: true,
        ..small_config(dir.path())
    };
    let outcome = TrainUseCase::new(cfg).execute().unwrap();

    assert_eq!(outcome.report.epochs_run, 2);
    assert_eq!(outcome.tests.len(), 1);
    assert_eq!(outcome.tests[0].evaluation.tally(2).unwrap().total, 12);
    for suffix in ["model.mpk.gz", "model.params.json", "model.losses.json", "model.metrics.csv", "pred.task0"] {
        assert!(dir.path().join(suffix).exists(), "missing {suffix}");
    }
    let predictions = fs::read_to_string(dir.path().join("pred.task0")).unwrap();
    assert_eq!(predictions.lines().filter(|l| !l.is_empty()).count(), 12);
    assert_eq!(predictions.lines().filter(|l| l.is_empty()).count(), 4);
}

#[test]
fn missing_dev_file_holds_out_training_data() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig { dev: Some(dir.path().join("absent.conll")), ..small_config(dir.path()) };
    let outcome = TrainUseCase::new(cfg).execute().unwrap();
    assert_eq!(outcome.report.dev_accuracies.len(), 2);
}

#[test]
fn ensemble_scores_every_test_token() {
    let dir = tempfile::tempdir().unwrap();
    let mut models = Vec::new();
    for seed in [1u64, 2] {
        let prefix = dir.path().join(format!("m{seed}"));
        let cfg = TrainConfig { model: Some(prefix.clone()), seed, ..small_config(dir.path()) };
        TrainUseCase::new(cfg).execute().unwrap();
        models.push(prefix);
    }

    let report = EnsembleUseCase::new(EnsembleConfig {
        models,
        test: write_corpus(dir.path(), "test.conll", 5, 2),
        raw: false,
        output: Some(dir.path().join("pred")),
        output_confidences: true,
        heads: HeadSelection::Averaged,
    })
    .execute()
    .unwrap();

    assert_eq!(report.members, 2);
    assert_eq!(report.tally.total, 15);
    assert!(dir.path().join("pred.ensemble_task0").exists());
}
