// ============================================================
// Layer 5 — Training Loop
// ============================================================
// On-line training: one forward/backward pass and one optimizer
// step per instance, in a freshly shuffled order every epoch.
//
//   for epoch in 1..=iterations:
//     shuffle
//     for each instance (step s):
//       PTA checkpoint every len/M steps (s = 0 included)
//       word dropout → label noise → forward (train mode)
//       loss = Σ_heads Σ_tokens −log p(gold) → backward → step
//     dev evaluation → metrics row → early-stopping check
//
// Each step builds its own autodiff graph; backward() consumes it
// and the next step starts from the updated parameters.
//
// Key Burn insight:
//   - Training uses an AutodiffBackend for gradients
//   - tagger.valid() runs on the inner backend, so dev evaluation
//     never records a graph and dropout is disabled
//   - GradientsParams::from_params keeps only the gradients of the
//     listed ParamIds, which is how frozen heads and frozen word
//     embeddings are excluded from updates
//
// Reference: Burn Book §5 (Custom Training Loop)

use std::{
    collections::{HashMap, HashSet},
    fmt,
    str::FromStr,
};

use anyhow::Result;
use burn::{
    module::list_param_ids,
    optim::{momentum::MomentumConfig, AdaGradConfig, AdamConfig, GradientsParams, Optimizer, SgdConfig},
    prelude::*,
    tensor::{activation::log_softmax, backend::AutodiffBackend},
};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

use crate::domain::error::TaggerError;
use crate::domain::instance::{Instance, LabeledData};
use crate::infra::checkpoint::ModelStore;
use crate::infra::metrics::{EpochMetrics, MetricsLogger};
use crate::ml::evaluator::{evaluate, format_accuracies};
use crate::ml::model::{Mode, Tagger, TaggerNet};
use crate::ml::pta::{self, AdaptationState, ADAPTED_TASK};

/// Training hyperparameters that do not shape the network.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    pub iterations: usize,
    pub learning_rate: f64,
    /// α in the keep probability c / (α + c) of a word seen c times.
    pub word_dropout_rate: f64,
    /// Probability of replacing a gold tag with a uniformly drawn one.
    pub label_noise: f64,
    /// Epochs without dev improvement before stopping; 0 disables.
    pub patience: usize,
    pub minibatch_size: usize,
    pub update_word_embeddings: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            iterations: 30,
            learning_rate: 0.1,
            word_dropout_rate: 0.25,
            label_noise: 0.0,
            patience: 0,
            minibatch_size: 1,
            update_word_embeddings: true,
        }
    }
}

/// What happened during `fit`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitReport {
    pub epochs_run: usize,
    /// Total loss / tagged tokens, per epoch.
    pub epoch_losses: Vec<f64>,
    /// [task][epoch] average loss.
    pub task_losses: Vec<Vec<f64>>,
    /// Dev accuracy per reported output index, per epoch.
    pub dev_accuracies: Vec<Vec<f64>>,
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
    /// Per-head dropout rates the tagger ended with.
    pub dropout: Vec<f64>,
}

// ─── Early stopping ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    Improved,
    NoImprovement,
    Stop,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    best_epoch: Option<usize>,
    stale: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self { patience, best: None, best_epoch: None, stale: 0 }
    }

    /// Record an epoch's dev score. Improvement must be strict.
    pub fn observe(&mut self, epoch: usize, score: f64) -> StopDecision {
        if self.best.map_or(true, |best| score > best) {
            self.best = Some(score);
            self.best_epoch = Some(epoch);
            self.stale = 0;
            return StopDecision::Improved;
        }
        self.stale += 1;
        if self.patience > 0 && self.stale >= self.patience {
            StopDecision::Stop
        } else {
            StopDecision::NoImprovement
        }
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

// ─── Regularisers ─────────────────────────────────────────────────────────────

/// Replace each word by the unknown id unless a draw falls under c / (α + c).
pub fn drop_words<R: Rng + ?Sized>(words: &[usize], counts: &HashMap<usize, usize>, alpha: f64, rng: &mut R) -> Vec<usize> {
    if alpha <= 0.0 {
        return words.to_vec();
    }
    words
        .iter()
        .map(|&w| {
            let c = counts.get(&w).copied().unwrap_or(0) as f64;
            if rng.gen::<f64>() > c / (alpha + c) {
                0
            } else {
                w
            }
        })
        .collect()
}

/// Replace each gold tag with a uniform draw from `num_tags` with probability `p`.
pub fn add_label_noise<R: Rng + ?Sized>(tags: &[Option<usize>], num_tags: usize, p: f64, rng: &mut R) -> Vec<Option<usize>> {
    if p <= 0.0 || num_tags == 0 {
        return tags.to_vec();
    }
    tags.iter()
        .map(|tag| match tag {
            Some(_) if rng.gen::<f64>() < p => Some(rng.gen_range(0..num_tags)),
            other => *other,
        })
        .collect()
}

/// Negative log-likelihood of the gold tags, summed over tokens.
/// Tokens without a gold tag contribute nothing.
pub fn sequence_nll<B: Backend>(logits: Tensor<B, 2>, gold: &[Option<usize>], device: &B::Device) -> Tensor<B, 1> {
    let [n, k] = logits.dims();
    let mut mask = vec![0.0f32; n * k];
    for (t, tag) in gold.iter().enumerate().take(n) {
        if let Some(tag) = tag.filter(|&tag| tag < k) {
            mask[t * k + tag] = 1.0;
        }
    }
    let mask = Tensor::<B, 2>::from_data(TensorData::new(mask, [n, k]), device);
    (log_softmax(logits, 1) * mask).sum().neg()
}

fn word_counts(data: &LabeledData) -> HashMap<usize, usize> {
    let mut counts = HashMap::new();
    for instance in &data.instances {
        for &w in &instance.words {
            *counts.entry(w).or_insert(0) += 1;
        }
    }
    counts
}

// ─── Trainer ──────────────────────────────────────────────────────────────────

pub struct Trainer<'a, O> {
    options: FitOptions,
    optim: O,
    store: Option<&'a ModelStore>,
    metrics: Option<MetricsLogger>,
}

impl<'a, O> Trainer<'a, O> {
    pub fn new(options: FitOptions, optim: O) -> Self {
        Self { options, optim, store: None, metrics: None }
    }

    /// Persist the tagger here on every dev improvement.
    pub fn with_store(mut self, store: &'a ModelStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsLogger) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_sinks(mut self, sinks: FitSinks<'a>) -> Self {
        self.store = sinks.store;
        self.metrics = sinks.metrics;
        self
    }

    /// Train `tagger` in place on `train`, evaluating on `dev` (task0) after
    /// every epoch and at PTA checkpoints.
    pub fn fit<B, R>(
        &mut self,
        tagger: &mut Tagger<B>,
        train: &LabeledData,
        dev: Option<&LabeledData>,
        rng: &mut R,
    ) -> Result<FitReport>
    where
        B: AutodiffBackend,
        O: Optimizer<TaggerNet<B>, B>,
        R: Rng + ?Sized,
    {
        let opts = self.options.clone();
        let pta_cfg = tagger.meta.pta.clone();
        let out_num = tagger.meta.out_num();
        let num_tasks = tagger.meta.tasks.len();

        // ── Step 1: configuration checks ─────────────────────────────────────
        if opts.minibatch_size > 1 {
            return Err(TaggerError::MinibatchUnsupported(opts.minibatch_size).into());
        }
        if let (Some(m), None) = (pta_cfg.checkpoints_per_epoch, dev) {
            return Err(TaggerError::PeriodicAdaptationWithoutDev(m).into());
        }
        if opts.patience > 0 && dev.is_none() {
            return Err(TaggerError::PatienceWithoutDev.into());
        }
        if train.is_empty() {
            return Err(TaggerError::EmptyCorpus("training data".to_string()).into());
        }
        let dev_task0 = dev.map(|d| d.for_task(ADAPTED_TASK));

        // ── Step 2: head initialisation and frozen parameters ────────────────
        if !pta_cfg.independent_init {
            tagger.net = pta::equalize_heads(tagger.net.clone());
        }
        let mut frozen: HashSet<_> = pta::frozen_param_ids(&tagger.net, &pta_cfg).into_iter().collect();
        if !opts.update_word_embeddings {
            frozen.extend(tagger.net.word_embedding_param_ids());
        }
        let trainable: Vec<_> = list_param_ids(&tagger.net).into_iter().filter(|id| !frozen.contains(id)).collect();
        tracing::info!("{} frozen parameters, {} trainable", frozen.len(), trainable.len());

        let counts = word_counts(train);
        let mut state = AdaptationState::from_config(&pta_cfg);
        let mut stopping = EarlyStopping::new(opts.patience);
        let mut best: Option<(TaggerNet<B>, Vec<f64>)> = None;
        let mut report = FitReport { task_losses: vec![Vec::new(); num_tasks], ..Default::default() };
        let mut order: Vec<usize> = (0..train.len()).collect();

        tracing::info!("Training for {} iterations on {} instances", opts.iterations, train.len());

        // ── Step 3: epochs ───────────────────────────────────────────────────
        for epoch in 1..=opts.iterations {
            order.shuffle(rng);
            let mut total_loss = 0.0f64;
            let mut total_tagged = 0usize;
            let mut task_loss = vec![0.0f64; num_tasks];
            let mut task_tagged = vec![0usize; num_tasks];

            for (step, &idx) in order.iter().enumerate() {
                let task = train.tasks[idx];
                if let Some(value) = self.step(tagger, &train.instances[idx], task, &counts, &state, &trainable, rng) {
                    let tagged = train.instances[idx].len();
                    total_loss += value;
                    total_tagged += tagged;
                    task_loss[task] += value;
                    task_tagged[task] += tagged;
                }

                // checkpoints follow the update of instance `step`
                if let Some(dev0) = dev_task0.as_ref().filter(|_| pta_cfg.is_checkpoint(step, train.len())) {
                    let eval = evaluate(&tagger.valid(), dev0, None, None)?;
                    let accuracies = eval.head_accuracies(out_num);
                    let (net, outcome) = pta::adapt_at_checkpoint(
                        tagger.net.clone(),
                        &pta_cfg,
                        &mut state,
                        &accuracies,
                        rng,
                        &tagger.device,
                    );
                    tagger.net = net;
                    tracing::debug!("Checkpoint at step {}: best head {}", step, outcome.best);
                }
            }

            let epoch_loss = total_loss / total_tagged.max(1) as f64;
            tracing::info!("iter {} {:.4}", epoch, epoch_loss);
            report.epoch_losses.push(epoch_loss);
            for (t, losses) in report.task_losses.iter_mut().enumerate() {
                losses.push(task_loss[t] / task_tagged[t].max(1) as f64);
            }
            report.epochs_run = epoch;

            // ── Step 4: dev evaluation and early stopping ────────────────────
            let Some(dev) = dev else {
                if let Some(metrics) = &self.metrics {
                    metrics.log(&EpochMetrics::new(epoch, epoch_loss, Vec::new()))?;
                }
                continue;
            };
            let eval = evaluate(&tagger.valid(), dev, None, None)?;
            let accuracies = eval.accuracies();
            tracing::info!("dev accuracy\t{}", format_accuracies(&accuracies));
            if let Some(metrics) = &self.metrics {
                metrics.log(&EpochMetrics::new(epoch, epoch_loss, accuracies.clone()))?;
            }
            report.dev_accuracies.push(accuracies);

            if opts.patience == 0 {
                continue;
            }
            let score = eval.mean_accuracy().unwrap_or(0.0);
            match stopping.observe(epoch, score) {
                StopDecision::Improved => {
                    tracing::info!("Dev accuracy improved to {:.4} at epoch {}", score, epoch);
                    best = Some((tagger.net.clone(), state.dropout.clone()));
                    if let Some(store) = self.store {
                        store.save(&tagger.valid(), &state.dropout)?;
                    }
                }
                StopDecision::NoImprovement => {
                    tracing::debug!("No improvement at epoch {} ({:.4})", epoch, score);
                }
                StopDecision::Stop => {
                    tracing::info!("Early stopping at epoch {} (best epoch {:?})", epoch, stopping.best_epoch());
                    report.stopped_early = true;
                    break;
                }
            }
        }

        // ── Step 5: keep the best epoch ──────────────────────────────────────
        if let Some((net, dropout)) = best {
            tagger.net = net;
            state.dropout = dropout;
        }
        report.best_epoch = stopping.best_epoch();
        tagger.meta.pta.dropout = state.dropout.clone();
        report.dropout = state.dropout;
        tracing::info!("Training complete after {} epochs", report.epochs_run);
        Ok(report)
    }

    /// One forward/backward/update on a single instance. Returns the mean
    /// head loss, or None when the instance carries no gold tag.
    #[allow(clippy::too_many_arguments)]
    fn step<B, R>(
        &mut self,
        tagger: &mut Tagger<B>,
        instance: &Instance,
        task: usize,
        counts: &HashMap<usize, usize>,
        state: &AdaptationState,
        trainable: &[burn::module::ParamId],
        rng: &mut R,
    ) -> Option<f64>
    where
        B: AutodiffBackend,
        O: Optimizer<TaggerNet<B>, B>,
        R: Rng + ?Sized,
    {
        let words = drop_words(&instance.words, counts, self.options.word_dropout_rate, rng);
        let num_tags = tagger.meta.tasks[task].num_tags();
        let gold = add_label_noise(&instance.tags, num_tags, self.options.label_noise, rng);
        if gold.iter().all(Option::is_none) {
            return None;
        }

        let outputs = tagger.net.forward(
            &tagger.meta,
            &words,
            &instance.chars,
            task,
            Mode::Train { dropout: &state.dropout },
            &tagger.device,
        );
        let heads = outputs.len().max(1) as f64;
        let loss = outputs
            .into_iter()
            .map(|(_, logits)| sequence_nll(logits, &gold, &tagger.device))
            .reduce(|a, b| a + b)?;
        let value = loss.clone().into_scalar().elem::<f64>();

        let mut grads = loss.backward();
        let grads = GradientsParams::from_params(&mut grads, &tagger.net, trainable);
        tagger.net = self.optim.step(self.options.learning_rate, tagger.net.clone(), grads);

        Some(value / heads)
    }
}

// ─── Optimizer selection ──────────────────────────────────────────────────────

/// Update rule used by `train_with`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    Momentum,
    Adam,
    Adagrad,
}

impl OptimizerKind {
    pub fn default_learning_rate(self) -> f64 {
        match self {
            OptimizerKind::Sgd => 0.1,
            OptimizerKind::Momentum => 0.01,
            OptimizerKind::Adam => 0.001,
            OptimizerKind::Adagrad => 0.1,
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sgd" => Ok(OptimizerKind::Sgd),
            "momentum" => Ok(OptimizerKind::Momentum),
            "adam" => Ok(OptimizerKind::Adam),
            "adagrad" => Ok(OptimizerKind::Adagrad),
            other => Err(format!("unknown trainer '{other}' (sgd, momentum, adam, adagrad)")),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::Momentum => "momentum",
            OptimizerKind::Adam => "adam",
            OptimizerKind::Adagrad => "adagrad",
        };
        f.write_str(name)
    }
}

/// Outputs written while training.
#[derive(Default)]
pub struct FitSinks<'a> {
    pub store: Option<&'a ModelStore>,
    pub metrics: Option<MetricsLogger>,
}

/// Build the optimizer for `kind` and run `fit`.
pub fn train_with<B, R>(
    kind: OptimizerKind,
    options: FitOptions,
    sinks: FitSinks<'_>,
    tagger: &mut Tagger<B>,
    train: &LabeledData,
    dev: Option<&LabeledData>,
    rng: &mut R,
) -> Result<FitReport>
where
    B: AutodiffBackend,
    R: Rng + ?Sized,
{
    tracing::info!("Using {} with learning rate {}", kind, options.learning_rate);
    match kind {
        OptimizerKind::Sgd => {
            let optim = SgdConfig::new().init::<B, TaggerNet<B>>();
            Trainer::new(options, optim).with_sinks(sinks).fit(tagger, train, dev, rng)
        }
        OptimizerKind::Momentum => {
            let optim = SgdConfig::new()
                .with_momentum(Some(MomentumConfig::new()))
                .init::<B, TaggerNet<B>>();
            Trainer::new(options, optim).with_sinks(sinks).fit(tagger, train, dev, rng)
        }
        OptimizerKind::Adam => {
            let optim = AdamConfig::new().init::<B, TaggerNet<B>>();
            Trainer::new(options, optim).with_sinks(sinks).fit(tagger, train, dev, rng)
        }
        OptimizerKind::Adagrad => {
            let optim = AdaGradConfig::new().init::<B, TaggerNet<B>>();
            Trainer::new(options, optim).with_sinks(sinks).fit(tagger, train, dev, rng)
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::InferBackend;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_stops_after_patience_plateau() {
        let mut stopping = EarlyStopping::new(2);
        let scores = [0.1, 0.2, 0.3, 0.3, 0.25, 0.9];
        let mut stopped_at = None;
        for (i, &s) in scores.iter().enumerate() {
            if stopping.observe(i + 1, s) == StopDecision::Stop {
                stopped_at = Some(i + 1);
                break;
            }
        }
        assert_eq!(stopped_at, Some(5));
        assert_eq!(stopping.best_epoch(), Some(3));
    }

    #[test]
    fn test_equal_score_is_not_an_improvement() {
        let mut stopping = EarlyStopping::new(5);
        assert_eq!(stopping.observe(1, 0.5), StopDecision::Improved);
        assert_eq!(stopping.observe(2, 0.5), StopDecision::NoImprovement);
    }

    #[test]
    fn test_word_dropout_spares_frequent_words() {
        let mut rng = StdRng::seed_from_u64(1);
        let counts = HashMap::from([(5, 1_000_000), (6, 1)]);
        let mut dropped_rare = 0;
        for _ in 0..200 {
            let out = drop_words(&[5, 6], &counts, 0.25, &mut rng);
            assert_eq!(out[0], 5);
            if out[1] == 0 {
                dropped_rare += 1;
            }
        }
        // keep probability of the rare word is 0.8
        assert!(dropped_rare > 10 && dropped_rare < 80);
        assert_eq!(drop_words(&[6], &counts, 0.0, &mut rng), vec![6]);
    }

    #[test]
    fn test_label_noise_keeps_missing_gold() {
        let mut rng = StdRng::seed_from_u64(2);
        let noisy = add_label_noise(&[None, Some(1), None], 4, 1.0, &mut rng);
        assert_eq!(noisy[0], None);
        assert!(noisy[1].is_some_and(|t| t < 4));
        assert_eq!(add_label_noise(&[Some(3)], 4, 0.0, &mut rng), vec![Some(3)]);
    }

    #[test]
    fn test_optimizer_names_and_rates() {
        assert_eq!("momentum".parse::<OptimizerKind>().unwrap(), OptimizerKind::Momentum);
        assert_eq!(OptimizerKind::Adam.default_learning_rate(), 0.001);
        assert!("rmsprop".parse::<OptimizerKind>().is_err());
    }

    #[test]
    fn test_nll_of_uniform_logits() {
        let device = Default::default();
        let logits = Tensor::<InferBackend, 2>::zeros([2, 4], &device);
        let loss = sequence_nll(logits, &[Some(0), None], &device).into_scalar().elem::<f64>();
        assert!((loss - 4f64.ln()).abs() < 1e-5);
    }
}
