// ============================================================
// Layer 5 — Per-Task-Head Adaptation (PTA)
// ============================================================
// Treats the heads of a task as a small population and evolves
// them while the shared encoder trains.
//
// Once, before the first epoch:
//   I = false → copy head 0 into every other head of every task
//   F = true  → exclude heads 1.. of every task from updates
//
// Every len(train)/M steps (M checkpoints per epoch, step 0
// included), on task0's dev accuracies:
//   1. best = argmax head accuracy (first index on ties)
//   2. G → clone best head's weights and dropout into the others
//   3. P → add N(0, P) noise to every other head's output weights
//   4. H → jitter every other head's dropout by N(0, H); keep the
//          new rate only inside [D-Lower, D-Upper)
//
// Dropout rates are the only mutable PTA state. They live in
// AdaptationState, owned by the training loop and passed here.
//
// Limitation: checkpoints only look at task0, whatever the number
// of tasks.

use burn::{module::ParamId, prelude::*};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::domain::error::TaggerError;
use crate::ml::head::OutputHead;
use crate::ml::model::TaggerNet;

/// The task whose heads periodic checkpoints inspect.
pub const ADAPTED_TASK: usize = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PtaConfig {
    /// Heads keep independent initial values; false copies head 0 into the rest.
    #[serde(rename = "I")]
    pub independent_init: bool,
    /// Only head 0 of each task receives updates.
    #[serde(rename = "F")]
    pub freeze_followers: bool,
    /// Initial dropout rate per head; a single value is broadcast.
    #[serde(rename = "D")]
    pub dropout: Vec<f64>,
    #[serde(rename = "D-Lower")]
    pub dropout_lower: f64,
    #[serde(rename = "D-Upper")]
    pub dropout_upper: f64,
    /// Variance of the Gaussian noise added to non-best output weights.
    #[serde(rename = "P")]
    pub weight_noise: f64,
    /// Standard deviation of the dropout jitter.
    #[serde(rename = "H")]
    pub dropout_jitter: f64,
    /// Clone the best head into the others.
    #[serde(rename = "G")]
    pub clone_best: bool,
    /// Checkpoints per epoch; None disables periodic adaptation.
    #[serde(rename = "M")]
    pub checkpoints_per_epoch: Option<usize>,
}

impl Default for PtaConfig {
    fn default() -> Self {
        Self {
            independent_init: true,
            freeze_followers: false,
            dropout: vec![0.0],
            dropout_lower: 0.0,
            dropout_upper: 0.0,
            weight_noise: 0.0,
            dropout_jitter: 0.0,
            clone_best: false,
            checkpoints_per_epoch: None,
        }
    }
}

impl PtaConfig {
    /// Broadcast the dropout list to `out_num` heads and check every rate.
    pub fn resolve(mut self, out_num: usize) -> Result<Self, TaggerError> {
        match self.dropout.len() {
            0 => self.dropout = vec![0.0; out_num],
            1 => self.dropout = vec![self.dropout[0]; out_num],
            n if n == out_num => {}
            found => return Err(TaggerError::DropoutListLength { found, expected: out_num }),
        }
        if let Some(&bad) = self.dropout.iter().find(|d| !(0.0..1.0).contains(*d)) {
            return Err(TaggerError::DropoutOutOfRange(bad));
        }
        if self.dropout_jitter > 0.0 {
            if self.dropout_lower < 0.0 {
                return Err(TaggerError::DropoutOutOfRange(self.dropout_lower));
            }
            if self.dropout_upper > 1.0 {
                return Err(TaggerError::DropoutOutOfRange(self.dropout_upper));
            }
        }
        if self.checkpoints_per_epoch == Some(0) {
            self.checkpoints_per_epoch = None;
        }
        Ok(self)
    }

    /// Steps between checkpoints for `n_train` instances per epoch.
    pub fn checkpoint_interval(&self, n_train: usize) -> Option<usize> {
        self.checkpoints_per_epoch
            .filter(|&m| m > 0)
            .map(|m| (n_train / m).max(1))
    }

    pub fn is_checkpoint(&self, step: usize, n_train: usize) -> bool {
        self.checkpoint_interval(n_train).is_some_and(|k| step % k == 0)
    }
}

/// Per-head dropout rates, rewritten by checkpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationState {
    pub dropout: Vec<f64>,
}

impl AdaptationState {
    pub fn from_config(config: &PtaConfig) -> Self {
        Self { dropout: config.dropout.clone() }
    }
}

/// What a checkpoint did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointOutcome {
    pub best: usize,
    pub cloned: Vec<usize>,
    pub noised: Vec<usize>,
    pub jitter_rejected: Vec<usize>,
}

fn copy_head<B: Backend>(dst: OutputHead<B>, src: &OutputHead<B>, index: usize) -> (OutputHead<B>, bool) {
    match dst.clone().copy_values_from(src) {
        Ok(head) => (head, true),
        Err(e) => {
            tracing::warn!("Not copying into head {}: {}", index, e);
            (dst, false)
        }
    }
}

/// Copy head 0 of every task into that task's other heads.
pub fn equalize_heads<B: Backend>(mut net: TaggerNet<B>) -> TaggerNet<B> {
    for task in net.tasks.iter_mut() {
        let Some(first) = task.heads.first().cloned() else { continue };
        let heads = std::mem::take(&mut task.heads);
        task.heads = heads
            .into_iter()
            .enumerate()
            .map(|(i, head)| if i == 0 { head } else { copy_head(head, &first, i).0 })
            .collect();
    }
    tracing::info!("Copied head 0 into every other head");
    net
}

/// Parameters excluded from updates by `F`.
pub fn frozen_param_ids<B: Backend>(net: &TaggerNet<B>, config: &PtaConfig) -> Vec<ParamId> {
    if !config.freeze_followers {
        return Vec::new();
    }
    let mut ids = Vec::new();
    for (t, task) in net.tasks.iter().enumerate() {
        for h in 1..task.heads.len() {
            ids.extend(net.head_param_ids(t, h));
        }
    }
    ids
}

/// Index of the highest accuracy; the first one wins ties.
pub fn best_head(accuracies: &[(usize, f64)]) -> Option<usize> {
    accuracies
        .iter()
        .fold(None, |best: Option<(usize, f64)>, &(i, acc)| match best {
            Some((_, b)) if b >= acc => best,
            _ => Some((i, acc)),
        })
        .map(|(i, _)| i)
}

/// Run one checkpoint on task0's heads given their dev accuracies
/// (head index, accuracy), averaged head excluded.
pub fn adapt_at_checkpoint<B: Backend, R: Rng + ?Sized>(
    mut net: TaggerNet<B>,
    config: &PtaConfig,
    state: &mut AdaptationState,
    accuracies: &[(usize, f64)],
    rng: &mut R,
    device: &B::Device,
) -> (TaggerNet<B>, CheckpointOutcome) {
    let Some(best) = best_head(accuracies) else {
        return (net, CheckpointOutcome::default());
    };
    let mut outcome = CheckpointOutcome { best, ..Default::default() };
    let Some(task) = net.tasks.get_mut(ADAPTED_TASK) else {
        return (net, outcome);
    };
    let followers: Vec<usize> = (0..task.heads.len()).filter(|&i| i != best).collect();

    // ── Step 1: clone the best head ──────────────────────────────────────────
    if config.clone_best {
        let source = task.heads[best].clone();
        for &i in &followers {
            let (head, copied) = copy_head(task.heads[i].clone(), &source, i);
            task.heads[i] = head;
            if copied {
                state.dropout[i] = state.dropout[best];
                outcome.cloned.push(i);
            }
        }
    }

    // ── Step 2: perturb output weights ───────────────────────────────────────
    if config.weight_noise > 0.0 {
        if let Ok(normal) = Normal::new(0.0, config.weight_noise.sqrt()) {
            for &i in &followers {
                let [rows, cols] = task.heads[i].output_weight_dims();
                let values: Vec<f32> = (0..rows * cols).map(|_| normal.sample(rng) as f32).collect();
                let noise = Tensor::<B, 2>::from_data(TensorData::new(values, [rows, cols]), device);
                task.heads[i] = task.heads[i].clone().perturb_output_weights(noise);
                outcome.noised.push(i);
            }
        }
    }

    // ── Step 3: jitter dropout rates ─────────────────────────────────────────
    if config.dropout_jitter > 0.0 {
        if let Ok(normal) = Normal::new(0.0, config.dropout_jitter) {
            for &i in &followers {
                let proposed = state.dropout[i] + normal.sample(rng);
                if proposed >= config.dropout_upper || proposed < config.dropout_lower {
                    tracing::warn!("Omitting dropout of {:.6} in head {}", proposed, i);
                    outcome.jitter_rejected.push(i);
                    continue;
                }
                state.dropout[i] = proposed;
            }
        }
    }

    tracing::debug!("PTA checkpoint: best head {} ({:?})", best, outcome);
    (net, outcome)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::head_spec::{Activation, HeadSpec};
    use crate::ml::head::TaskHeads;
    use crate::ml::InferBackend;
    use burn::nn::{EmbeddingConfig, Initializer};
    use rand::{rngs::StdRng, SeedableRng};

    type B = InferBackend;

    fn net(n_heads: usize) -> TaggerNet<B> {
        let device = Default::default();
        let spec = HeadSpec { activation: Activation::Tanh, hidden_units: 0 };
        let heads = || TaskHeads { heads: (0..n_heads).map(|_| OutputHead::new(&spec, 4, 3, &device)).collect() };
        TaggerNet {
            word_embeddings: EmbeddingConfig::new(5, 2)
                .with_initializer(Initializer::Uniform { min: -0.5, max: 0.5 })
                .init(&device),
            char_encoder: None,
            encoder: crate::ml::encoder::EncoderStack::new(2, 2, 1, &device),
            tasks: vec![heads(), heads()],
        }
    }

    fn weights(net: &TaggerNet<B>, task: usize, head: usize) -> Vec<f32> {
        net.tasks[task].heads[head].output.weight.val().into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_scalar_dropout_is_broadcast() {
        let cfg = PtaConfig { dropout: vec![0.3], ..Default::default() }.resolve(4).unwrap();
        assert_eq!(cfg.dropout, vec![0.3; 4]);
    }

    #[test]
    fn test_dropout_list_must_match_heads() {
        let err = PtaConfig { dropout: vec![0.1, 0.2], ..Default::default() }.resolve(3).unwrap_err();
        assert!(matches!(err, TaggerError::DropoutListLength { found: 2, expected: 3 }));
    }

    #[test]
    fn test_checkpoint_interval_fires_on_step_zero() {
        let cfg = PtaConfig { checkpoints_per_epoch: Some(4), ..Default::default() };
        assert_eq!(cfg.checkpoint_interval(10), Some(2));
        assert!(cfg.is_checkpoint(0, 10));
        assert!(!cfg.is_checkpoint(3, 10));
        // more checkpoints than instances
        assert_eq!(cfg.checkpoint_interval(2), Some(1));
        assert_eq!(PtaConfig::default().checkpoint_interval(10), None);
    }

    #[test]
    fn test_equalize_copies_head_zero_everywhere() {
        let net = equalize_heads(net(3));
        for t in 0..2 {
            for h in 1..3 {
                assert_eq!(weights(&net, t, h), weights(&net, t, 0));
            }
        }
    }

    #[test]
    fn test_freeze_lists_follower_params_only() {
        let net = net(3);
        let cfg = PtaConfig { freeze_followers: true, ..Default::default() };
        let frozen = frozen_param_ids(&net, &cfg);
        // weight + bias of 2 followers in 2 tasks
        assert_eq!(frozen.len(), 8);
        for id in net.head_param_ids(0, 0) {
            assert!(!frozen.contains(&id));
        }
        assert!(frozen_param_ids(&net, &PtaConfig::default()).is_empty());
    }

    #[test]
    fn test_best_head_prefers_first_on_ties() {
        assert_eq!(best_head(&[(0, 0.5), (1, 0.7), (2, 0.7)]), Some(1));
        assert_eq!(best_head(&[]), None);
    }

    #[test]
    fn test_clone_copies_weights_and_dropout_of_best() {
        let device = Default::default();
        let cfg = PtaConfig { clone_best: true, ..Default::default() }.resolve(3).unwrap();
        let mut state = AdaptationState { dropout: vec![0.1, 0.2, 0.3] };
        let mut rng = StdRng::seed_from_u64(7);
        let (net, outcome) =
            adapt_at_checkpoint(net(3), &cfg, &mut state, &[(0, 0.2), (1, 0.9), (2, 0.4)], &mut rng, &device);
        assert_eq!(outcome.best, 1);
        assert_eq!(outcome.cloned, vec![0, 2]);
        assert_eq!(state.dropout, vec![0.2, 0.2, 0.2]);
        assert_eq!(weights(&net, 0, 0), weights(&net, 0, 1));
        assert_eq!(weights(&net, 0, 2), weights(&net, 0, 1));
        // other tasks are never touched
        assert_ne!(weights(&net, 1, 0), weights(&net, 1, 1));
    }

    #[test]
    fn test_weight_noise_spares_the_best_head() {
        let device = Default::default();
        let cfg = PtaConfig { weight_noise: 0.5, ..Default::default() }.resolve(2).unwrap();
        let mut state = AdaptationState::from_config(&cfg);
        let before = net(2);
        let (w0, w1) = (weights(&before, 0, 0), weights(&before, 0, 1));
        let mut rng = StdRng::seed_from_u64(3);
        let (after, outcome) = adapt_at_checkpoint(before, &cfg, &mut state, &[(0, 0.1), (1, 0.8)], &mut rng, &device);
        assert_eq!(outcome.noised, vec![0]);
        assert_ne!(weights(&after, 0, 0), w0);
        assert_eq!(weights(&after, 0, 1), w1);
    }

    #[test]
    fn test_jittered_dropout_stays_in_bounds_or_unchanged() {
        let device = Default::default();
        let cfg = PtaConfig {
            dropout: vec![0.3],
            dropout_lower: 0.2,
            dropout_upper: 0.4,
            dropout_jitter: 0.1,
            ..Default::default()
        }
        .resolve(4)
        .unwrap();
        let mut state = AdaptationState::from_config(&cfg);
        let mut rng = StdRng::seed_from_u64(11);
        let mut tagger_net = net(4);
        for _ in 0..200 {
            let before = state.dropout.clone();
            let (n, _) = adapt_at_checkpoint(
                tagger_net,
                &cfg,
                &mut state,
                &[(0, 0.9), (1, 0.1), (2, 0.1), (3, 0.1)],
                &mut rng,
                &device,
            );
            tagger_net = n;
            for (old, new) in before.iter().zip(&state.dropout) {
                assert!(old == new || (0.2..0.4).contains(new));
            }
            assert_eq!(state.dropout[0], 0.3);
        }
    }
}
