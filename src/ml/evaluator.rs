// ============================================================
// Layer 5 — Evaluator
// ============================================================
// Runs every active head over labeled data and counts correct
// tokens per output index. Index `out_num` is the averaged head:
// the element-wise mean of the active heads' distributions.
//
//   instance ─► predict ─► [head j: probs] ──► argmax ─► tally[j]
//                              │
//                              └─► mean ─► argmax ─► tally[out_num]
//                                            │
//                                            └─► sink (word, gold, pred, conf)
//
// A token counts towards the total whenever it carries a gold
// tag; a gold tag outside the task's label space is never correct.

use anyhow::{Context, Result};
use burn::prelude::*;

use crate::data::conll::DUMMY_TAG;
use crate::domain::instance::LabeledData;
use crate::domain::traits::PredictionSink;
use crate::ml::model::Tagger;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub correct: usize,
    pub total: usize,
}

impl Tally {
    /// Zero when nothing was counted.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Counts per reported output index, plus the distributions of one
/// kept index when requested (sentence → token → tag probabilities).
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub indices: Vec<usize>,
    pub tallies: Vec<Tally>,
    pub distributions: Vec<Vec<Vec<f32>>>,
}

impl Evaluation {
    pub fn tally(&self, index: usize) -> Option<Tally> {
        self.indices.iter().position(|&i| i == index).map(|p| self.tallies[p])
    }

    pub fn accuracies(&self) -> Vec<f64> {
        self.tallies.iter().map(Tally::accuracy).collect()
    }

    /// (head, accuracy) for every real head, the averaged index excluded.
    pub fn head_accuracies(&self, out_num: usize) -> Vec<(usize, f64)> {
        self.indices
            .iter()
            .zip(&self.tallies)
            .filter(|&(&i, _)| i < out_num)
            .map(|(&i, t)| (i, t.accuracy()))
            .collect()
    }

    /// Mean accuracy over the indices that counted anything.
    pub fn mean_accuracy(&self) -> Option<f64> {
        let counted: Vec<f64> = self.tallies.iter().filter(|t| t.total > 0).map(Tally::accuracy).collect();
        if counted.is_empty() {
            None
        } else {
            Some(counted.iter().sum::<f64>() / counted.len() as f64)
        }
    }
}

/// Accuracies as `0.1234` values joined by tabs.
pub fn format_accuracies(accuracies: &[f64]) -> String {
    accuracies.iter().map(|a| format!("{a:.4}")).collect::<Vec<_>>().join("\t")
}

/// Index and value of the largest entry; the first one wins ties.
pub fn argmax(values: &[f32]) -> (usize, f32) {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
}

fn rows<B: Backend>(probs: Tensor<B, 2>) -> Result<Vec<Vec<f32>>> {
    let [_, width] = probs.dims();
    let flat = probs
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("cannot read predictions: {e:?}"))?;
    Ok(flat.chunks(width.max(1)).map(<[f32]>::to_vec).collect())
}

/// Evaluate `tagger` on `data`. Averaged-head predictions go to `sink`;
/// the distributions of output index `keep` are returned when asked for.
pub fn evaluate<B: Backend>(
    tagger: &Tagger<B>,
    data: &LabeledData,
    mut sink: Option<&mut dyn PredictionSink>,
    keep: Option<usize>,
) -> Result<Evaluation> {
    let out_num = tagger.meta.out_num();
    let indices = tagger.meta.reported_indices();
    let mut tallies = vec![Tally::default(); indices.len()];
    let mut distributions = Vec::new();

    for (i, instance) in data.instances.iter().enumerate() {
        let task = data.tasks[i];
        let tags = &tagger.meta.tasks[task].tags;
        let n = instance.len();

        // ── Step 1: per-head distributions ───────────────────────────────────
        let mut per_head: Vec<(usize, Vec<Vec<f32>>)> = Vec::new();
        for (j, probs) in tagger.predict(&instance.words, &instance.chars, task) {
            per_head.push((j, rows(probs).with_context(|| format!("head {j}, sentence {i}"))?));
        }

        // ── Step 2: averaged head ────────────────────────────────────────────
        let k = per_head.len().max(1) as f32;
        let averaged: Vec<Vec<f32>> = (0..n)
            .map(|t| {
                let mut mean = vec![0.0f32; tags.len()];
                for (_, dist) in &per_head {
                    for (m, p) in mean.iter_mut().zip(&dist[t]) {
                        *m += p / k;
                    }
                }
                mean
            })
            .collect();
        per_head.push((out_num, averaged));

        // ── Step 3: tally ────────────────────────────────────────────────────
        let gold_strings = data.gold.get(i);
        for (j, dist) in &per_head {
            let Some(slot) = indices.iter().position(|idx| idx == j) else { continue };
            for (t, token_probs) in dist.iter().enumerate() {
                let has_gold = gold_strings.and_then(|g| g.get(t)).is_some_and(|g| g.as_str() != DUMMY_TAG);
                if !has_gold {
                    continue;
                }
                tallies[slot].total += 1;
                if instance.tags[t] == Some(argmax(token_probs).0) {
                    tallies[slot].correct += 1;
                }
            }
        }

        // ── Step 4: outputs ──────────────────────────────────────────────────
        if let Some(sink) = sink.as_deref_mut() {
            if let Some((_, averaged)) = per_head.last() {
                for (t, token_probs) in averaged.iter().enumerate() {
                    let (pred, confidence) = argmax(token_probs);
                    let word = data.words.get(i).and_then(|w| w.get(t)).map_or("", String::as_str);
                    let gold = gold_strings.and_then(|g| g.get(t)).map(String::as_str).filter(|g| *g != DUMMY_TAG);
                    sink.token(word, gold, tags.symbol(pred).unwrap_or(""), Some(confidence))?;
                }
                sink.end_sentence()?;
            }
        }
        if let Some(keep) = keep {
            if let Some((_, dist)) = per_head.into_iter().find(|(j, _)| *j == keep) {
                distributions.push(dist);
            }
        }
    }

    Ok(Evaluation { indices, tallies, distributions })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_total_accuracy_is_zero() {
        assert_eq!(Tally::default().accuracy(), 0.0);
        assert_eq!(Tally { correct: 3, total: 4 }.accuracy(), 0.75);
    }

    #[test]
    fn test_format_accuracies() {
        assert_eq!(format_accuracies(&[0.5, 0.123456, 1.0]), "0.5000\t0.1235\t1.0000");
    }

    #[test]
    fn test_argmax_first_wins_ties() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), (1, 0.4));
    }

    #[test]
    fn test_mean_skips_empty_indices() {
        let eval = Evaluation {
            indices: vec![0, 1, 2],
            tallies: vec![
                Tally { correct: 1, total: 2 },
                Tally { correct: 0, total: 0 },
                Tally { correct: 2, total: 2 },
            ],
            distributions: vec![],
        };
        assert_eq!(eval.mean_accuracy(), Some(0.75));
        assert_eq!(eval.head_accuracies(2), vec![(0, 0.5), (1, 0.0)]);
        assert_eq!(eval.tally(2), Some(Tally { correct: 2, total: 2 }));
    }
}
