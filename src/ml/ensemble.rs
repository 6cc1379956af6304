// ============================================================
// Layer 5 — Cross-Model Ensembling
// ============================================================
// Sums per-token distributions predicted by independently trained
// models for the same sentences, then takes the argmax:
//
//   model a: sentence → token → probs ─┐
//   model b: sentence → token → probs ─┼─► Σ ─► argmax ─► prediction
//   model c: sentence → token → probs ─┘
//
// Distinct from the averaged head, which mixes the heads of a
// single model.

use anyhow::Result;

use crate::data::conll::DUMMY_TAG;
use crate::domain::error::TaggerError;
use crate::domain::instance::LabeledData;
use crate::domain::traits::PredictionSink;
use crate::domain::vocab::SymbolTable;
use crate::ml::evaluator::{argmax, Tally};

/// Sentence → token → tag probabilities.
pub type Distributions = Vec<Vec<Vec<f32>>>;

#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleOutcome {
    /// Summed distributions.
    pub summed: Distributions,
    /// Argmax tag id per token.
    pub predictions: Vec<Vec<usize>>,
    pub tally: Tally,
}

fn same_shape(a: &Distributions, b: &Distributions) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(sa, sb)| sa.len() == sb.len() && sa.iter().zip(sb).all(|(x, y)| x.len() == y.len()))
}

/// Element-wise sum of every member's distributions.
pub fn sum_distributions(members: &[Distributions]) -> Result<Distributions, TaggerError> {
    let Some((first, rest)) = members.split_first() else {
        return Err(TaggerError::ShapeMismatch("no ensemble members".to_string()));
    };
    let mut summed = first.clone();
    for (m, member) in rest.iter().enumerate() {
        if !same_shape(&summed, member) {
            return Err(TaggerError::ShapeMismatch(format!(
                "ensemble member {} predicted differently shaped output than member 0",
                m + 1
            )));
        }
        for (sentence, other) in summed.iter_mut().zip(member) {
            for (token, probs) in sentence.iter_mut().zip(other) {
                for (acc, p) in token.iter_mut().zip(probs) {
                    *acc += p;
                }
            }
        }
    }
    Ok(summed)
}

/// Sum, predict and score against `data`'s gold tags.
pub fn combine(members: &[Distributions], data: &LabeledData) -> Result<EnsembleOutcome, TaggerError> {
    let summed = sum_distributions(members)?;
    if summed.len() != data.len() {
        return Err(TaggerError::ShapeMismatch(format!(
            "{} predicted sentences for {} gold sentences",
            summed.len(),
            data.len()
        )));
    }

    let mut tally = Tally::default();
    let predictions: Vec<Vec<usize>> = summed
        .iter()
        .zip(&data.instances)
        .zip(&data.gold)
        .map(|((sentence, instance), gold)| {
            sentence
                .iter()
                .enumerate()
                .map(|(t, probs)| {
                    let pred = argmax(probs).0;
                    if gold.get(t).is_some_and(|g| g.as_str() != DUMMY_TAG) {
                        tally.total += 1;
                        if instance.tags.get(t).copied().flatten() == Some(pred) {
                            tally.correct += 1;
                        }
                    }
                    pred
                })
                .collect()
        })
        .collect();

    Ok(EnsembleOutcome { summed, predictions, tally })
}

/// Write ensemble predictions, one token per line.
pub fn write_predictions(
    outcome: &EnsembleOutcome,
    data: &LabeledData,
    tags: &SymbolTable,
    sink: &mut dyn PredictionSink,
) -> Result<()> {
    for (i, sentence) in outcome.predictions.iter().enumerate() {
        for (t, &pred) in sentence.iter().enumerate() {
            let word = data.words[i].get(t).map_or("", String::as_str);
            let gold = data.gold[i].get(t).map(String::as_str).filter(|g| *g != DUMMY_TAG);
            let confidence = outcome.summed[i][t].get(pred).copied();
            sink.token(word, gold, tags.symbol(pred).unwrap_or(""), confidence)?;
        }
        sink.end_sentence()?;
    }
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instance::{Instance, TaggedSentence};

    fn gold(tags: &[Option<usize>]) -> LabeledData {
        let n = tags.len();
        let mut data = LabeledData::default();
        data.push(
            Instance { words: vec![0; n], chars: vec![], tags: tags.to_vec() },
            0,
            TaggedSentence::new(vec!["w".into(); n], vec!["T".into(); n]),
        );
        data
    }

    #[test]
    fn test_sum_overrules_single_member() {
        let a = vec![vec![vec![0.6, 0.4], vec![0.1, 0.9]]];
        let b = vec![vec![vec![0.1, 0.9], vec![0.2, 0.8]]];
        let c = vec![vec![vec![0.2, 0.8], vec![0.3, 0.7]]];
        let outcome = combine(&[a, b, c], &gold(&[Some(1), Some(1)])).unwrap();
        assert_eq!(outcome.predictions, vec![vec![1, 1]]);
        assert_eq!(outcome.tally, Tally { correct: 2, total: 2 });
    }

    #[test]
    fn test_shape_mismatch_is_reported() {
        let a = vec![vec![vec![0.5, 0.5]]];
        let b = vec![vec![vec![0.5, 0.5], vec![0.5, 0.5]]];
        assert!(matches!(sum_distributions(&[a, b]), Err(TaggerError::ShapeMismatch(_))));
        assert!(sum_distributions(&[]).is_err());
    }

    #[test]
    fn test_unknown_gold_is_counted_wrong() {
        let a = vec![vec![vec![0.9, 0.1]]];
        let outcome = combine(&[a], &gold(&[None])).unwrap();
        assert_eq!(outcome.tally, Tally { correct: 0, total: 1 });
    }
}
