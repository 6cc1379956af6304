// ============================================================
// Layer 6 — Prediction Writer
// ============================================================
// Token-level predictions, one tab-separated line per token and
// a blank line after each sentence:
//
//   word <TAB> gold <TAB> predicted [<TAB> confidence]
//
// In raw mode there is no gold column. Confidence is the largest
// predicted probability, printed with two decimals.

use anyhow::Result;
use std::io::Write;

use crate::domain::traits::PredictionSink;

pub struct TsvPredictions<W: Write> {
    out: W,
    raw: bool,
    with_confidence: bool,
}

impl<W: Write> TsvPredictions<W> {
    pub fn new(out: W, raw: bool, with_confidence: bool) -> Self {
        Self { out, raw, with_confidence }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> PredictionSink for TsvPredictions<W> {
    fn token(&mut self, word: &str, gold: Option<&str>, predicted: &str, confidence: Option<f32>) -> Result<()> {
        let mut fields = vec![word.to_string()];
        if !self.raw {
            fields.push(gold.unwrap_or("").to_string());
        }
        fields.push(predicted.to_string());
        if let (true, Some(c)) = (self.with_confidence, confidence) {
            fields.push(format!("{c:.2}"));
        }
        writeln!(self.out, "{}", fields.join("\t"))?;
        Ok(())
    }

    fn end_sentence(&mut self) -> Result<()> {
        writeln!(self.out)?;
        Ok(())
    }
}
