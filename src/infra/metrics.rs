// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:      the epoch number (1, 2, 3, ...)
//   - train_loss: total loss / number of tagged tokens
//   - acc_<i>:    dev accuracy of output index i; the last
//                 column is the averaged head
//
// Output file: <model prefix>.metrics.csv
//
// Example CSV output (3 heads):
//   epoch,train_loss,acc_0,acc_1,acc_2,acc_3
//   1,1.204300,0.612000,0.598000,0.605000,0.621000
//   2,0.884100,0.701000,0.694000,0.688000,0.710000
//
// The file is recreated for every run: the accuracy columns
// depend on the number of heads.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, PartialEq)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    pub train_loss: f64,

    /// Dev accuracy per reported output index; empty without a dev set
    pub dev_accuracies: Vec<f64>,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, dev_accuracies: Vec<f64>) -> Self {
        Self { epoch, train_loss, dev_accuracies }
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    /// Full path to the CSV file
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create the CSV with one accuracy column per output index in `indices`.
    pub fn new(csv_path: impl AsRef<Path>, indices: &[usize]) -> Result<Self> {
        let csv_path = csv_path.as_ref().to_path_buf();
        if let Some(dir) = csv_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let mut f = fs::File::create(&csv_path)
            .with_context(|| format!("Cannot create metrics CSV '{}'", csv_path.display()))?;
        let mut header = String::from("epoch,train_loss");
        for i in indices {
            header.push_str(&format!(",acc_{i}"));
        }
        writeln!(f, "{header}")?;
        tracing::debug!("Created metrics CSV: '{}'", csv_path.display());

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;

        let mut row = format!("{},{:.6}", m.epoch, m.train_loss);
        for acc in &m.dev_accuracies {
            row.push_str(&format!(",{acc:.6}"));
        }
        writeln!(f, "{row}")?;

        tracing::debug!("Logged epoch {} metrics: train_loss={:.4}", m.epoch, m.train_loss);
        Ok(())
    }

    /// Return the path to the metrics CSV file
    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}
