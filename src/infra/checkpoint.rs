// ============================================================
// Layer 6 — Model Store
// ============================================================
// Saves and restores a tagger under a filesystem path prefix.
//
// What gets saved:
//   1. <prefix>.mpk.gz      — parameter values (Burn record,
//                             full precision, gzip'd MessagePack)
//   2. <prefix>.params.json — vocabularies, tasks, TaggerConfig,
//                             head specs, PTA settings with the
//                             dropout rates current at save time
//   3. <prefix>.losses.json — per-task loss per epoch (optional)
//   4. <prefix>.run.json    — the run configuration (optional)
//
// The metadata is written next to the weights because the net
// cannot be rebuilt without it: loading first reconstructs the
// architecture from params.json, then loads the record into it.
// Loading fails if the architecture doesn't match the record.

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::ml::model::{Tagger, TaggerMeta, TaggerNet};

type ModelRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

/// Append `suffix` to `prefix` without touching its existing extension.
pub fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// All files belonging to one model share a path prefix.
#[derive(Debug, Clone)]
pub struct ModelStore {
    prefix: PathBuf,
}

impl ModelStore {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn meta_path(&self) -> PathBuf {
        with_suffix(&self.prefix, ".params.json")
    }

    /// The recorder replaces the extension with `mpk.gz`.
    fn record_path(&self) -> PathBuf {
        with_suffix(&self.prefix, ".mpk")
    }

    pub fn weights_path(&self) -> PathBuf {
        with_suffix(&self.prefix, ".mpk.gz")
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.prefix.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create model directory '{}'", parent.display()))?;
        }
        Ok(())
    }

    /// Save weights and metadata. `dropout` holds the current per-head rates.
    pub fn save<B: Backend>(&self, tagger: &Tagger<B>, dropout: &[f64]) -> Result<()> {
        self.ensure_parent()?;

        let mut meta = tagger.meta.clone();
        meta.pta.dropout = dropout.to_vec();
        let json = serde_json::to_string_pretty(&meta)?;
        fs::write(self.meta_path(), json)
            .with_context(|| format!("Cannot write model metadata to '{}'", self.meta_path().display()))?;

        ModelRecorder::new()
            .record(tagger.net.clone().into_record(), self.record_path())
            .with_context(|| format!("Failed to save model weights to '{}'", self.weights_path().display()))?;

        tracing::info!("Saved model to '{}'", self.prefix.display());
        Ok(())
    }

    pub fn load_meta(&self) -> Result<TaggerMeta> {
        let path = self.meta_path();
        let json = fs::read_to_string(&path).with_context(|| {
            format!("Cannot read model metadata '{}'. Have you trained the model first?", path.display())
        })?;
        serde_json::from_str(&json).with_context(|| format!("Invalid model metadata in '{}'", path.display()))
    }

    /// Rebuild the architecture from the metadata, then load the weights into it.
    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<Tagger<B>> {
        let meta = self.load_meta()?;
        let record = ModelRecorder::new()
            .load(self.record_path(), device)
            .with_context(|| format!("Cannot load model weights '{}'", self.weights_path().display()))?;
        let net = TaggerNet::init(&meta, device).load_record(record);

        tracing::info!("Loaded model from '{}'", self.prefix.display());
        Ok(Tagger { net, meta, device: device.clone() })
    }

    /// Per-task losses, one inner list per task with one value per epoch.
    pub fn save_losses(&self, losses: &[Vec<f64>]) -> Result<PathBuf> {
        self.ensure_parent()?;
        let path = with_suffix(&self.prefix, ".losses.json");
        fs::write(&path, serde_json::to_string(losses)?)
            .with_context(|| format!("Cannot write losses to '{}'", path.display()))?;
        tracing::debug!("Saved losses to '{}'", path.display());
        Ok(path)
    }

    pub fn save_run_config<T: Serialize>(&self, cfg: &T) -> Result<()> {
        self.ensure_parent()?;
        let path = with_suffix(&self.prefix, ".run.json");
        fs::write(&path, serde_json::to_string_pretty(cfg)?)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved run config to '{}'", path.display());
        Ok(())
    }
}
