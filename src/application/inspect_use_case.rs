// ============================================================
// Layer 2 — Inspect Use Case
// ============================================================
// Loads a saved tagger and reports the Frobenius norm of every
// task0 head's output weight matrix.

use anyhow::Result;
use std::path::PathBuf;

use crate::infra::checkpoint::ModelStore;
use crate::ml::{model::Tagger, Device, InferBackend};

pub struct InspectUseCase {
    model: PathBuf,
}

impl InspectUseCase {
    pub fn new(model: impl Into<PathBuf>) -> Self {
        Self { model: model.into() }
    }

    /// One norm per task0 head, in head order.
    pub fn head_norms(&self) -> Result<Vec<f64>> {
        let tagger: Tagger<InferBackend> = ModelStore::new(&self.model).load(&Device::default())?;
        let norms = tagger.head_norms(0);
        tracing::debug!("Head norms of '{}': {:?}", self.model.display(), norms);
        Ok(norms)
    }
}
