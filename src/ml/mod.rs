// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// This layer contains ALL Burn framework specific code.
// No other layer imports from burn directly — only this one
// (and infra, which persists the records it produces).
//
// What's in this layer:
//
//   activation.rs — domain Activation → tensor op
//   encoder.rs    — char BiLSTM and the stacked BiLSTM encoder
//   head.rs       — one output head; head-to-head value copies
//   model.rs      — TaggerConfig, TaggerMeta, TaggerNet, Tagger
//   pta.rs        — per-task-head adaptation (I/F/D/P/H/G/M)
//   trainer.rs    — the per-instance training loop
//   evaluator.rs  — per-head and averaged-head accuracy
//   ensemble.rs   — summing distributions across models
//
// Backends:
//   TrainBackend = Autodiff<NdArray>  (gradients)
//   InferBackend = NdArray            (evaluation, loading)

pub mod activation;
pub mod encoder;
pub mod ensemble;
pub mod evaluator;
pub mod head;
pub mod model;
pub mod pta;
pub mod trainer;

pub type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray>;
pub type InferBackend = burn::backend::NdArray;
pub type Device = burn::backend::ndarray::NdArrayDevice;

/// Seed the backend RNG (initialisation, dropout masks, feature noise).
pub fn seed_backend(seed: u64) {
    use burn::tensor::backend::Backend;
    TrainBackend::seed(seed);
}
