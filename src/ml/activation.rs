// ============================================================
// Layer 5 — Activations
// ============================================================
// Maps the domain Activation enum onto Burn's tensor ops.

use burn::tensor::{activation, backend::Backend, Tensor};

use crate::domain::head_spec::Activation;

pub fn apply<B: Backend, const D: usize>(kind: Activation, x: Tensor<B, D>) -> Tensor<B, D> {
    match kind {
        Activation::Tanh => activation::tanh(x),
        Activation::Rectify => activation::relu(x),
        Activation::Sigmoid => activation::sigmoid(x),
        Activation::Gelu => activation::gelu(x),
        Activation::Linear => x,
    }
}
