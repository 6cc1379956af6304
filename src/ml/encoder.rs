// ============================================================
// Layer 5 — Recurrent Encoders
// ============================================================
// Two LSTM-based encoders shared by every task:
//
//   CharEncoder  — bidirectional LSTM over the characters of each
//                  word (wrapped in <w> … </w>); a word is
//                  represented by the forward state after the last
//                  char and the backward state at the first char
//
//   EncoderStack — h_layers bidirectional LSTM layers over the
//                  sentence; each layer keeps a separate forward
//                  and backward stream:
//
//       features ──┬─► fwd LSTM ─► (act) ─► fwd LSTM ─► ...
//                  └─► bwd LSTM ─► (act) ─► bwd LSTM ─► ...
//
// The activation is applied to the outputs of layers 2..h_layers
// only. A task tapping layer k reads concat(fwd_k, bwd_k) per
// token, with the backward stream aligned to token order.
//
// Shapes: Burn's Lstm is batch-first, [batch, seq, d]. A sentence
// is encoded as a batch of one.

use burn::{
    nn::{Embedding, EmbeddingConfig, Initializer, Lstm, LstmConfig},
    prelude::*,
};

use crate::domain::head_spec::Activation;
use crate::ml::activation;

/// Reverse the rows of a [seq, d] tensor.
pub fn reverse_rows<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let n = x.dims()[0];
    let order: Vec<i64> = (0..n as i64).rev().collect();
    let order = Tensor::<B, 1, Int>::from_data(TensorData::new(order, [n]), &x.device());
    x.select(0, order)
}

fn run_lstm<B: Backend>(lstm: &Lstm<B>, x: Tensor<B, 2>) -> Tensor<B, 2> {
    let (out, _state) = lstm.forward(x.unsqueeze::<3>(), None);
    out.squeeze::<2>(0)
}

// ─── BiRecurrent ──────────────────────────────────────────────────────────────
/// A forward and a backward LSTM with independent inputs.
#[derive(Module, Debug)]
pub struct BiRecurrent<B: Backend> {
    pub fwd: Lstm<B>,
    pub bwd: Lstm<B>,
}

impl<B: Backend> BiRecurrent<B> {
    pub fn new(d_input: usize, d_hidden: usize, device: &B::Device) -> Self {
        Self {
            fwd: LstmConfig::new(d_input, d_hidden, true).init(device),
            bwd: LstmConfig::new(d_input, d_hidden, true).init(device),
        }
    }

    /// [seq, d_input] streams in token order → ([seq, d_hidden], [seq, d_hidden]),
    /// both in token order.
    pub fn forward(&self, fwd_input: Tensor<B, 2>, bwd_input: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let fwd = run_lstm(&self.fwd, fwd_input);
        let bwd = reverse_rows(run_lstm(&self.bwd, reverse_rows(bwd_input)));
        (fwd, bwd)
    }
}

// ─── CharEncoder ──────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct CharEncoder<B: Backend> {
    pub embedding: Embedding<B>,
    pub rnn: BiRecurrent<B>,
}

impl<B: Backend> CharEncoder<B> {
    pub fn new(num_chars: usize, c_dim: usize, initializer: Initializer, device: &B::Device) -> Self {
        Self {
            embedding: EmbeddingConfig::new(num_chars, c_dim)
                .with_initializer(initializer)
                .init(device),
            rnn: BiRecurrent::new(c_dim, c_dim, device),
        }
    }

    /// One row per word: [n_words, 2 * c_dim].
    ///
    /// Words are padded to a common length and run as one batch; padding
    /// sits after the real characters so it never reaches the states read.
    pub fn forward(&self, words: &[Vec<usize>], device: &B::Device) -> Tensor<B, 2> {
        let n = words.len();
        let max_len = words.iter().map(Vec::len).max().unwrap_or(1).max(1);

        let mut fwd_ids = Vec::with_capacity(n * max_len);
        let mut bwd_ids = Vec::with_capacity(n * max_len);
        let mut last = Vec::with_capacity(n);
        for (i, chars) in words.iter().enumerate() {
            let pad = max_len - chars.len();
            fwd_ids.extend(chars.iter().map(|&c| c as i64));
            fwd_ids.extend(std::iter::repeat(0i64).take(pad));
            bwd_ids.extend(chars.iter().rev().map(|&c| c as i64));
            bwd_ids.extend(std::iter::repeat(0i64).take(pad));
            last.push((i * max_len + chars.len().max(1) - 1) as i64);
        }

        let ids = |v: Vec<i64>| Tensor::<B, 2, Int>::from_data(TensorData::new(v, [n, max_len]), device);
        let last = Tensor::<B, 1, Int>::from_data(TensorData::new(last, [n]), device);

        let (fwd_out, _) = self.rnn.fwd.forward(self.embedding.forward(ids(fwd_ids)), None);
        let (bwd_out, _) = self.rnn.bwd.forward(self.embedding.forward(ids(bwd_ids)), None);

        let [_, _, c] = fwd_out.dims();
        let fwd_last = fwd_out.reshape([n * max_len, c]).select(0, last.clone());
        // the backward LSTM's last step has consumed the word right to left,
        // so it is the state at the first character
        let bwd_first = bwd_out.reshape([n * max_len, c]).select(0, last);

        Tensor::cat(vec![fwd_last, bwd_first], 1)
    }
}

// ─── EncoderStack ─────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct EncoderStack<B: Backend> {
    pub layers: Vec<BiRecurrent<B>>,
}

impl<B: Backend> EncoderStack<B> {
    pub fn new(d_input: usize, h_dim: usize, depth: usize, device: &B::Device) -> Self {
        let layers = (0..depth)
            .map(|i| BiRecurrent::new(if i == 0 { d_input } else { h_dim }, h_dim, device))
            .collect();
        Self { layers }
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Per-token features [seq, 2 * h_dim] read at the 1-based layer `tap`.
    /// Layers above `tap` are not run.
    pub fn forward(&self, features: Tensor<B, 2>, activation_kind: Activation, tap: usize) -> Tensor<B, 2> {
        let mut fwd = features.clone();
        let mut bwd = features;

        for (i, layer) in self.layers.iter().enumerate().take(tap) {
            let (f, b) = layer.forward(fwd, bwd);
            if i > 0 {
                fwd = activation::apply(activation_kind, f);
                bwd = activation::apply(activation_kind, b);
            } else {
                fwd = f;
                bwd = b;
            }
        }

        Tensor::cat(vec![fwd, bwd], 1)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::InferBackend;

    type B = InferBackend;

    #[test]
    fn test_reverse_rows() {
        let device = Default::default();
        let x = Tensor::<B, 2>::from_data(TensorData::from([[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]]), &device);
        let r = reverse_rows(x).into_data().to_vec::<f32>().unwrap();
        assert_eq!(r, vec![5.0, 6.0, 3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn test_stack_output_width() {
        let device = Default::default();
        let stack = EncoderStack::<B>::new(6, 4, 2, &device);
        let x = Tensor::<B, 2>::zeros([5, 6], &device);
        assert_eq!(stack.forward(x.clone(), Activation::Tanh, 1).dims(), [5, 8]);
        assert_eq!(stack.forward(x, Activation::Tanh, 2).dims(), [5, 8]);
    }

    #[test]
    fn test_char_encoder_pads_ragged_words() {
        let device = Default::default();
        let enc = CharEncoder::<B>::new(10, 3, Initializer::Uniform { min: -0.5, max: 0.5 }, &device);
        let words = vec![vec![1, 4, 2], vec![1, 5, 6, 7, 2]];
        assert_eq!(enc.forward(&words, &device).dims(), [2, 6]);
    }

    #[test]
    fn test_char_encoding_ignores_other_words() {
        // padding must not leak: a word encodes the same alone or beside a longer one
        let device = Default::default();
        let enc = CharEncoder::<B>::new(10, 3, Initializer::Uniform { min: -0.5, max: 0.5 }, &device);
        let alone = enc.forward(&[vec![1, 4, 2]], &device).into_data().to_vec::<f32>().unwrap();
        let batched = enc
            .forward(&[vec![1, 4, 2], vec![1, 5, 6, 7, 8, 2]], &device)
            .slice([0..1, 0..6])
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        for (a, b) in alone.iter().zip(&batched) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
