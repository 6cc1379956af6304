// ============================================================
// Layer 5 — Output Heads
// ============================================================
// One classifier over a task's tapped encoder features:
//
//   x ─► dropout (training only) ─► [hidden Linear ─► act] ─► Linear ─► logits
//
// The hidden layer exists only when the head's spec declares a
// non-zero width. Softmax is applied by the callers: log-softmax
// for the loss, softmax for predictions.
//
// The dropout rate is not stored in the module: it is adaptation
// state owned by the training loop and passed in on every call.

use burn::{
    module::Param,
    nn::{DropoutConfig, Linear, LinearConfig},
    prelude::*,
};

use crate::domain::error::TaggerError;
use crate::domain::head_spec::HeadSpec;
use crate::ml::activation;

#[derive(Module, Debug)]
pub struct OutputHead<B: Backend> {
    pub hidden: Option<Linear<B>>,
    pub output: Linear<B>,
}

/// All heads of one task, in query order.
#[derive(Module, Debug)]
pub struct TaskHeads<B: Backend> {
    pub heads: Vec<OutputHead<B>>,
}

/// Overwrite a parameter's value in place, keeping its id and grad flag.
pub(crate) fn overwrite_param<B: Backend, const D: usize>(param: Param<Tensor<B, D>>, value: Tensor<B, D>) -> Param<Tensor<B, D>> {
    param.map(|old| {
        let require_grad = old.is_require_grad();
        value.clone().detach().set_require_grad(require_grad)
    })
}

fn copy_linear<B: Backend>(mut dst: Linear<B>, src: &Linear<B>) -> Result<Linear<B>, TaggerError> {
    if dst.weight.dims() != src.weight.dims() || dst.bias.is_some() != src.bias.is_some() {
        return Err(TaggerError::ShapeMismatch(format!(
            "cannot copy linear {:?} into {:?}",
            src.weight.dims(),
            dst.weight.dims()
        )));
    }
    dst.weight = overwrite_param(dst.weight, src.weight.val());
    if let (Some(b), Some(src_b)) = (dst.bias.take(), &src.bias) {
        dst.bias = Some(overwrite_param(b, src_b.val()));
    }
    Ok(dst)
}

impl<B: Backend> OutputHead<B> {
    /// `d_in` is the width of the tapped features (2 * h_dim).
    pub fn new(spec: &HeadSpec, d_in: usize, num_tags: usize, device: &B::Device) -> Self {
        if spec.has_hidden_layer() {
            Self {
                hidden: Some(LinearConfig::new(d_in, spec.hidden_units).init(device)),
                output: LinearConfig::new(spec.hidden_units, num_tags).init(device),
            }
        } else {
            Self { hidden: None, output: LinearConfig::new(d_in, num_tags).init(device) }
        }
    }

    /// Logits [seq, num_tags]. `dropout` is applied only when given and positive.
    pub fn forward(&self, x: Tensor<B, 2>, spec: &HeadSpec, dropout: Option<f64>) -> Tensor<B, 2> {
        let x = match dropout {
            Some(rate) if rate > 0.0 => DropoutConfig::new(rate).init().forward(x),
            _ => x,
        };
        let x = match &self.hidden {
            Some(hidden) => activation::apply(spec.activation, hidden.forward(x)),
            None => x,
        };
        self.output.forward(x)
    }

    /// Copy every parameter value of `src` into this head. Fails without
    /// changing anything when the two heads have different shapes.
    pub fn copy_values_from(self, src: &Self) -> Result<Self, TaggerError> {
        let hidden = match (self.hidden, &src.hidden) {
            (Some(dst), Some(src_h)) => Some(copy_linear(dst, src_h)?),
            (None, None) => None,
            _ => {
                return Err(TaggerError::ShapeMismatch(
                    "cannot copy between heads with and without a hidden layer".to_string(),
                ))
            }
        };
        let output = copy_linear(self.output, &src.output)?;
        Ok(Self { hidden, output })
    }

    /// Add `noise` (same shape) to the output weight matrix.
    pub fn perturb_output_weights(mut self, noise: Tensor<B, 2>) -> Self {
        let perturbed = self.output.weight.val() + noise;
        self.output.weight = overwrite_param(self.output.weight, perturbed);
        self
    }

    pub fn output_weight_dims(&self) -> [usize; 2] {
        self.output.weight.dims()
    }

    /// Frobenius norm of the output weight matrix.
    pub fn output_norm(&self) -> f64 {
        self.output
            .weight
            .val()
            .powf_scalar(2.0)
            .sum()
            .sqrt()
            .into_scalar()
            .elem::<f64>()
    }
}
