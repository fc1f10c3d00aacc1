// layer.rs
// Description: Layer trait shared by every trainable component, and the transformer layer
//              composing multi head attention and the feed forward block with scaled,
//              dropout masked residual branches.
// History:
// - 2026-10-18: Layer trait returns Result, forward cache misses surface as errors.
// - 2026-10-18: Residual scales are passed in by the model instead of owned by the layer.

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::attention::MultiHeadAttention;
use crate::error::{LlmError, Result};
use crate::feed_forward::FeedForward;
use crate::math;

pub trait Layer {
    fn layer_type(&self) -> &str;

    // Conventions:
    // - activations: [seq_len, width]
    // - forward caches what backward needs, backward applies a gradient step in place
    //   and returns the gradient w.r.t. the forward input
    fn forward(&mut self, a_input: &Array2<f64>) -> Result<Array2<f64>>;

    fn backward(&mut self, a_grads: &Array2<f64>, d_lr: f64) -> Result<Array2<f64>>;

    fn parameters(&self) -> usize;
}

#[derive(Clone, Debug)]
struct DropoutMasks {
    a_attention: Array2<f64>,
    a_feed_forward: Array2<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransformerLayer {
    pub attention: MultiHeadAttention,
    pub feed_forward: FeedForward,

    #[serde(skip)]
    masks: Option<DropoutMasks>,
}

impl TransformerLayer {
    /// Attention with `i_num_heads` heads of width `model / heads`, feed forward `[4 * model, model]`.
    pub fn new<R: Rng + ?Sized>(i_num_heads: usize, i_model_dim: usize, rng: &mut R) -> Result<Self> {
        if i_num_heads == 0 || i_model_dim == 0 || i_model_dim % i_num_heads != 0 {
            return Err(LlmError::InvalidParameter(format!(
                "model width {i_model_dim} is not a positive multiple of {i_num_heads} heads"
            )));
        }
        let attention =
            MultiHeadAttention::new(i_num_heads, i_model_dim, i_model_dim / i_num_heads, rng)?;
        let feed_forward = FeedForward::new(i_model_dim, &[4 * i_model_dim, i_model_dim], rng)?;
        Self::from_parts(attention, feed_forward)
    }

    pub fn from_parts(attention: MultiHeadAttention, feed_forward: FeedForward) -> Result<Self> {
        let layer = Self {
            attention,
            feed_forward,
            masks: None,
        };
        layer.validate()?;
        Ok(layer)
    }

    // Both residual branches must preserve the model width.
    pub fn validate(&self) -> Result<()> {
        self.attention.validate()?;
        self.feed_forward.validate()?;
        let i_model = self.attention.model_dim();
        if self.feed_forward.input_dim() != i_model || self.feed_forward.output_dim() != i_model {
            return Err(LlmError::dims(
                "transformer_layer",
                format!(
                    "feed forward {}->{} inside model width {}",
                    self.feed_forward.input_dim(),
                    self.feed_forward.output_dim(),
                    i_model
                ),
            ));
        }
        Ok(())
    }

    pub fn model_dim(&self) -> usize {
        self.attention.model_dim()
    }

    pub fn forward(
        &mut self,
        a_input: &Array2<f64>,
        d_alpha_mha: f64,
        d_alpha_mlp: f64,
        d_dropout: f64,
    ) -> Result<Array2<f64>> {
        let a_attn = self.attention.forward(a_input)?;
        let a_attention_mask = math::dropout_mask(a_attn.nrows(), a_attn.ncols(), d_dropout);
        let mut a_mha_out = math::mul_elem(&a_attn, &a_attention_mask)?;
        a_mha_out.mapv_inplace(|d| d * d_alpha_mha);
        math::add_inplace(&mut a_mha_out, a_input)?;

        let a_ff = self.feed_forward.forward(&a_mha_out)?;
        let a_feed_forward_mask = math::dropout_mask(a_ff.nrows(), a_ff.ncols(), d_dropout);
        let mut a_output = math::mul_elem(&a_ff, &a_feed_forward_mask)?;
        a_output.mapv_inplace(|d| d * d_alpha_mlp);
        math::add_inplace(&mut a_output, &a_mha_out)?;

        self.masks = Some(DropoutMasks {
            a_attention: a_attention_mask,
            a_feed_forward: a_feed_forward_mask,
        });

        Ok(a_output)
    }

    pub fn backward(
        &mut self,
        a_grads: &Array2<f64>,
        d_alpha_mha: f64,
        d_alpha_mlp: f64,
        d_lr: f64,
    ) -> Result<Array2<f64>> {
        let masks = self
            .masks
            .as_ref()
            .ok_or(LlmError::MissingForwardCache("transformer layer"))?;

        let a_ff_grad = math::mul_elem(&a_grads.mapv(|d| d * d_alpha_mlp), &masks.a_feed_forward)?;
        let mut a_mid_grad = self.feed_forward.backward(&a_ff_grad, d_lr)?;
        math::add_inplace(&mut a_mid_grad, a_grads)?;

        let a_attn_grad = math::mul_elem(&a_mid_grad.mapv(|d| d * d_alpha_mha), &masks.a_attention)?;
        let a_branch = self.attention.backward(&a_attn_grad, d_lr)?;
        let mut a_input_grad = a_mid_grad;
        math::add_inplace(&mut a_input_grad, &a_branch)?;

        Ok(a_input_grad)
    }

    pub fn parameters(&self) -> usize {
        self.attention.parameters() + self.feed_forward.parameters()
    }
}
