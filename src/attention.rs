// attention.rs
// Description: Scaled dot product attention head and multi head attention with a learned
//              output projection. Heads run concurrently on the rayon pool for forward and
//              backward; input gradients are summed under a mutex.
// History:
// - 2026-10-18: Split per head state into its own struct with explicit forward cache.
// - 2026-10-18: Run heads in parallel and join before the output projection.

use ndarray::Array2;
use parking_lot::Mutex;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};
use crate::layer::Layer;
use crate::math;

// Scratch state of the most recent forward call.
#[derive(Clone, Debug)]
struct HeadCache {
    a_input: Array2<f64>,
    a_query: Array2<f64>,
    a_key: Array2<f64>,
    a_value: Array2<f64>,
    a_scores: Array2<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Head {
    // [input_dim, head_dim]
    pub w_query: Array2<f64>,
    pub w_key: Array2<f64>,
    pub w_value: Array2<f64>,

    #[serde(skip)]
    cache: Option<HeadCache>,
}

impl Head {
    pub fn new<R: Rng + ?Sized>(i_input_dim: usize, i_head_dim: usize, rng: &mut R) -> Result<Self> {
        Self::from_weights(
            math::xavier(i_input_dim, i_head_dim, rng)?,
            math::xavier(i_input_dim, i_head_dim, rng)?,
            math::xavier(i_input_dim, i_head_dim, rng)?,
        )
    }

    pub fn from_weights(
        w_query: Array2<f64>,
        w_key: Array2<f64>,
        w_value: Array2<f64>,
    ) -> Result<Self> {
        let head = Self {
            w_query,
            w_key,
            w_value,
            cache: None,
        };
        head.validate()?;
        Ok(head)
    }

    // All three projections must share one shape.
    pub fn validate(&self) -> Result<()> {
        math::ensure_same_dims("head_weights", &self.w_query, &self.w_key)?;
        math::ensure_same_dims("head_weights", &self.w_query, &self.w_value)?;
        if self.w_key.ncols() == 0 {
            return Err(LlmError::dims("head_weights", "key width must be positive"));
        }
        Ok(())
    }

    pub fn input_dim(&self) -> usize {
        self.w_query.nrows()
    }

    pub fn head_dim(&self) -> usize {
        self.w_key.ncols()
    }

    fn inv_scale(&self) -> f64 {
        1.0 / (self.w_key.ncols() as f64).sqrt()
    }
}

impl Layer for Head {
    fn layer_type(&self) -> &str {
        "AttentionHead"
    }

    fn forward(&mut self, a_input: &Array2<f64>) -> Result<Array2<f64>> {
        let a_query = math::matmul(a_input, &self.w_query)?;
        let a_key = math::matmul(a_input, &self.w_key)?;
        let a_value = math::matmul(a_input, &self.w_value)?;

        let d_inv_scale = self.inv_scale();
        let mut a_scores = math::matmul(&a_query, &a_key.t())?;
        a_scores.mapv_inplace(|d| d * d_inv_scale);
        math::apply_causal_mask_inplace(&mut a_scores);
        let a_scores = math::softmax_rows(&a_scores);

        let a_output = math::matmul(&a_scores, &a_value)?;

        self.cache = Some(HeadCache {
            a_input: a_input.clone(),
            a_query,
            a_key,
            a_value,
            a_scores,
        });

        Ok(a_output)
    }

    fn backward(&mut self, a_grads: &Array2<f64>, d_lr: f64) -> Result<Array2<f64>> {
        let d_inv_scale = self.inv_scale();
        let cache = self
            .cache
            .as_ref()
            .ok_or(LlmError::MissingForwardCache("attention head"))?;

        // Softmax Jacobian-vector product: dS = P * (dP - rowsum(P * dP)).
        let a_grad_probs = math::matmul(a_grads, &cache.a_value.t())?;
        let a_weighted = math::mul_elem(&a_grad_probs, &cache.a_scores)?;
        let a_centered = math::sub_per_row(&a_grad_probs, &math::row_sums(&a_weighted))?;
        let mut a_grad_scores = math::mul_elem(&cache.a_scores, &a_centered)?;
        a_grad_scores.mapv_inplace(|d| d * d_inv_scale);

        let a_grad_query = math::matmul(&a_grad_scores, &cache.a_key)?;
        let a_grad_key = math::matmul(&a_grad_scores.t(), &cache.a_query)?;
        let a_grad_value = math::matmul(&cache.a_scores.t(), a_grads)?;

        let a_input_t = cache.a_input.t();
        let a_grad_w_query = math::matmul(&a_input_t, &a_grad_query)?;
        let a_grad_w_key = math::matmul(&a_input_t, &a_grad_key)?;
        let a_grad_w_value = math::matmul(&a_input_t, &a_grad_value)?;

        let mut a_grad_input = math::matmul(&a_grad_query, &self.w_query.t())?;
        math::add_inplace(&mut a_grad_input, &math::matmul(&a_grad_key, &self.w_key.t())?)?;
        math::add_inplace(&mut a_grad_input, &math::matmul(&a_grad_value, &self.w_value.t())?)?;

        math::sgd_step(&mut self.w_query, &a_grad_w_query, d_lr)?;
        math::sgd_step(&mut self.w_key, &a_grad_w_key, d_lr)?;
        math::sgd_step(&mut self.w_value, &a_grad_w_value, d_lr)?;

        Ok(a_grad_input)
    }

    fn parameters(&self) -> usize {
        self.w_query.len() + self.w_key.len() + self.w_value.len()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultiHeadAttention {
    pub v_heads: Vec<Head>,
    // [num_heads * head_dim, model_dim]
    pub w_output: Array2<f64>,

    #[serde(skip)]
    cached_concat: Option<Array2<f64>>,
}

impl MultiHeadAttention {
    pub fn new<R: Rng + ?Sized>(
        i_num_heads: usize,
        i_model_dim: usize,
        i_head_dim: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if i_num_heads == 0 {
            return Err(LlmError::InvalidParameter(
                "num_heads must be positive".to_string(),
            ));
        }
        let v_heads = (0..i_num_heads)
            .map(|_| Head::new(i_model_dim, i_head_dim, rng))
            .collect::<Result<Vec<Head>>>()?;
        let w_output = math::xavier(i_num_heads * i_head_dim, i_model_dim, rng)?;
        Self::from_parts(v_heads, w_output)
    }

    pub fn from_parts(v_heads: Vec<Head>, w_output: Array2<f64>) -> Result<Self> {
        let mha = Self {
            v_heads,
            w_output,
            cached_concat: None,
        };
        mha.validate()?;
        Ok(mha)
    }

    // Heads share one shape, the output projection maps their concatenation back to model width.
    pub fn validate(&self) -> Result<()> {
        let first = self
            .v_heads
            .first()
            .ok_or_else(|| LlmError::InvalidParameter("attention needs at least one head".to_string()))?;
        for head in &self.v_heads {
            head.validate()?;
            math::ensure_same_dims("mha_heads", &first.w_query, &head.w_query)?;
        }
        let i_concat = self.v_heads.len() * first.head_dim();
        if self.w_output.nrows() != i_concat || self.w_output.ncols() != first.input_dim() {
            return Err(LlmError::dims(
                "mha_output",
                format!(
                    "output projection {}x{} for {} heads of {}x{}",
                    self.w_output.nrows(),
                    self.w_output.ncols(),
                    self.v_heads.len(),
                    first.input_dim(),
                    first.head_dim()
                ),
            ));
        }
        Ok(())
    }

    pub fn num_heads(&self) -> usize {
        self.v_heads.len()
    }

    pub fn model_dim(&self) -> usize {
        self.w_output.ncols()
    }
}

impl Layer for MultiHeadAttention {
    fn layer_type(&self) -> &str {
        "MultiHeadAttention"
    }

    fn forward(&mut self, a_input: &Array2<f64>) -> Result<Array2<f64>> {
        // Heads only read the shared input, results come back in head order.
        let v_outputs = self
            .v_heads
            .par_iter_mut()
            .map(|head| head.forward(a_input))
            .collect::<Result<Vec<Array2<f64>>>>()?;

        let a_concat = math::concat_all(&v_outputs)?;
        let a_output = math::matmul(&a_concat, &self.w_output)?;
        self.cached_concat = Some(a_concat);

        Ok(a_output)
    }

    fn backward(&mut self, a_grads: &Array2<f64>, d_lr: f64) -> Result<Array2<f64>> {
        let a_concat = self
            .cached_concat
            .as_ref()
            .ok_or(LlmError::MissingForwardCache("multi head attention"))?;

        let a_grad_concat = math::matmul(a_grads, &self.w_output.t())?;
        let v_head_grads = math::split(&a_grad_concat, self.v_heads.len())?;
        if v_head_grads.len() != self.v_heads.len() {
            return Err(LlmError::dims(
                "mha_backward",
                format!("{} gradient slices for {} heads", v_head_grads.len(), self.v_heads.len()),
            ));
        }

        // Order of accumulation follows head completion, so sums may differ in the last bits between runs.
        let accumulator: Mutex<Option<Array2<f64>>> = Mutex::new(None);
        self.v_heads
            .par_iter_mut()
            .zip(v_head_grads.par_iter())
            .try_for_each(|(head, a_head_grad)| -> Result<()> {
                let a_grad_input = head.backward(a_head_grad, d_lr)?;
                let mut opt_sum = accumulator.lock();
                if let Some(a_sum) = opt_sum.as_mut() {
                    math::add_inplace(a_sum, &a_grad_input)?;
                } else {
                    *opt_sum = Some(a_grad_input);
                }
                Ok(())
            })?;

        let a_grad_w_output = math::matmul(&a_concat.t(), a_grads)?;
        math::sgd_step(&mut self.w_output, &a_grad_w_output, d_lr)?;

        accumulator
            .into_inner()
            .ok_or_else(|| LlmError::dims("mha_backward", "no head produced a gradient"))
    }

    fn parameters(&self) -> usize {
        self.w_output.len() + self.v_heads.iter().map(|head| head.parameters()).sum::<usize>()
    }
}
