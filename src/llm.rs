// llm.rs
// Description: Language model: token embedding plus learned positions, a stack of transformer
//              layers, output projection tied to the embedding matrix, row softmax.
//              Backward applies the tied embedding update once with both gradient paths summed.
//              Parameter blob save and load.
// History:
// - 2026-10-18: Tie output projection to the embedding matrix.
// - 2026-10-18: Binary parameter blob with shape validation on load.

use std::ops::AddAssign;
use std::path::Path;

use ndarray::{s, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{LlmError, Result};
use crate::layer::TransformerLayer;
use crate::math;
use crate::utils;

const PARAMS_MAGIC: &str = "LLMSCRATCH-PARAMS";
const PARAMS_VERSION: u32 = 1;

/// Residual branch scales `((2L)^-1/4, (8L)^-1/4)` for a stack of `L` layers.
pub fn residual_scales(i_num_layers: usize) -> (f64, f64) {
    let d_layers = i_num_layers as f64;
    ((2.0 * d_layers).powf(-0.25), (8.0 * d_layers).powf(-0.25))
}

#[derive(Clone, Debug)]
struct LlmCache {
    a_hidden: Array2<f64>,
    v_indices: Vec<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Llm {
    // [vocab_size, model_dim], also the output projection
    pub a_embeddings: Array2<f64>,
    // [context_size, model_dim]
    pub a_positional: Array2<f64>,
    pub v_layers: Vec<TransformerLayer>,
    pub i_context_size: usize,

    #[serde(skip)]
    cache: Option<LlmCache>,
}

impl Llm {
    pub fn new<R: Rng + ?Sized>(
        i_vocab_size: usize,
        i_context_size: usize,
        i_model_dim: usize,
        i_num_layers: usize,
        i_num_heads: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if i_vocab_size == 0 || i_context_size == 0 || i_num_layers == 0 {
            return Err(LlmError::InvalidParameter(format!(
                "vocab ({i_vocab_size}), context ({i_context_size}) and layers ({i_num_layers}) must be positive"
            )));
        }
        let a_embeddings = math::xavier(i_vocab_size, i_model_dim, rng)?;
        let a_positional = math::xavier(i_context_size, i_model_dim, rng)?;
        let v_layers = (0..i_num_layers)
            .map(|_| TransformerLayer::new(i_num_heads, i_model_dim, rng))
            .collect::<Result<Vec<_>>>()?;
        Self::from_parts(a_embeddings, a_positional, v_layers)
    }

    /// Assembles a model from existing parameters. Context size is the positional row count.
    pub fn from_parts(
        a_embeddings: Array2<f64>,
        a_positional: Array2<f64>,
        v_layers: Vec<TransformerLayer>,
    ) -> Result<Self> {
        let llm = Self {
            i_context_size: a_positional.nrows(),
            a_embeddings,
            a_positional,
            v_layers,
            cache: None,
        };
        llm.validate()?;
        Ok(llm)
    }

    pub fn validate(&self) -> Result<()> {
        if self.a_embeddings.nrows() == 0 {
            return Err(LlmError::InvalidParameter("empty vocabulary".to_string()));
        }
        if self.v_layers.is_empty() {
            return Err(LlmError::InvalidParameter(
                "model needs at least one transformer layer".to_string(),
            ));
        }
        if self.i_context_size == 0 || self.a_positional.nrows() != self.i_context_size {
            return Err(LlmError::dims(
                "positional",
                format!(
                    "{} positional rows for context size {}",
                    self.a_positional.nrows(),
                    self.i_context_size
                ),
            ));
        }
        let i_model = self.a_embeddings.ncols();
        if self.a_positional.ncols() != i_model {
            return Err(LlmError::shapes(
                "positional",
                self.a_embeddings.dim(),
                self.a_positional.dim(),
            ));
        }
        for layer in &self.v_layers {
            layer.validate()?;
            if layer.model_dim() != i_model {
                return Err(LlmError::dims(
                    "transformer_layer",
                    format!("layer width {} in model width {}", layer.model_dim(), i_model),
                ));
            }
        }
        Ok(())
    }

    pub fn vocab_size(&self) -> usize {
        self.a_embeddings.nrows()
    }

    pub fn model_dim(&self) -> usize {
        self.a_embeddings.ncols()
    }

    pub fn context_size(&self) -> usize {
        self.i_context_size
    }

    pub fn residual_scales(&self) -> (f64, f64) {
        residual_scales(self.v_layers.len())
    }

    pub fn network_description(&self) -> String {
        let i_model = self.model_dim();
        let v_blocks: Vec<String> = self
            .v_layers
            .iter()
            .map(|layer| {
                let v_widths: Vec<String> = layer
                    .feed_forward
                    .v_layers
                    .iter()
                    .map(|l| l.output_dim().to_string())
                    .collect();
                format!(
                    "TransformerLayer(heads={}, ff={}->{})",
                    layer.attention.num_heads(),
                    i_model,
                    v_widths.join("->")
                )
            })
            .collect();
        format!(
            "Embeddings({}x{}) + Positional({}x{}) + [{}] + TiedOutput({}x{})",
            self.vocab_size(),
            i_model,
            self.i_context_size,
            i_model,
            v_blocks.join(", "),
            i_model,
            self.vocab_size()
        )
    }

    pub fn parameter_count(&self) -> usize {
        self.a_embeddings.len()
            + self.a_positional.len()
            + self.v_layers.iter().map(TransformerLayer::parameters).sum::<usize>()
    }

    /// Next token probabilities for every position, `[indices.len(), vocab_size]`.
    pub fn forward(&mut self, v_indices: &[usize], d_dropout: f64) -> Result<Array2<f64>> {
        let i_len = v_indices.len();
        if i_len == 0 || i_len > self.i_context_size {
            return Err(LlmError::dims(
                "llm_forward",
                format!("window of {i_len} tokens for context size {}", self.i_context_size),
            ));
        }
        let i_vocab = self.vocab_size();

        let mut a_x = Array2::<f64>::zeros((i_len, self.model_dim()));
        for (i_pos, &i_index) in v_indices.iter().enumerate() {
            if i_index >= i_vocab {
                return Err(LlmError::dims(
                    "embedding_lookup",
                    format!("token index {i_index} out of range for vocabulary {i_vocab}"),
                ));
            }
            a_x.row_mut(i_pos).assign(&self.a_embeddings.row(i_index));
        }
        a_x += &self.a_positional.slice(s![0..i_len, ..]);

        let (d_alpha_mha, d_alpha_mlp) = self.residual_scales();
        for layer in self.v_layers.iter_mut() {
            a_x = layer.forward(&a_x, d_alpha_mha, d_alpha_mlp, d_dropout)?;
        }

        let a_logits = math::matmul(&a_x, &self.a_embeddings.t())?;
        self.cache = Some(LlmCache {
            a_hidden: a_x,
            v_indices: v_indices.to_vec(),
        });

        Ok(math::softmax_rows(&a_logits))
    }

    /// Backpropagates the gradient w.r.t. the logits and updates every parameter in place.
    pub fn backward(&mut self, a_grads: &Array2<f64>, d_lr: f64) -> Result<()> {
        let (d_alpha_mha, d_alpha_mlp) = self.residual_scales();
        let cache = self
            .cache
            .as_ref()
            .ok_or(LlmError::MissingForwardCache("language model"))?;

        // Both paths read the embedding matrix as it was during forward.
        let mut a_hidden_grad = math::matmul(a_grads, &self.a_embeddings)?;
        let mut a_embed_grad = math::matmul(&a_grads.t(), &cache.a_hidden)?;

        for layer in self.v_layers.iter_mut().rev() {
            a_hidden_grad = layer.backward(&a_hidden_grad, d_alpha_mha, d_alpha_mlp, d_lr)?;
        }

        scatter_rows(&mut a_embed_grad, &a_hidden_grad, &cache.v_indices)?;

        let i_len = cache.v_indices.len();
        math::sgd_step(
            &mut self.a_positional.slice_mut(s![0..i_len, ..]),
            &a_hidden_grad,
            d_lr,
        )?;
        math::sgd_step(&mut self.a_embeddings, &a_embed_grad, d_lr)?;

        Ok(())
    }

    /// Greedy continuation of `v_prompt`, dropout off. Stops early when `opt_stop` is produced.
    pub fn generate(
        &mut self,
        v_prompt: &[usize],
        i_max_new: usize,
        opt_stop: Option<usize>,
    ) -> Result<Vec<usize>> {
        if v_prompt.is_empty() {
            return Err(LlmError::InvalidParameter("empty prompt".to_string()));
        }
        let mut v_tokens = v_prompt.to_vec();
        let mut v_generated = Vec::with_capacity(i_max_new);

        for _ in 0..i_max_new {
            let i_start = v_tokens.len().saturating_sub(self.i_context_size);
            let a_probs = self.forward(&v_tokens[i_start..], 0.0)?;
            let i_next = match math::argmax_rows(&a_probs).last() {
                Some(&i) => i,
                None => break,
            };
            v_generated.push(i_next);
            if opt_stop == Some(i_next) {
                break;
            }
            v_tokens.push(i_next);
        }

        Ok(v_generated)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        utils::encode_blob(PARAMS_MAGIC, PARAMS_VERSION, self)
    }

    /// Decodes and shape checks a parameter blob. Any inconsistency is reported as malformed.
    pub fn from_bytes(v_bytes: &[u8]) -> Result<Self> {
        let llm: Llm = utils::decode_blob(PARAMS_MAGIC, PARAMS_VERSION, v_bytes)?;
        llm.validate()
            .map_err(|e| LlmError::MalformedState(format!("parameter blob: {e}")))?;
        Ok(llm)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let v_bytes = self.to_bytes()?;
        utils::write_file_atomic(path, &v_bytes)?;
        info!(path = %path.display(), bytes = v_bytes.len(), "saved model parameters");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let v_bytes = std::fs::read(path)?;
        let llm = Self::from_bytes(&v_bytes)?;
        debug!(
            path = %path.display(),
            vocab = llm.vocab_size(),
            layers = llm.v_layers.len(),
            "loaded model parameters"
        );
        Ok(llm)
    }
}

// Adds each position's gradient into the embedding row of its token; repeats accumulate.
fn scatter_rows(
    a_embed_grad: &mut Array2<f64>,
    a_position_grad: &Array2<f64>,
    v_indices: &[usize],
) -> Result<()> {
    if a_position_grad.nrows() != v_indices.len() || a_position_grad.ncols() != a_embed_grad.ncols() {
        return Err(LlmError::shapes(
            "embedding_scatter",
            a_embed_grad.dim(),
            a_position_grad.dim(),
        ));
    }
    for (i_pos, &i_index) in v_indices.iter().enumerate() {
        if i_index >= a_embed_grad.nrows() {
            return Err(LlmError::dims(
                "embedding_scatter",
                format!("token index {i_index} out of range"),
            ));
        }
        a_embed_grad
            .row_mut(i_index)
            .add_assign(&a_position_grad.row(i_pos));
    }
    Ok(())
}
