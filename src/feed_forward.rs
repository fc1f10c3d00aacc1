// feed_forward.rs
// Description: Fully connected layer (input x W + b) and the multi layer perceptron built from
//              it, leaky ReLU between layers and none after the last.
// History:
// - 2026-10-18: Bias is a single row broadcast over all positions.

use ndarray::{Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};
use crate::layer::Layer;
use crate::math;

#[derive(Clone, Debug)]
struct DenseCache {
    a_input: Array2<f64>,
    a_output: Array2<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedForwardLayer {
    // [input_dim, output_dim]
    pub w_weights: Array2<f64>,
    // [1, output_dim]
    pub a_bias: Array2<f64>,

    #[serde(skip)]
    cache: Option<DenseCache>,
}

impl FeedForwardLayer {
    /// He initialized weights, zero bias.
    pub fn new<R: Rng + ?Sized>(i_input_dim: usize, i_output_dim: usize, rng: &mut R) -> Result<Self> {
        Self::from_weights(
            math::he(i_input_dim, i_output_dim, rng)?,
            Array2::zeros((1, i_output_dim)),
        )
    }

    pub fn from_weights(w_weights: Array2<f64>, a_bias: Array2<f64>) -> Result<Self> {
        let layer = Self {
            w_weights,
            a_bias,
            cache: None,
        };
        layer.validate()?;
        Ok(layer)
    }

    pub fn validate(&self) -> Result<()> {
        if self.a_bias.nrows() != 1 || self.a_bias.ncols() != self.w_weights.ncols() {
            return Err(LlmError::shapes(
                "dense_bias",
                self.w_weights.dim(),
                self.a_bias.dim(),
            ));
        }
        Ok(())
    }

    pub fn input_dim(&self) -> usize {
        self.w_weights.nrows()
    }

    pub fn output_dim(&self) -> usize {
        self.w_weights.ncols()
    }

    /// Output of the most recent forward call.
    pub fn cached_output(&self) -> Option<&Array2<f64>> {
        self.cache.as_ref().map(|c| &c.a_output)
    }
}

impl Layer for FeedForwardLayer {
    fn layer_type(&self) -> &str {
        "FeedForwardLayer"
    }

    fn forward(&mut self, a_input: &Array2<f64>) -> Result<Array2<f64>> {
        let mut a_output = math::matmul(a_input, &self.w_weights)?;
        a_output += &self.a_bias;
        self.cache = Some(DenseCache {
            a_input: a_input.clone(),
            a_output: a_output.clone(),
        });
        Ok(a_output)
    }

    fn backward(&mut self, a_grads: &Array2<f64>, d_lr: f64) -> Result<Array2<f64>> {
        let cache = self
            .cache
            .as_ref()
            .ok_or(LlmError::MissingForwardCache("feed forward layer"))?;

        let a_grad_weights = math::matmul(&cache.a_input.t(), a_grads)?;
        let a_grad_bias = a_grads.sum_axis(Axis(0)).insert_axis(Axis(0));
        let a_grad_input = math::matmul(a_grads, &self.w_weights.t())?;

        math::sgd_step(&mut self.w_weights, &a_grad_weights, d_lr)?;
        math::sgd_step(&mut self.a_bias, &a_grad_bias, d_lr)?;

        Ok(a_grad_input)
    }

    fn parameters(&self) -> usize {
        self.w_weights.len() + self.a_bias.len()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedForward {
    pub v_layers: Vec<FeedForwardLayer>,
}

impl FeedForward {
    /// Builds layers of the given output widths, the first consuming `i_input_dim`.
    pub fn new<R: Rng + ?Sized>(i_input_dim: usize, v_widths: &[usize], rng: &mut R) -> Result<Self> {
        let mut v_layers = Vec::with_capacity(v_widths.len());
        let mut i_in = i_input_dim;
        for &i_out in v_widths {
            v_layers.push(FeedForwardLayer::new(i_in, i_out, rng)?);
            i_in = i_out;
        }
        Self::from_layers(v_layers)
    }

    pub fn from_layers(v_layers: Vec<FeedForwardLayer>) -> Result<Self> {
        let mlp = Self { v_layers };
        mlp.validate()?;
        Ok(mlp)
    }

    // Non empty, and each layer consumes what the previous one produces.
    pub fn validate(&self) -> Result<()> {
        if self.v_layers.is_empty() {
            return Err(LlmError::InvalidParameter(
                "feed forward block needs at least one layer".to_string(),
            ));
        }
        for layer in &self.v_layers {
            layer.validate()?;
        }
        for pair in self.v_layers.windows(2) {
            if pair[0].output_dim() != pair[1].input_dim() {
                return Err(LlmError::shapes(
                    "mlp_chain",
                    pair[0].w_weights.dim(),
                    pair[1].w_weights.dim(),
                ));
            }
        }
        Ok(())
    }

    pub fn input_dim(&self) -> usize {
        self.v_layers.first().map_or(0, FeedForwardLayer::input_dim)
    }

    pub fn output_dim(&self) -> usize {
        self.v_layers.last().map_or(0, FeedForwardLayer::output_dim)
    }
}

impl Layer for FeedForward {
    fn layer_type(&self) -> &str {
        "FeedForward"
    }

    fn forward(&mut self, a_input: &Array2<f64>) -> Result<Array2<f64>> {
        let i_last = self.v_layers.len().saturating_sub(1);
        let mut a_x = a_input.clone();
        for (i_idx, layer) in self.v_layers.iter_mut().enumerate() {
            a_x = layer.forward(&a_x)?;
            if i_idx < i_last {
                a_x = math::leaky_relu(&a_x);
            }
        }
        Ok(a_x)
    }

    fn backward(&mut self, a_grads: &Array2<f64>, d_lr: f64) -> Result<Array2<f64>> {
        let mut a_grad = a_grads.clone();
        for i_idx in (0..self.v_layers.len()).rev() {
            a_grad = self.v_layers[i_idx].backward(&a_grad, d_lr)?;
            if i_idx > 0 {
                // Pre activation output of the layer below.
                let a_prev = self.v_layers[i_idx - 1]
                    .cached_output()
                    .ok_or(LlmError::MissingForwardCache("feed forward layer"))?;
                a_grad = math::mul_elem(&a_grad, &math::leaky_relu_deriv(a_prev))?;
            }
        }
        Ok(a_grad)
    }

    fn parameters(&self) -> usize {
        self.v_layers.iter().map(|layer| layer.parameters()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_close(a_got: &Array2<f64>, a_want: &Array2<f64>, d_tol: f64) {
        assert_eq!(a_got.dim(), a_want.dim());
        for (d_g, d_w) in a_got.iter().zip(a_want.iter()) {
            assert!((d_g - d_w).abs() <= d_tol, "expected {a_want:?}, got {a_got:?}");
        }
    }

    fn dense(w: Array2<f64>, b: Array2<f64>) -> FeedForwardLayer {
        FeedForwardLayer::from_weights(w, b).unwrap()
    }

    fn mlp_case_two() -> FeedForward {
        FeedForward::from_layers(vec![
            dense(array![[3.0, -2.0], [-1.0, 4.0], [2.0, 0.0]], array![[1.0, -2.0]]),
            dense(array![[-1.0], [5.0]], array![[3.0]]),
        ])
        .unwrap()
    }

    #[test]
    fn dense_forward_and_backward_known_values() {
        let mut layer = dense(
            array![[3.0, 1.0], [4.0, 7.0], [0.0, 3.0]],
            array![[0.5, -0.75]],
        );
        let a_out = layer.forward(&array![[2.0, 1.0, 4.0]]).unwrap();
        assert_close(&a_out, &array![[10.5, 20.25]], 1e-9);

        let a_grad = &a_out - &array![[11.0, 19.0]];
        let a_back = layer.backward(&a_grad, 1.0).unwrap();
        assert_close(&a_back, &array![[-0.25, 6.75, 3.75]], 1e-9);
        assert_close(&layer.a_bias, &array![[1.0, -2.0]], 1e-9);
        assert_close(
            &layer.w_weights,
            &array![[4.0, -1.5], [4.5, 5.75], [2.0, -2.0]],
            1e-9,
        );
    }

    #[test]
    fn dense_bias_broadcasts_and_accumulates_over_rows() {
        let mut layer = dense(array![[1.0], [0.0]], array![[0.5]]);
        let a_out = layer.forward(&array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        assert_close(&a_out, &array![[1.5], [3.5]], 1e-12);
        layer.backward(&array![[1.0], [2.0]], 0.1).unwrap();
        assert_close(&layer.a_bias, &array![[0.2]], 1e-12);
    }

    #[test]
    fn mlp_forward_known_values() {
        let mut mlp = FeedForward::from_layers(vec![
            dense(array![[-3.0, 8.0], [5.0, 7.0], [-1.0, 0.0]], array![[0.5, -1.0]]),
            dense(array![[2.0], [-3.0]], array![[4.0]]),
        ])
        .unwrap();
        assert_close(&mlp.forward(&array![[5.0, 7.0, 8.0]]).unwrap(), &array![[-235.0]], 1e-9);

        let mut mlp = mlp_case_two();
        assert_close(&mlp.forward(&array![[2.0, -3.0, 1.0]]).unwrap(), &array![[-9.9]], 1e-9);
    }

    #[test]
    fn mlp_backward_known_values() {
        let mut mlp = mlp_case_two();
        let a_out = mlp.forward(&array![[2.0, -3.0, 1.0]]).unwrap();
        let a_grad = &a_out - &array![[4.0]];
        let a_back = mlp.backward(&a_grad, 1.0).unwrap();
        assert_close(&a_back, &array![[43.09, -16.68, 27.8]], 1e-9);
    }

    #[test]
    fn mlp_new_chains_widths() {
        let mut rng = StdRng::seed_from_u64(5);
        let mlp = FeedForward::new(8, &[32, 8], &mut rng).unwrap();
        assert_eq!(mlp.input_dim(), 8);
        assert_eq!(mlp.output_dim(), 8);
        assert_eq!(mlp.parameters(), 8 * 32 + 32 + 32 * 8 + 8);
        assert!(mlp.v_layers.iter().all(|l| l.a_bias.iter().all(|&d| d == 0.0)));
    }

    #[test]
    fn mlp_rejects_empty_and_broken_chains() {
        assert!(matches!(
            FeedForward::from_layers(Vec::new()),
            Err(LlmError::InvalidParameter(_))
        ));
        let res = FeedForward::from_layers(vec![
            dense(Array2::zeros((3, 2)), Array2::zeros((1, 2))),
            dense(Array2::zeros((3, 1)), Array2::zeros((1, 1))),
        ]);
        assert!(matches!(res, Err(LlmError::DimensionMismatch { .. })));
    }

    #[test]
    fn dense_rejects_bias_width_mismatch() {
        let res = FeedForwardLayer::from_weights(Array2::zeros((3, 2)), Array2::zeros((1, 3)));
        assert!(matches!(res, Err(LlmError::DimensionMismatch { .. })));
    }

    #[test]
    fn backward_before_forward_fails() {
        let mut mlp = mlp_case_two();
        let res = mlp.backward(&array![[1.0]], 1.0);
        assert!(matches!(res, Err(LlmError::MissingForwardCache(_))));
    }
}
