use crate::autograd::{BackwardOp, BackwardResult, Graph};
use crate::error::AxonError;
use crate::nn::layer::{Layer, LayerBase, LayerKind};
use crate::tensor::{ones, zeros, Tensor, TensorSize};
use rand::rngs::StdRng;

/// Layer normalization over the whole sample.
///
/// Gamma (the weights) and beta (the biases) are element-wise and have the
/// input's size. Unlike [`BatchNormalize`](super::BatchNormalize) they are
/// trained through the optimizer.
#[derive(Debug, Clone)]
pub struct LayerNormalize {
    base: LayerBase,
    epsilon: f32,
}

impl Default for LayerNormalize {
    fn default() -> Self {
        LayerNormalize::new()
    }
}

impl LayerNormalize {
    pub const DEFAULT_EPSILON: f32 = 1e-5;

    pub fn new() -> Self {
        LayerNormalize {
            base: LayerBase {
                bias_enabled: true,
                ..LayerBase::default()
            },
            epsilon: Self::DEFAULT_EPSILON,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_input_size(mut self, size: TensorSize) -> Self {
        self.base.input_size = Some(size);
        self
    }
}

#[derive(Debug)]
struct LayerNormalizeBackward {
    normalized: Tensor,
    gamma: Tensor,
    std: f32,
}

impl BackwardOp for LayerNormalizeBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<BackwardResult, AxonError> {
        let n = self.normalized.numel() as f32;
        let dx_norm = grad_output.zip_map(&self.gamma, "layer_normalize backward", |g, w| g * w)?;
        let dx_norm_sum = dx_norm.sum();
        let dx_norm_dot: f32 = dx_norm
            .value()
            .iter()
            .zip(self.normalized.value())
            .map(|(d, x)| d * x)
            .sum();

        let grad_input = dx_norm.zip_map(&self.normalized, "layer_normalize backward", |d, x| {
            (n * d - dx_norm_sum - x * dx_norm_dot) / (n * self.std)
        })?;
        let grad_gamma = grad_output.zip_map(&self.normalized, "layer_normalize backward", |g, x| g * x)?;
        Ok(BackwardResult::input(grad_input).with_parameters(grad_gamma, Some(grad_output.detached())))
    }

    fn name(&self) -> &'static str {
        "LayerNormalizeBackward"
    }
}

impl Layer for LayerNormalize {
    fn kind(&self) -> LayerKind {
        LayerKind::LayerNormalize {
            epsilon: self.epsilon,
        }
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn compile(&mut self, input_size: TensorSize, _rng: &mut StdRng) -> Result<(), AxonError> {
        self.base.input_size = Some(input_size);
        self.base.output_size = input_size;
        self.base.weights = ones(input_size);
        self.base.biases = zeros(input_size);
        self.base.compiled = true;
        Ok(())
    }

    fn forward(&self, input: &Tensor, graph: &mut Graph) -> Result<Tensor, AxonError> {
        self.base.check_input(input, &self.kind())?;
        let n = input.numel().max(1) as f32;
        let mean = input.sum() / n;
        let variance = input.value().iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
        let std = (variance + self.epsilon).sqrt();

        let normalized = input.map(|x| (x - mean) / std);
        let scaled = normalized.zip_map(&self.base.weights, "layer_normalize", |x, g| g * x)?;
        let output = scaled
            .zip_map(&self.base.biases, "layer_normalize", |y, b| y + b)?
            .with_label("layer_normalize");
        graph.record(
            output,
            &[input],
            LayerNormalizeBackward {
                normalized,
                gamma: self.base.weights.clone(),
                std,
            },
        )
    }
}

#[cfg(test)]
#[path = "layer_normalize_test.rs"]
mod tests;
