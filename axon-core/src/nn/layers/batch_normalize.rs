use crate::autograd::{BackwardOp, BackwardResult, Graph};
use crate::error::AxonError;
use crate::nn::batch_normalizer::{BatchNormalizer, Normalized};
use crate::nn::layer::{Layer, LayerBase, LayerDescriptor, LayerKind};
use crate::tensor::{Tensor, TensorSize};
use crate::utils::lock;
use log::warn;
use rand::rngs::StdRng;
use std::sync::{Arc, Mutex};

/// Batch normalization with one [`BatchNormalizer`] per depth channel.
///
/// Each channel is normalized over its plane. Gamma and beta live in the
/// normalizers and are updated during backpropagation with the layer's own
/// learning rate, so the layer reports no parameter gradients and `apply`
/// leaves it untouched. A non-trainable layer keeps gamma and beta fixed.
#[derive(Debug, Clone)]
pub struct BatchNormalize {
    base: LayerBase,
    learning_rate: f32,
    momentum: f32,
    epsilon: f32,
    normalizers: Arc<Mutex<Vec<BatchNormalizer>>>,
}

impl BatchNormalize {
    pub const DEFAULT_EPSILON: f32 = 1e-5;

    pub fn new(learning_rate: f32) -> Self {
        BatchNormalize {
            base: LayerBase::default(),
            learning_rate,
            momentum: BatchNormalizer::DEFAULT_MOMENTUM,
            epsilon: Self::DEFAULT_EPSILON,
            normalizers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_statistics(mut self, momentum: f32, epsilon: f32) -> Self {
        self.momentum = momentum;
        self.epsilon = epsilon;
        self
    }

    pub fn with_input_size(mut self, size: TensorSize) -> Self {
        self.base.input_size = Some(size);
        self
    }

    /// A copy of the per-channel normalizers.
    pub fn normalizers(&self) -> Result<Vec<BatchNormalizer>, AxonError> {
        Ok(lock(&self.normalizers, "batch normalizer")?.clone())
    }
}

#[derive(Debug)]
struct BatchNormalizeBackward {
    normalizers: Arc<Mutex<Vec<BatchNormalizer>>>,
    forward: Vec<Normalized>,
    size: TensorSize,
    training: bool,
    trainable: bool,
}

impl BackwardOp for BatchNormalizeBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<BackwardResult, AxonError> {
        if !self.training {
            // Inference normalization is an affine map with slope gamma / std.
            let mut grad = Vec::with_capacity(self.size.numel());
            for (d, forward) in self.forward.iter().enumerate() {
                let slope = forward.gamma / forward.std;
                grad.extend(grad_output.depth_slice(d).iter().map(|g| g * slope));
            }
            return Ok(BackwardResult::input(Tensor::new(grad, self.size)?));
        }

        if !self.trainable {
            let grad: Vec<f32> = self
                .forward
                .iter()
                .enumerate()
                .flat_map(|(d, forward)| {
                    BatchNormalizer::input_gradient(forward, grad_output.depth_slice(d))
                })
                .collect();
            return Ok(BackwardResult::input(Tensor::new(grad, self.size)?));
        }

        let mut normalizers = lock(&self.normalizers, "batch normalizer")?;
        let mut grad = Vec::with_capacity(self.size.numel());
        for (d, (normalizer, forward)) in normalizers.iter_mut().zip(&self.forward).enumerate() {
            grad.extend(normalizer.backward(forward, grad_output.depth_slice(d)));
            if !normalizer.is_finite() {
                warn!("batch normalizer for channel {} became non-finite", d);
            }
        }
        Ok(BackwardResult::input(Tensor::new(grad, self.size)?))
    }

    fn name(&self) -> &'static str {
        "BatchNormalizeBackward"
    }
}

impl Layer for BatchNormalize {
    fn kind(&self) -> LayerKind {
        LayerKind::BatchNormalize {
            learning_rate: self.learning_rate,
            momentum: self.momentum,
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
        let normalizers = (0..input_size.depth)
            .map(|_| {
                BatchNormalizer::new(self.learning_rate)
                    .with_momentum(self.momentum)
                    .with_epsilon(self.epsilon)
            })
            .collect();
        // A fresh Arc so clones of an earlier compile keep their own statistics.
        self.normalizers = Arc::new(Mutex::new(normalizers));
        self.base.compiled = true;
        Ok(())
    }

    fn forward(&self, input: &Tensor, graph: &mut Graph) -> Result<Tensor, AxonError> {
        let size = self.base.check_input(input, &self.kind())?;
        let training = self.base.training && !graph.is_inference();
        let forward: Vec<Normalized> = {
            let mut normalizers = lock(&self.normalizers, "batch normalizer")?;
            normalizers
                .iter_mut()
                .enumerate()
                .map(|(d, normalizer)| {
                    let plane = input.depth_slice(d);
                    if training {
                        normalizer.normalize(plane)
                    } else {
                        normalizer.normalize_inference(plane)
                    }
                })
                .collect()
        };

        let value: Vec<f32> = forward.iter().flat_map(|f| f.output.iter().copied()).collect();
        let output = Tensor::new(value, size)?.with_label("batch_normalize");
        graph.record(
            output,
            &[input],
            BatchNormalizeBackward {
                normalizers: Arc::clone(&self.normalizers),
                forward,
                size,
                training,
                trainable: self.base.trainable,
            },
        )
    }

    fn uses_optimizer(&self) -> bool {
        false
    }

    fn apply(&mut self, _weights: &Tensor, _biases: &Tensor, _learning_rate: f32) -> Result<(), AxonError> {
        Ok(())
    }

    /// `[gamma, beta, moving_mean, moving_variance]`, one value per channel each.
    fn state(&self) -> Result<Vec<Tensor>, AxonError> {
        let normalizers = lock(&self.normalizers, "batch normalizer")?;
        let column = |f: fn(&BatchNormalizer) -> f32| {
            Tensor::from(normalizers.iter().map(f).collect::<Vec<f32>>())
        };
        Ok(vec![
            column(|n| n.gamma),
            column(|n| n.beta),
            column(|n| n.moving_mean),
            column(|n| n.moving_variance),
        ])
    }

    fn restore(&mut self, descriptor: &LayerDescriptor) -> Result<(), AxonError> {
        let mut normalizers = lock(&self.normalizers, "batch normalizer")?;
        let [gamma, beta, mean, variance] = descriptor.state.as_slice() else {
            return Err(AxonError::DescriptorError(format!(
                "batch normalization expects 4 state tensors, got {}",
                descriptor.state.len()
            )));
        };
        if [gamma, beta, mean, variance]
            .iter()
            .any(|t| t.value.len() != normalizers.len())
        {
            return Err(AxonError::DescriptorError(format!(
                "batch normalization state does not cover {} channels",
                normalizers.len()
            )));
        }
        for (d, normalizer) in normalizers.iter_mut().enumerate() {
            normalizer.gamma = gamma.value[d];
            normalizer.beta = beta.value[d];
            normalizer.moving_mean = mean.value[d];
            normalizer.moving_variance = variance.value[d];
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "batch_normalize_test.rs"]
mod tests;
