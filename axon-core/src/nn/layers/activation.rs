use crate::autograd::{BackwardOp, BackwardResult, Graph};
use crate::device::Activation;
use crate::error::AxonError;
use crate::nn::layer::{Layer, LayerBase, LayerKind};
use crate::tensor::{Tensor, TensorSize};
use rand::rngs::StdRng;

/// Applies an element-wise [`Activation`] through the layer's device.
#[derive(Debug, Clone)]
pub struct ActivationLayer {
    base: LayerBase,
    activation: Activation,
}

impl ActivationLayer {
    pub fn new(activation: Activation) -> Self {
        ActivationLayer {
            base: LayerBase::default(),
            activation,
        }
    }

    pub fn relu() -> Self {
        ActivationLayer::new(Activation::ReLu)
    }

    pub fn leaky_relu(limit: f32) -> Self {
        ActivationLayer::new(Activation::LeakyReLu { limit })
    }

    pub fn sigmoid() -> Self {
        ActivationLayer::new(Activation::Sigmoid)
    }

    pub fn tanh() -> Self {
        ActivationLayer::new(Activation::Tanh)
    }

    pub fn swish() -> Self {
        ActivationLayer::new(Activation::Swish)
    }

    pub fn with_input_size(mut self, size: TensorSize) -> Self {
        self.base.input_size = Some(size);
        self
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

#[derive(Debug)]
struct ActivationBackward {
    /// `f'(x)` at the forward input.
    derivative: Tensor,
}

impl BackwardOp for ActivationBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<BackwardResult, AxonError> {
        let grad_input = grad_output.zip_map(&self.derivative, "activation backward", |g, d| g * d)?;
        Ok(BackwardResult::input(grad_input))
    }

    fn name(&self) -> &'static str {
        "ActivationBackward"
    }
}

impl Layer for ActivationLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Activation(self.activation)
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
        self.base.compiled = true;
        Ok(())
    }

    fn forward(&self, input: &Tensor, graph: &mut Graph) -> Result<Tensor, AxonError> {
        self.base.check_input(input, &self.kind())?;
        let device = &self.base.device;
        let output = device.activate(input, self.activation, false)?;
        let derivative = device.activate(input, self.activation, true)?;
        graph.record(
            output.with_label(self.activation.name()),
            &[input],
            ActivationBackward { derivative },
        )
    }
}

#[cfg(test)]
#[path = "activation_test.rs"]
mod tests;
