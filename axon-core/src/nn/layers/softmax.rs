use crate::autograd::{BackwardOp, BackwardResult, Graph};
use crate::error::AxonError;
use crate::nn::layer::{Layer, LayerBase, LayerKind};
use crate::tensor::{Tensor, TensorSize};
use rand::rngs::StdRng;

/// Softmax over every element of the input.
///
/// The backward pass hands the incoming gradient through unchanged: it is
/// meant to sit in front of [`CrossEntropy`](crate::nn::losses::CrossEntropy),
/// whose derivative is already taken with respect to the softmax input.
#[derive(Debug, Clone, Default)]
pub struct Softmax {
    base: LayerBase,
}

impl Softmax {
    pub fn new() -> Self {
        Softmax::default()
    }

    pub fn with_input_size(mut self, size: TensorSize) -> Self {
        self.base.input_size = Some(size);
        self
    }
}

#[derive(Debug)]
struct SoftmaxBackward;

impl BackwardOp for SoftmaxBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<BackwardResult, AxonError> {
        Ok(BackwardResult::input(grad_output.detached()))
    }

    fn name(&self) -> &'static str {
        "SoftmaxBackward"
    }
}

impl Layer for Softmax {
    fn kind(&self) -> LayerKind {
        LayerKind::Softmax
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
        let max = input
            .value()
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        let exp = input.map(|x| (x - max).exp());
        let sum = exp.sum();
        let output = exp.map(|e| e / sum).with_label("softmax");
        graph.record(output, &[input], SoftmaxBackward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    #[test]
    fn test_softmax_is_stable_for_large_inputs() -> Result<(), AxonError> {
        let mut softmax = Softmax::new();
        softmax.compile(TensorSize::new(3, 1, 1), &mut StdRng::seed_from_u64(0))?;
        let output = softmax.forward(&Tensor::from_1d(&[1000.0, 1001.0, 1002.0]), &mut Graph::new())?;
        assert!(output.is_finite());
        assert_relative_eq!(output.sum(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(output.value()[2], 0.66524096, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_softmax_backward_passes_gradient() -> Result<(), AxonError> {
        let mut softmax = Softmax::new();
        softmax.compile(TensorSize::new(2, 1, 1), &mut StdRng::seed_from_u64(0))?;
        let mut graph = Graph::new();
        let output = softmax.forward(&Tensor::from_1d(&[0.1, 0.2]), &mut graph)?;
        let delta = Tensor::from_1d(&[0.3, -0.3]);
        let gradients = graph.gradients(&output, &delta)?;
        assert_eq!(gradients.input[0], delta);
        Ok(())
    }
}
