use crate::autograd::{BackwardOp, BackwardResult, Graph};
use crate::error::AxonError;
use crate::nn::layer::{Layer, LayerBase, LayerKind};
use crate::tensor::{Tensor, TensorSize};
use rand::rngs::StdRng;

/// Views the input with a different size holding the same number of values.
#[derive(Debug, Clone)]
pub struct Reshape {
    base: LayerBase,
    size: TensorSize,
}

impl Reshape {
    pub fn new(size: TensorSize) -> Self {
        Reshape {
            base: LayerBase::default(),
            size,
        }
    }

    pub fn with_input_size(mut self, size: TensorSize) -> Self {
        self.base.input_size = Some(size);
        self
    }
}

/// Reshape to a single `(n, 1, 1)` row.
#[derive(Debug, Clone, Default)]
pub struct Flatten {
    base: LayerBase,
}

impl Flatten {
    pub fn new() -> Self {
        Flatten::default()
    }

    pub fn with_input_size(mut self, size: TensorSize) -> Self {
        self.base.input_size = Some(size);
        self
    }
}

#[derive(Debug)]
struct ReshapeBackward {
    input_size: TensorSize,
}

impl BackwardOp for ReshapeBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<BackwardResult, AxonError> {
        Ok(BackwardResult::input(grad_output.reshaped(self.input_size)?))
    }

    fn name(&self) -> &'static str {
        "ReshapeBackward"
    }
}

fn reshape_forward(
    base: &LayerBase,
    kind: &LayerKind,
    input: &Tensor,
    graph: &mut Graph,
) -> Result<Tensor, AxonError> {
    let input_size = base.check_input(input, kind)?;
    let output = input.reshaped(base.output_size)?.with_label(kind.name());
    graph.record(output, &[input], ReshapeBackward { input_size })
}

impl Layer for Reshape {
    fn kind(&self) -> LayerKind {
        LayerKind::Reshape { size: self.size }
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn compile(&mut self, input_size: TensorSize, _rng: &mut StdRng) -> Result<(), AxonError> {
        if input_size.numel() != self.size.numel() {
            return Err(AxonError::ShapeMismatch {
                expected: self.size,
                actual: input_size,
                operation: "reshape compile".to_string(),
            });
        }
        self.base.input_size = Some(input_size);
        self.base.output_size = self.size;
        self.base.compiled = true;
        Ok(())
    }

    fn forward(&self, input: &Tensor, graph: &mut Graph) -> Result<Tensor, AxonError> {
        reshape_forward(&self.base, &self.kind(), input, graph)
    }
}

impl Layer for Flatten {
    fn kind(&self) -> LayerKind {
        LayerKind::Flatten
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn compile(&mut self, input_size: TensorSize, _rng: &mut StdRng) -> Result<(), AxonError> {
        self.base.input_size = Some(input_size);
        self.base.output_size = TensorSize::new(input_size.numel(), 1, 1);
        self.base.compiled = true;
        Ok(())
    }

    fn forward(&self, input: &Tensor, graph: &mut Graph) -> Result<Tensor, AxonError> {
        reshape_forward(&self.base, &self.kind(), input, graph)
    }
}
