use crate::autograd::{BackwardOp, BackwardResult, Graph};
use crate::error::AxonError;
use crate::nn::layer::{Layer, LayerBase, LayerKind};
use crate::tensor::{zeros, Tensor, TensorSize};
use rand::rngs::StdRng;

const WINDOW: usize = 2;
const STRIDE: usize = 2;

/// 2x2 max pooling with stride 2, per depth channel.
///
/// Edges that do not fill a whole window are pooled over the values that
/// exist, so the output is `ceil(input / 2)` along each axis.
#[derive(Debug, Clone, Default)]
pub struct MaxPool {
    base: LayerBase,
}

impl MaxPool {
    pub fn new() -> Self {
        MaxPool::default()
    }

    pub fn with_input_size(mut self, size: TensorSize) -> Self {
        self.base.input_size = Some(size);
        self
    }
}

#[derive(Debug)]
struct MaxPoolBackward {
    input_size: TensorSize,
    /// Flat input index of the maximum for every output element.
    argmax: Vec<usize>,
}

impl BackwardOp for MaxPoolBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<BackwardResult, AxonError> {
        let mut grad_input = zeros(self.input_size);
        let values = grad_output.value();
        let grad = grad_input.value_mut();
        for (&index, &g) in self.argmax.iter().zip(values) {
            grad[index] += g;
        }
        Ok(BackwardResult::input(grad_input))
    }

    fn name(&self) -> &'static str {
        "MaxPoolBackward"
    }
}

impl Layer for MaxPool {
    fn kind(&self) -> LayerKind {
        LayerKind::MaxPool
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn compile(&mut self, input_size: TensorSize, _rng: &mut StdRng) -> Result<(), AxonError> {
        self.base.input_size = Some(input_size);
        self.base.output_size = TensorSize::new(
            (input_size.columns + STRIDE - 1) / STRIDE,
            (input_size.rows + STRIDE - 1) / STRIDE,
            input_size.depth,
        );
        self.base.compiled = true;
        Ok(())
    }

    fn forward(&self, input: &Tensor, graph: &mut Graph) -> Result<Tensor, AxonError> {
        let size = self.base.check_input(input, &self.kind())?;
        let out_size = self.base.output_size;
        let mut output = Vec::with_capacity(out_size.numel());
        let mut argmax = Vec::with_capacity(out_size.numel());

        for d in 0..size.depth {
            for y in 0..out_size.rows {
                for x in 0..out_size.columns {
                    let mut best = size.index(x * STRIDE, y * STRIDE, d);
                    for r in y * STRIDE..(y * STRIDE + WINDOW).min(size.rows) {
                        for c in x * STRIDE..(x * STRIDE + WINDOW).min(size.columns) {
                            let index = size.index(c, r, d);
                            if input.value()[index] > input.value()[best] {
                                best = index;
                            }
                        }
                    }
                    output.push(input.value()[best]);
                    argmax.push(best);
                }
            }
        }

        let output = Tensor::new(output, out_size)?.with_label("max_pool");
        graph.record(
            output,
            &[input],
            MaxPoolBackward {
                input_size: size,
                argmax,
            },
        )
    }
}

#[cfg(test)]
#[path = "max_pool_test.rs"]
mod tests;
