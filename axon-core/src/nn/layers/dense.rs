use crate::autograd::{BackwardOp, BackwardResult, Graph};
use crate::error::AxonError;
use crate::nn::init::Initializer;
use crate::nn::layer::{Layer, LayerBase, LayerKind};
use crate::tensor::{zeros, Tensor, TensorSize};
use rand::rngs::StdRng;

/// Fully connected layer: `y = W·x + b`.
///
/// `W` has `outputs` rows and one column per input value; the input is read
/// flat whatever its size. The output is a `(outputs, 1, 1)` row.
#[derive(Debug, Clone)]
pub struct Dense {
    base: LayerBase,
    outputs: usize,
}

impl Dense {
    pub fn new(outputs: usize) -> Self {
        Dense {
            base: LayerBase {
                bias_enabled: true,
                ..LayerBase::default()
            },
            outputs,
        }
    }

    pub fn with_bias(mut self, enabled: bool) -> Self {
        self.base.bias_enabled = enabled;
        self
    }

    pub fn with_initializer(mut self, initializer: Initializer) -> Self {
        self.base.initializer = initializer;
        self
    }

    pub fn with_input_size(mut self, size: TensorSize) -> Self {
        self.base.input_size = Some(size);
        self
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }
}

#[derive(Debug)]
struct DenseBackward {
    input: Tensor,
    weights: Tensor,
    bias_enabled: bool,
}

impl BackwardOp for DenseBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<BackwardResult, AxonError> {
        let inputs = self.weights.size().columns;
        let x = self.input.value();
        let w = self.weights.value();
        let g = grad_output.value();

        let mut grad_input = vec![0.0; inputs];
        let mut grad_weights = vec![0.0; w.len()];
        for (o, &go) in g.iter().enumerate() {
            let row = &w[o * inputs..(o + 1) * inputs];
            let grad_row = &mut grad_weights[o * inputs..(o + 1) * inputs];
            for i in 0..inputs {
                grad_input[i] += row[i] * go;
                grad_row[i] = go * x[i];
            }
        }

        let grad_input = Tensor::new(grad_input, self.input.size())?;
        let grad_weights = Tensor::new(grad_weights, self.weights.size())?;
        let grad_biases = self.bias_enabled.then(|| grad_output.detached());
        Ok(BackwardResult::input(grad_input).with_parameters(grad_weights, grad_biases))
    }

    fn name(&self) -> &'static str {
        "DenseBackward"
    }
}

impl Layer for Dense {
    fn kind(&self) -> LayerKind {
        LayerKind::Dense {
            outputs: self.outputs,
        }
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn compile(&mut self, input_size: TensorSize, rng: &mut StdRng) -> Result<(), AxonError> {
        if self.outputs == 0 {
            return Err(AxonError::ConfigurationError(
                "dense layer needs at least one output".to_string(),
            ));
        }
        let inputs = input_size.numel();
        if inputs == 0 {
            return Err(AxonError::ConfigurationError(format!(
                "dense layer needs a non-empty input, got {}",
                input_size
            )));
        }
        self.base.input_size = Some(input_size);
        self.base.output_size = TensorSize::new(self.outputs, 1, 1);
        self.base.weights = self.base.initializer.tensor(
            TensorSize::new(inputs, self.outputs, 1),
            inputs,
            self.outputs,
            rng,
        );
        self.base.biases = if self.base.bias_enabled {
            zeros(TensorSize::new(self.outputs, 1, 1))
        } else {
            Tensor::empty()
        };
        self.base.compiled = true;
        Ok(())
    }

    fn forward(&self, input: &Tensor, graph: &mut Graph) -> Result<Tensor, AxonError> {
        let input_size = self.base.check_input(input, &self.kind())?;
        let inputs = input_size.numel();
        let x = input.value();
        let w = self.base.weights.value();

        let mut out: Vec<f32> = w
            .chunks(inputs)
            .map(|row| row.iter().zip(x).map(|(w, x)| w * x).sum())
            .collect();
        if self.base.bias_enabled {
            for (o, b) in out.iter_mut().zip(self.base.biases.value()) {
                *o += b;
            }
        }

        let output = Tensor::new(out, self.base.output_size)?.with_label("dense");
        graph.record(
            output,
            &[input],
            DenseBackward {
                input: input.detached(),
                weights: self.base.weights.clone(),
                bias_enabled: self.base.bias_enabled,
            },
        )
    }
}

#[cfg(test)]
#[path = "dense_test.rs"]
mod tests;
