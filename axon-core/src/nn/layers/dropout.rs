use crate::autograd::{BackwardOp, BackwardResult, Graph};
use crate::error::AxonError;
use crate::nn::layer::{Layer, LayerBase, LayerKind};
use crate::tensor::{ones, Tensor, TensorSize};
use crate::utils::lock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

/// Inverted dropout.
///
/// The mask holds `1 / (1 - rate)` for kept elements and 0 for dropped ones.
/// It is drawn at compile time and redrawn by every `apply`, so all samples of
/// a batch share one mask. The generator is seeded from the network's
/// generator, which makes masks reproducible for a seeded network.
#[derive(Debug, Clone)]
pub struct Dropout {
    base: LayerBase,
    rate: f32,
    mask: Arc<Mutex<Tensor>>,
    rng: Arc<Mutex<StdRng>>,
}

impl Dropout {
    /// # Errors
    /// `AxonError::ConfigurationError` unless `0 <= rate < 1`.
    pub fn new(rate: f32) -> Result<Self, AxonError> {
        if !(0.0..1.0).contains(&rate) {
            return Err(AxonError::ConfigurationError(format!(
                "dropout rate must be in [0, 1), got {}",
                rate
            )));
        }
        Ok(Dropout {
            base: LayerBase {
                trainable: false,
                ..LayerBase::default()
            },
            rate,
            mask: Arc::new(Mutex::new(Tensor::empty())),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(0))),
        })
    }

    pub fn with_input_size(mut self, size: TensorSize) -> Self {
        self.base.input_size = Some(size);
        self
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn mask(&self) -> Result<Tensor, AxonError> {
        Ok(lock(&self.mask, "dropout mask")?.clone())
    }

    /// Replaces the current mask.
    pub fn set_mask(&self, mask: Tensor) -> Result<(), AxonError> {
        let mut current = lock(&self.mask, "dropout mask")?;
        current.expect_size(mask.size(), "dropout set_mask")?;
        *current = mask;
        Ok(())
    }

    fn regenerate(&self) -> Result<(), AxonError> {
        let size = self.base.output_size;
        let keep = 1.0 / (1.0 - self.rate);
        let mut rng = lock(&self.rng, "dropout rng")?;
        let value = (0..size.numel())
            .map(|_| if rng.gen::<f32>() < self.rate { 0.0 } else { keep })
            .collect();
        *lock(&self.mask, "dropout mask")? = Tensor::new(value, size)?;
        Ok(())
    }
}

#[derive(Debug)]
struct DropoutBackward {
    mask: Tensor,
}

impl BackwardOp for DropoutBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<BackwardResult, AxonError> {
        let grad_input = grad_output.zip_map(&self.mask, "dropout backward", |g, m| g * m)?;
        Ok(BackwardResult::input(grad_input))
    }

    fn name(&self) -> &'static str {
        "DropoutBackward"
    }
}

impl Layer for Dropout {
    fn kind(&self) -> LayerKind {
        LayerKind::Dropout { rate: self.rate }
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn compile(&mut self, input_size: TensorSize, rng: &mut StdRng) -> Result<(), AxonError> {
        self.base.input_size = Some(input_size);
        self.base.output_size = input_size;
        self.rng = Arc::new(Mutex::new(StdRng::seed_from_u64(rng.gen())));
        self.mask = Arc::new(Mutex::new(ones(input_size)));
        self.regenerate()?;
        self.base.compiled = true;
        Ok(())
    }

    fn forward(&self, input: &Tensor, graph: &mut Graph) -> Result<Tensor, AxonError> {
        self.base.check_input(input, &self.kind())?;
        let mask = if self.base.training && !graph.is_inference() {
            self.mask()?
        } else {
            ones(input.size())
        };
        let output = input
            .zip_map(&mask, "dropout", |x, m| x * m)?
            .with_label("dropout");
        graph.record(output, &[input], DropoutBackward { mask })
    }

    fn uses_optimizer(&self) -> bool {
        false
    }

    /// Dropout owns no parameters; applying an update draws a new mask.
    fn apply(&mut self, _weights: &Tensor, _biases: &Tensor, _learning_rate: f32) -> Result<(), AxonError> {
        self.regenerate()
    }
}

#[cfg(test)]
#[path = "dropout_test.rs"]
mod tests;
