use super::{check_label, pairwise, Loss};
use crate::error::AxonError;
use crate::tensor::Tensor;

/// Mean squared error: `Σ (p - y)² / N`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaredError;

impl MeanSquaredError {
    pub fn new() -> Self {
        MeanSquaredError
    }
}

impl Loss for MeanSquaredError {
    fn loss(&self, predicted: &Tensor, expected: &Tensor) -> Result<f32, AxonError> {
        check_label(predicted, expected)?;
        let n = predicted.numel().max(1) as f32;
        let sum: f32 = predicted
            .value()
            .iter()
            .zip(expected.value())
            .map(|(p, y)| (p - y).powi(2))
            .sum();
        Ok(sum / n)
    }

    fn derivative(&self, predicted: &Tensor, expected: &Tensor) -> Result<Tensor, AxonError> {
        let n = predicted.numel().max(1) as f32;
        pairwise(predicted, expected, |p, y| 2.0 * (p - y) / n)
    }
}

#[cfg(test)]
#[path = "mse_test.rs"]
mod tests;
