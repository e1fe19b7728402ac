use super::{check_label, pairwise, Loss};
use crate::error::AxonError;
use crate::tensor::Tensor;

/// Probabilities are clamped away from 0 and 1 before taking logarithms.
const PROBABILITY_FLOOR: f32 = 1e-7;

/// Categorical cross-entropy over a probability vector, `-Σ y·ln(p)`.
///
/// The derivative is the combined softmax/cross-entropy gradient `p - y`,
/// matching the pass-through backward of [`Softmax`](crate::nn::Softmax).
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropy;

impl CrossEntropy {
    pub fn new() -> Self {
        CrossEntropy
    }
}

impl Loss for CrossEntropy {
    fn loss(&self, predicted: &Tensor, expected: &Tensor) -> Result<f32, AxonError> {
        check_label(predicted, expected)?;
        Ok(-predicted
            .value()
            .iter()
            .zip(expected.value())
            .map(|(p, y)| y * p.max(PROBABILITY_FLOOR).ln())
            .sum::<f32>())
    }

    fn derivative(&self, predicted: &Tensor, expected: &Tensor) -> Result<Tensor, AxonError> {
        pairwise(predicted, expected, |p, y| p - y)
    }
}

/// Element-wise binary cross-entropy averaged over the outputs, for
/// independent sigmoid outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCrossEntropy;

impl BinaryCrossEntropy {
    pub fn new() -> Self {
        BinaryCrossEntropy
    }
}

fn clamp_probability(p: f32) -> f32 {
    p.clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR)
}

impl Loss for BinaryCrossEntropy {
    fn loss(&self, predicted: &Tensor, expected: &Tensor) -> Result<f32, AxonError> {
        check_label(predicted, expected)?;
        let n = predicted.numel().max(1) as f32;
        let sum: f32 = predicted
            .value()
            .iter()
            .zip(expected.value())
            .map(|(&p, &y)| {
                let p = clamp_probability(p);
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            })
            .sum();
        Ok(sum / n)
    }

    fn derivative(&self, predicted: &Tensor, expected: &Tensor) -> Result<Tensor, AxonError> {
        let n = predicted.numel().max(1) as f32;
        pairwise(predicted, expected, |p, y| {
            let p = clamp_probability(p);
            (p - y) / (p * (1.0 - p)) / n
        })
    }
}

#[cfg(test)]
#[path = "cross_entropy_test.rs"]
mod tests;
