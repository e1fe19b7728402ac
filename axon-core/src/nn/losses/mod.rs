//! Loss functions that turn a prediction and a label into the scalar loss and
//! the delta that starts backpropagation.

pub mod cross_entropy;
pub mod mse;

use crate::error::AxonError;
use crate::tensor::Tensor;
use std::fmt::Debug;

pub use cross_entropy::{BinaryCrossEntropy, CrossEntropy};
pub use mse::MeanSquaredError;

pub trait Loss: Debug + Send + Sync {
    /// Scalar loss of `predicted` against `expected`.
    fn loss(&self, predicted: &Tensor, expected: &Tensor) -> Result<f32, AxonError>;

    /// Gradient of the loss with respect to `predicted`, sized like it.
    fn derivative(&self, predicted: &Tensor, expected: &Tensor) -> Result<Tensor, AxonError>;
}

/// Labels are compared flat; only the element count has to agree.
pub(crate) fn check_label(predicted: &Tensor, expected: &Tensor) -> Result<(), AxonError> {
    if predicted.numel() != expected.numel() {
        return Err(AxonError::LabelMismatch {
            expected: predicted.numel(),
            actual: expected.numel(),
        });
    }
    Ok(())
}

/// Applies `f(p, y)` to every pair, keeping the size of `predicted`.
pub(crate) fn pairwise(
    predicted: &Tensor,
    expected: &Tensor,
    f: impl Fn(f32, f32) -> f32,
) -> Result<Tensor, AxonError> {
    check_label(predicted, expected)?;
    let value = predicted
        .value()
        .iter()
        .zip(expected.value())
        .map(|(&p, &y)| f(p, y))
        .collect();
    Tensor::new(value, predicted.size())
}
