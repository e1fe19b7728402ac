use super::MeanSquaredError;
use crate::error::AxonError;
use crate::nn::losses::Loss;
use crate::tensor::Tensor;
use crate::utils::testing::{check_tensor_near, create_test_tensor};
use approx::assert_relative_eq;

#[test]
fn test_mse_loss_basic() -> Result<(), AxonError> {
    let mse = MeanSquaredError::new();
    let predicted = Tensor::from(vec![1.0, 2.0]);
    let expected = Tensor::from(vec![1.5, 1.0]);
    // (0.25 + 1.0) / 2
    assert_relative_eq!(mse.loss(&predicted, &expected)?, 0.625, epsilon = 1e-6);
    Ok(())
}

#[test]
fn test_mse_loss_zero_on_match() -> Result<(), AxonError> {
    let mse = MeanSquaredError::new();
    let t = Tensor::from(vec![0.3, -0.7, 2.0]);
    assert_relative_eq!(mse.loss(&t, &t)?, 0.0);
    Ok(())
}

#[test]
fn test_mse_derivative() -> Result<(), AxonError> {
    let mse = MeanSquaredError::new();
    let predicted = create_test_tensor(vec![1.0, 2.0, 0.0, 4.0], &[2, 2, 1]);
    let expected = Tensor::from(vec![0.0, 2.0, 1.0, 2.0]);
    let grad = mse.derivative(&predicted, &expected)?;
    check_tensor_near(&grad, &[2, 2, 1], &[0.5, 0.0, -0.5, 1.0], 1e-6);
    Ok(())
}

#[test]
fn test_mse_label_mismatch() {
    let mse = MeanSquaredError::new();
    let predicted = Tensor::from(vec![1.0, 2.0]);
    let expected = Tensor::from(vec![1.0, 2.0, 3.0]);
    assert_eq!(
        mse.loss(&predicted, &expected),
        Err(AxonError::LabelMismatch {
            expected: 2,
            actual: 3
        })
    );
    assert!(matches!(
        mse.derivative(&predicted, &expected),
        Err(AxonError::LabelMismatch { .. })
    ));
}
