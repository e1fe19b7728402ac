use crate::tensor::{Tensor, TensorSize};

/// Checks if two tensors are approximately equal (size and data within tolerance).
/// Panics if sizes differ or data differs significantly.
pub fn check_tensor_near(
    actual: &Tensor,
    expected_shape: &[usize],
    expected_data: &[f32],
    tolerance: f32,
) {
    assert_eq!(
        actual.size(),
        TensorSize::from_shape(expected_shape),
        "Shape mismatch"
    );
    assert_eq!(
        actual.value().len(),
        expected_data.len(),
        "Data length mismatch"
    );

    for (i, (a, e)) in actual.value().iter().zip(expected_data.iter()).enumerate() {
        let diff = (*a - *e).abs();
        if diff > tolerance {
            panic!(
                "Data mismatch at index {}: actual={:?}, expected={:?}, diff={:?}, tolerance={:?}",
                i, a, e, diff, tolerance
            );
        }
    }
}

/// Helper to create a tensor from flat data and a `[columns, rows, depth]` shape.
pub fn create_test_tensor(data: Vec<f32>, shape: &[usize]) -> Tensor {
    Tensor::new(data, TensorSize::from_shape(shape)).expect("Failed to create test tensor")
}
