use crate::tensor::{Tensor, TensorSize};
use rand::Rng;
use rand_distr::{Distribution, Normal, StandardNormal, Uniform};

/// Tensor of `size` filled with zeros.
pub fn zeros(size: TensorSize) -> Tensor {
    full(size, 0.0)
}

/// Tensor of `size` filled with ones.
pub fn ones(size: TensorSize) -> Tensor {
    full(size, 1.0)
}

/// Tensor of `size` filled with `value`.
pub fn full(size: TensorSize, value: f32) -> Tensor {
    Tensor {
        value: vec![value; size.numel()],
        size,
        label: None,
        node: None,
    }
}

/// Zero tensor with the size of `tensor`.
pub fn zeros_like(tensor: &Tensor) -> Tensor {
    zeros(tensor.size())
}

// Random constructors take the generator explicitly so that a seeded network
// initializes the same way every time.

/// Samples from `N(mean, std)`; a non-positive `std` falls back to the standard normal.
pub fn randn<R: Rng + ?Sized>(size: TensorSize, mean: f32, std: f32, rng: &mut R) -> Tensor {
    let value: Vec<f32> = match Normal::new(mean, std) {
        Ok(normal) if std > 0.0 => (0..size.numel()).map(|_| normal.sample(rng)).collect(),
        _ => (0..size.numel())
            .map(|_| StandardNormal.sample(rng))
            .collect(),
    };
    Tensor {
        value,
        size,
        label: None,
        node: None,
    }
}

/// Samples uniformly from `[low, high)`.
pub fn rand_uniform<R: Rng + ?Sized>(size: TensorSize, low: f32, high: f32, rng: &mut R) -> Tensor {
    let value: Vec<f32> = if high > low {
        let uniform = Uniform::new(low, high);
        (0..size.numel()).map(|_| uniform.sample(rng)).collect()
    } else {
        vec![low; size.numel()]
    };
    Tensor {
        value,
        size,
        label: None,
        node: None,
    }
}

#[cfg(test)]
#[path = "create_test.rs"]
mod tests;
