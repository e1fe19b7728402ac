use crate::tensor::{rand_uniform, randn, Tensor, TensorSize};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Weight-initialization policy of a parameterized layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Initializer {
    /// `N(0, sqrt(2 / fan_in))`.
    #[default]
    HeNormal,
    /// `N(0, sqrt(2 / (fan_in + fan_out)))`.
    XavierNormal,
    /// `U(-sqrt(6 / fan_in), sqrt(6 / fan_in))`.
    HeUniform,
    /// `U(-sqrt(6 / (fan_in + fan_out)), sqrt(6 / (fan_in + fan_out)))`.
    XavierUniform,
}

impl Initializer {
    /// Draws a tensor of `size` for a layer with the given fan-in and fan-out.
    pub fn tensor<R: Rng + ?Sized>(
        &self,
        size: TensorSize,
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Tensor {
        let fan_in = fan_in.max(1) as f32;
        let fan_sum = fan_in + fan_out as f32;
        match self {
            Initializer::HeNormal => randn(size, 0.0, (2.0 / fan_in).sqrt(), rng),
            Initializer::XavierNormal => randn(size, 0.0, (2.0 / fan_sum).sqrt(), rng),
            Initializer::HeUniform => {
                let limit = (6.0 / fan_in).sqrt();
                rand_uniform(size, -limit, limit, rng)
            }
            Initializer::XavierUniform => {
                let limit = (6.0 / fan_sum).sqrt();
                rand_uniform(size, -limit, limit, rng)
            }
        }
    }
}

#[cfg(test)]
#[path = "init_test.rs"]
mod tests;
