//! Axon: layered neural networks trained with Adam.
//!
//! A [`Sequential`] network records every layer's backward rule in a per-pass
//! [`Graph`]; [`Adam`] runs batches on a worker pool, averages the sample
//! gradients and updates the layers.

pub mod autograd;
pub mod device;
pub mod error;
pub mod model;
pub mod nn;
pub mod optim;
pub mod tensor;
pub mod utils;

pub use autograd::{Gradients, Graph};
pub use device::{Activation, Cpu, Device, Padding};
pub use error::AxonError;
pub use model::Sequential;
pub use optim::{Adam, AdamConfig, GradientAccumulator, Optimizer};
pub use tensor::{Tensor, TensorSize};
