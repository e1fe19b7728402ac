// src/optim/mod.rs

//! Gradient accumulation and the Adam optimizer.
//!
//! A training step is split in two: [`Adam::train_on`] runs a batch on the
//! worker pool and sums per-sample gradients in a [`GradientAccumulator`],
//! then [`Optimizer::step`] averages them and updates the layers.

pub mod adam;
pub mod gradient_accumulator;
pub mod metrics;
pub mod optimizer_trait;

pub use adam::{Adam, AdamConfig, BatchReport};
pub use gradient_accumulator::{AveragedGradients, GradientAccumulator, ParameterSizes};
pub use metrics::{Metric, MetricsReporter};
pub use optimizer_trait::{Optimizer, StepReport};
