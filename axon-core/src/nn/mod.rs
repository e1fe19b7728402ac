// src/nn/mod.rs
// Layers, their parameter initialization and the loss functions.

pub mod batch_normalizer;
pub mod init;
pub mod layer;
pub mod layers;
pub mod losses;

pub use batch_normalizer::BatchNormalizer;
pub use init::Initializer;
pub use layer::{Layer, LayerBase, LayerDescriptor, LayerKind, ParameterData};
pub use layers::{
    ActivationLayer, BatchNormalize, Conv2d, Dense, Dropout, Flatten, LayerNormalize, MaxPool,
    Reshape, Softmax, TransConv2d,
};
pub use losses::{BinaryCrossEntropy, CrossEntropy, Loss, MeanSquaredError};
