//! Concrete [`Layer`](crate::nn::Layer) variants.

pub mod activation;
pub mod batch_normalize;
pub mod conv2d;
pub mod dense;
pub mod dropout;
pub mod layer_normalize;
pub mod max_pool;
pub mod reshape;
pub mod softmax;
pub mod trans_conv2d;

pub use activation::ActivationLayer;
pub use batch_normalize::BatchNormalize;
pub use conv2d::Conv2d;
pub use dense::Dense;
pub use dropout::Dropout;
pub use layer_normalize::LayerNormalize;
pub use max_pool::MaxPool;
pub use reshape::{Flatten, Reshape};
pub use softmax::Softmax;
pub use trans_conv2d::TransConv2d;
