use crate::tensor::TensorSize;
use thiserror::Error;

/// Custom error type for the Axon framework.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum AxonError {
    #[error("Shape mismatch: expected {expected}, got {actual} during operation {operation}")]
    ShapeMismatch {
        expected: TensorSize,
        actual: TensorSize,
        operation: String,
    },

    #[error("Tensor creation error: data length {data_len} does not match size {size}")]
    TensorCreationError { data_len: usize, size: TensorSize },

    #[error("Layer {layer} ({kind}) has no input size; set it on the first layer before compiling")]
    MissingInputSize { layer: usize, kind: String },

    #[error("Network must be compiled before {operation}")]
    NotCompiled { operation: String },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Label has {actual} values but the output layer produces {expected}")]
    LabelMismatch { expected: usize, actual: usize },

    #[error("Moment state for layer {layer} has size {expected}, gradient has size {actual}; rebuild the optimizer after changing the network")]
    MomentShapeMismatch {
        layer: usize,
        expected: TensorSize,
        actual: TensorSize,
    },

    #[error("Non-finite gradient for layer {layer}")]
    NonFiniteGradient { layer: usize },

    #[error("Non-finite parameter in layer {layer} after update")]
    NonFiniteParameter { layer: usize },

    #[error("Tensor belongs to graph {tensor_graph}, not graph {graph}")]
    ForeignTensor { graph: u64, tensor_graph: u64 },

    #[error("Graph error: {0}")]
    GraphError(String),

    #[error("Layer index {index} out of bounds for {count} layers")]
    LayerIndexOutOfBounds { index: usize, count: usize },

    #[error("Failed to acquire {lock_type} lock: {reason}")]
    LockError { lock_type: String, reason: String },

    #[error("Cannot rebuild layer from descriptor: {0}")]
    DescriptorError(String),

    #[error("Every sample in the batch failed; first error: {0}")]
    BatchFailed(Box<AxonError>),

    #[error("Cannot run an empty batch")]
    EmptyBatch,
}
