use crate::error::AxonError;
use crate::tensor::Tensor;
use std::fmt::Debug;

/// Defines the interface for the backward pass of a recorded layer operation.
///
/// Every node a layer records in a [`Graph`](super::Graph) owns one
/// `BackwardOp`. The op captures whatever the forward pass computed that the
/// Jacobian-vector product needs (the input, a weight snapshot, arg-max
/// positions, normalized activations, ...).
///
/// The trait requires `Debug + Send + Sync` because graphs are built and
/// traversed on the worker threads of a training batch.
pub trait BackwardOp: Debug + Send + Sync {
    /// Computes the gradients of the operation's inputs (and of the owning
    /// layer's parameters) from the gradient of its output.
    ///
    /// # Arguments
    /// * `grad_output`: dL/dOutput. Its size equals the size of the tensor the
    ///   op produced; the graph checks this before calling.
    ///
    /// # Returns
    /// * `Ok(BackwardResult)`: `inputs` must contain exactly one gradient per
    ///   recorded input, in recording order, each with that input's size.
    /// * `Err(AxonError)`: if the gradient cannot be computed.
    fn backward(&self, grad_output: &Tensor) -> Result<BackwardResult, AxonError>;

    /// Short name used in logs and error messages.
    fn name(&self) -> &'static str;
}

/// Output of [`BackwardOp::backward`].
#[derive(Debug, Clone, Default)]
pub struct BackwardResult {
    /// dL/dInput for each recorded input.
    pub inputs: Vec<Tensor>,
    /// dL/dWeights of the layer that recorded the node, if it owns weights.
    pub weights: Option<Tensor>,
    /// dL/dBiases of the layer that recorded the node, if it owns biases.
    pub biases: Option<Tensor>,
}

impl BackwardResult {
    /// Result for an op with a single input and no parameters.
    pub fn input(gradient: Tensor) -> Self {
        BackwardResult {
            inputs: vec![gradient],
            weights: None,
            biases: None,
        }
    }

    pub fn with_parameters(mut self, weights: Tensor, biases: Option<Tensor>) -> Self {
        self.weights = Some(weights);
        self.biases = biases;
        self
    }
}
