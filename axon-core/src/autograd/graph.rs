use crate::autograd::backward_op::BackwardOp;
use crate::error::AxonError;
use crate::tensor::{Tensor, TensorSize};
use log::trace;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one node of one [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub(crate) graph: u64,
    pub(crate) index: usize,
}

impl NodeRef {
    pub fn graph(&self) -> u64 {
        self.graph
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug)]
struct Node {
    /// `None` marks a leaf (a tensor fed into the graph from outside).
    op: Option<Box<dyn BackwardOp>>,
    inputs: Vec<usize>,
    size: TensorSize,
    layer: usize,
}

/// Arena of operation nodes recorded during one forward pass.
///
/// Nodes are only ever appended, and a node may only reference nodes that
/// already exist, so node indices are a topological order and the graph is
/// acyclic by construction. Each training sample builds its own `Graph`,
/// which keeps graph construction free of shared state.
#[derive(Debug)]
pub struct Graph {
    id: u64,
    nodes: Vec<Node>,
    scope: usize,
    inference: bool,
}

/// Gradients produced by [`Graph::gradients`].
#[derive(Debug, Clone, Default)]
pub struct Gradients {
    /// dL/dInput for every leaf the traversal reached, in leaf creation order.
    pub input: Vec<Tensor>,
    /// Weight gradients indexed by layer. Layers that produced none hold an
    /// empty tensor.
    pub weights: Vec<Tensor>,
    /// Bias gradients indexed by layer, as for `weights`.
    pub biases: Vec<Tensor>,
    leaves: Vec<NodeRef>,
}

impl Gradients {
    /// Gradient with respect to a leaf tensor registered through [`Graph::leaf`].
    pub fn wrt(&self, tensor: &Tensor) -> Option<&Tensor> {
        let node = tensor.node()?;
        self.leaves
            .iter()
            .position(|leaf| *leaf == node)
            .map(|i| &self.input[i])
    }

    /// Pads the per-layer vectors with empty tensors up to `layers` entries.
    pub fn resize_layers(&mut self, layers: usize) {
        if self.weights.len() < layers {
            self.weights.resize(layers, Tensor::empty());
            self.biases.resize(layers, Tensor::empty());
        }
    }

    /// L2 norm over every parameter gradient.
    pub fn parameter_norm(&self) -> f32 {
        self.weights
            .iter()
            .chain(self.biases.iter())
            .map(|t| t.value().iter().map(|v| v * v).sum::<f32>())
            .sum::<f32>()
            .sqrt()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            nodes: Vec::new(),
            scope: 0,
            inference: false,
        }
    }

    /// A graph whose forward passes use inference behaviour in every layer,
    /// whatever mode the layers are set to. Recording into it leaves layer
    /// statistics and dropout masks untouched.
    pub fn for_inference() -> Self {
        Graph {
            inference: true,
            ..Graph::new()
        }
    }

    pub fn is_inference(&self) -> bool {
        self.inference
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sets the layer index attached to nodes recorded from now on.
    pub(crate) fn set_scope(&mut self, layer: usize) {
        self.scope = layer;
    }

    /// Registers `tensor` as a leaf of this graph and returns it with the leaf's
    /// reference attached. A tensor already in this graph is returned as is.
    pub fn leaf(&mut self, tensor: &Tensor) -> Result<Tensor, AxonError> {
        if let Some(node) = self.resolve(tensor)? {
            return Ok(tensor.clone().with_node(self.node_ref(node)));
        }
        let node = self.push(None, Vec::new(), tensor.size());
        Ok(tensor.clone().with_node(node))
    }

    /// Records `output` as produced by `inputs` through `op`.
    ///
    /// Inputs that do not belong to any graph become leaves. The returned
    /// tensor carries the new node's reference.
    ///
    /// # Errors
    /// `AxonError::ForeignTensor` if an input belongs to another graph.
    pub fn record(
        &mut self,
        output: Tensor,
        inputs: &[&Tensor],
        op: impl BackwardOp + 'static,
    ) -> Result<Tensor, AxonError> {
        let input_ids = inputs
            .iter()
            .map(|input| self.resolve_or_leaf(input))
            .collect::<Result<Vec<_>, _>>()?;
        trace!(
            "graph {}: recording {} for layer {} with inputs {:?}",
            self.id,
            op.name(),
            self.scope,
            input_ids
        );
        let node = self.push(Some(Box::new(op)), input_ids, output.size());
        Ok(output.with_node(node))
    }

    /// Links `output` to `input` as its producing tensor, replacing the inputs
    /// recorded for `output`'s node.
    ///
    /// # Errors
    /// `AxonError::GraphError` if `output` was not recorded in this graph or is
    /// a leaf, `AxonError::ForeignTensor` if either tensor belongs elsewhere.
    pub fn link(&mut self, output: &Tensor, input: &Tensor) -> Result<(), AxonError> {
        let output_id = self.resolve(output)?.ok_or_else(|| {
            AxonError::GraphError("cannot link a tensor that was not recorded in this graph".to_string())
        })?;
        let input_id = self.resolve_or_leaf(input)?;
        if input_id >= output_id {
            return Err(AxonError::GraphError(format!(
                "node {} cannot take node {} as input",
                output_id, input_id
            )));
        }
        let node = &mut self.nodes[output_id];
        if node.op.is_none() {
            return Err(AxonError::GraphError("cannot link a leaf".to_string()));
        }
        node.inputs = vec![input_id];
        Ok(())
    }

    /// Backpropagates `delta` from `output` through every node it depends on.
    ///
    /// Each node's backward op runs exactly once, after the gradients from all
    /// of its consumers have been summed. A tensor with no graph reference is a
    /// leaf and receives `delta` unchanged.
    ///
    /// # Errors
    /// `AxonError::ShapeMismatch` if `delta` (or a gradient returned by an op)
    /// does not match the size recorded for its node.
    pub fn gradients(&self, output: &Tensor, delta: &Tensor) -> Result<Gradients, AxonError> {
        let start = match self.resolve(output)? {
            Some(start) => start,
            None => {
                return Ok(Gradients {
                    input: vec![delta.detached()],
                    ..Gradients::default()
                })
            }
        };
        let expected = self.nodes[start].size;
        if delta.size() != expected {
            return Err(AxonError::ShapeMismatch {
                expected,
                actual: delta.size(),
                operation: "gradients".to_string(),
            });
        }

        let mut pending: Vec<Option<Tensor>> = vec![None; start + 1];
        pending[start] = Some(delta.detached());
        let mut gradients = Gradients::default();
        let mut leaves: Vec<(usize, Tensor)> = Vec::new();

        for index in (0..=start).rev() {
            let grad = match pending[index].take() {
                Some(grad) => grad,
                None => continue,
            };
            let node = &self.nodes[index];
            let op = match &node.op {
                Some(op) => op,
                None => {
                    leaves.push((index, grad));
                    continue;
                }
            };

            let result = op.backward(&grad)?;
            if result.inputs.len() != node.inputs.len() {
                return Err(AxonError::GraphError(format!(
                    "{} returned {} input gradients for {} inputs",
                    op.name(),
                    result.inputs.len(),
                    node.inputs.len()
                )));
            }
            for (&input_id, input_grad) in node.inputs.iter().zip(result.inputs) {
                let input_size = self.nodes[input_id].size;
                if input_grad.size() != input_size {
                    return Err(AxonError::ShapeMismatch {
                        expected: input_size,
                        actual: input_grad.size(),
                        operation: format!("{} backward", op.name()),
                    });
                }
                accumulate(&mut pending[input_id], input_grad)?;
            }

            if result.weights.is_some() || result.biases.is_some() {
                gradients.resize_layers(node.layer + 1);
                if let Some(weights) = result.weights {
                    accumulate_param(&mut gradients.weights[node.layer], weights)?;
                }
                if let Some(biases) = result.biases {
                    accumulate_param(&mut gradients.biases[node.layer], biases)?;
                }
            }
        }

        leaves.sort_by_key(|(index, _)| *index);
        for (index, grad) in leaves {
            gradients.leaves.push(self.node_ref(index));
            gradients.input.push(grad);
        }
        Ok(gradients)
    }

    fn push(&mut self, op: Option<Box<dyn BackwardOp>>, inputs: Vec<usize>, size: TensorSize) -> NodeRef {
        self.nodes.push(Node {
            op,
            inputs,
            size,
            layer: self.scope,
        });
        self.node_ref(self.nodes.len() - 1)
    }

    fn node_ref(&self, index: usize) -> NodeRef {
        NodeRef { graph: self.id, index }
    }

    /// Index of `tensor`'s node in this graph, `None` if it has no node.
    fn resolve(&self, tensor: &Tensor) -> Result<Option<usize>, AxonError> {
        match tensor.node() {
            None => Ok(None),
            Some(node) if node.graph != self.id => Err(AxonError::ForeignTensor {
                graph: self.id,
                tensor_graph: node.graph,
            }),
            Some(node) if node.index >= self.nodes.len() => Err(AxonError::GraphError(format!(
                "node {} does not exist",
                node.index
            ))),
            Some(node) => Ok(Some(node.index)),
        }
    }

    fn resolve_or_leaf(&mut self, tensor: &Tensor) -> Result<usize, AxonError> {
        match self.resolve(tensor)? {
            Some(index) => Ok(index),
            None => Ok(self.push(None, Vec::new(), tensor.size()).index),
        }
    }
}

fn accumulate(slot: &mut Option<Tensor>, gradient: Tensor) -> Result<(), AxonError> {
    match slot {
        Some(existing) => existing.add_assign(&gradient),
        None => {
            *slot = Some(gradient);
            Ok(())
        }
    }
}

fn accumulate_param(slot: &mut Tensor, gradient: Tensor) -> Result<(), AxonError> {
    if slot.is_empty() {
        *slot = gradient.detached();
        Ok(())
    } else {
        slot.add_assign(&gradient)
    }
}
