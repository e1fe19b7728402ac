use crate::autograd::{Gradients, Graph};
use crate::device::{Cpu, Device};
use crate::error::AxonError;
use crate::nn::layer::{Layer, LayerDescriptor};
use crate::tensor::{Tensor, TensorSize};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// An ordered stack of layers, each feeding the next.
///
/// `compile` wires the output size of every layer into the input size of the
/// following one, starting from the input size declared on the first layer,
/// and initializes all parameters from one random generator.
#[derive(Debug)]
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
    compiled: bool,
    seed: Option<u64>,
    device: Arc<dyn Device>,
}

impl Default for Sequential {
    fn default() -> Self {
        Sequential::new()
    }
}

impl Sequential {
    pub fn new() -> Self {
        Sequential {
            layers: Vec::new(),
            compiled: false,
            seed: None,
            device: Arc::new(Cpu),
        }
    }

    /// Seeds parameter initialization and dropout masks, making `compile`
    /// reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Appends a layer. The network has to be compiled again afterwards.
    pub fn add(&mut self, layer: impl Layer + 'static) -> &mut Self {
        self.layers.push(Box::new(layer));
        self.compiled = false;
        self
    }

    pub fn add_boxed(&mut self, layer: Box<dyn Layer>) -> &mut Self {
        self.layers.push(layer);
        self.compiled = false;
        self
    }

    pub fn compile(&mut self) -> Result<(), AxonError> {
        let first = self.layers.first().ok_or_else(|| {
            AxonError::ConfigurationError("cannot compile a network without layers".to_string())
        })?;
        let mut size = first.input_size().ok_or_else(|| AxonError::MissingInputSize {
            layer: 0,
            kind: first.kind().name().to_string(),
        })?;

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let input_size = size;
        for (index, layer) in self.layers.iter_mut().enumerate() {
            layer.set_device(Arc::clone(&self.device));
            layer.compile(size, &mut rng)?;
            debug!(
                "layer {} ({}): {} -> {}",
                index,
                layer.kind().name(),
                size,
                layer.output_size()
            );
            size = layer.output_size();
        }
        self.compiled = true;
        info!(
            "compiled {} layers on {}: {} -> {}",
            self.layers.len(),
            self.device.name(),
            input_size,
            size
        );
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Runs `input` through every layer, recording each layer's node in
    /// `graph` under the layer's index.
    pub fn forward(&self, input: &Tensor, graph: &mut Graph) -> Result<Tensor, AxonError> {
        let expected = self.expect_compiled("forward")?;
        if input.size() != expected {
            return Err(AxonError::ShapeMismatch {
                expected,
                actual: input.size(),
                operation: "network forward".to_string(),
            });
        }
        let mut current = input.clone();
        for (index, layer) in self.layers.iter().enumerate() {
            graph.set_scope(index);
            current = layer.forward(&current, graph)?;
        }
        Ok(current)
    }

    /// Backpropagates `delta` from `output` and returns one weight and one
    /// bias gradient slot per layer.
    pub fn gradients(
        &self,
        graph: &Graph,
        output: &Tensor,
        delta: &Tensor,
    ) -> Result<Gradients, AxonError> {
        let mut gradients = graph.gradients(output, delta)?;
        gradients.resize_layers(self.layers.len());
        Ok(gradients)
    }

    /// Forward pass in inference mode on a throwaway graph.
    ///
    /// Dropout passes its input through and batch normalization uses its
    /// moving statistics without updating them, so a prediction never
    /// changes the network.
    pub fn predict(&self, input: &Tensor) -> Result<Tensor, AxonError> {
        let mut graph = Graph::for_inference();
        Ok(self.forward(input, &mut graph)?.detached())
    }

    pub fn set_training(&mut self, training: bool) {
        for layer in self.layers.iter_mut() {
            layer.set_training(training);
        }
    }

    pub fn set_device(&mut self, device: Arc<dyn Device>) {
        for layer in self.layers.iter_mut() {
            layer.set_device(Arc::clone(&device));
        }
        self.device = device;
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Box<dyn Layer>] {
        &mut self.layers
    }

    pub fn layer(&self, index: usize) -> Result<&dyn Layer, AxonError> {
        self.layers
            .get(index)
            .map(|layer| layer.as_ref())
            .ok_or(AxonError::LayerIndexOutOfBounds {
                index,
                count: self.layers.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn input_size(&self) -> Option<TensorSize> {
        self.layers.first().and_then(|layer| layer.input_size())
    }

    /// Output size of the last layer, once compiled.
    pub fn output_size(&self) -> Option<TensorSize> {
        if !self.compiled {
            return None;
        }
        self.layers.last().map(|layer| layer.output_size())
    }

    pub fn descriptors(&self) -> Result<Vec<LayerDescriptor>, AxonError> {
        self.expect_compiled("descriptors")?;
        self.layers.iter().map(|layer| layer.descriptor()).collect()
    }

    /// Rebuilds a compiled network, parameters included.
    ///
    /// # Errors
    /// `AxonError::DescriptorError` if a descriptor is inconsistent or the
    /// sizes of consecutive layers do not chain.
    pub fn from_descriptors(descriptors: &[LayerDescriptor]) -> Result<Self, AxonError> {
        if descriptors.is_empty() {
            return Err(AxonError::DescriptorError("no layers to rebuild".to_string()));
        }
        let mut network = Sequential::new();
        let mut previous: Option<TensorSize> = None;
        for (index, descriptor) in descriptors.iter().enumerate() {
            if let Some(size) = previous {
                if size != descriptor.input_size {
                    return Err(AxonError::DescriptorError(format!(
                        "layer {} expects input {} but layer {} produces {}",
                        index,
                        descriptor.input_size,
                        index - 1,
                        size
                    )));
                }
            }
            network.layers.push(descriptor.build()?);
            previous = Some(descriptor.output_size);
        }
        network.compiled = true;
        info!("rebuilt {} layers from descriptors", network.layers.len());
        Ok(network)
    }

    fn expect_compiled(&self, operation: &str) -> Result<TensorSize, AxonError> {
        match self.input_size() {
            Some(size) if self.compiled => Ok(size),
            _ => Err(AxonError::NotCompiled {
                operation: operation.to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[path = "sequential_test.rs"]
mod tests;
