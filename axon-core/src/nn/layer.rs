use crate::autograd::Graph;
use crate::device::{Activation, Cpu, Device, Padding};
use crate::error::AxonError;
use crate::nn::init::Initializer;
use crate::nn::layers::{
    ActivationLayer, BatchNormalize, Conv2d, Dense, Dropout, Flatten, LayerNormalize, MaxPool,
    Reshape, Softmax, TransConv2d,
};
use crate::tensor::{Tensor, TensorSize};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// Tag of every layer variant together with its structural hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LayerKind {
    Dense {
        outputs: usize,
    },
    Conv2d {
        filter_count: usize,
        filter_size: (usize, usize),
        strides: (usize, usize),
        padding: Padding,
    },
    TransConv2d {
        filter_count: usize,
        filter_size: (usize, usize),
        strides: (usize, usize),
        padding: Padding,
    },
    MaxPool,
    BatchNormalize {
        learning_rate: f32,
        momentum: f32,
        epsilon: f32,
    },
    LayerNormalize {
        epsilon: f32,
    },
    Dropout {
        rate: f32,
    },
    Activation(Activation),
    Softmax,
    Reshape {
        size: TensorSize,
    },
    Flatten,
}

impl LayerKind {
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Dense { .. } => "dense",
            LayerKind::Conv2d { .. } => "conv2d",
            LayerKind::TransConv2d { .. } => "trans_conv2d",
            LayerKind::MaxPool => "max_pool",
            LayerKind::BatchNormalize { .. } => "batch_normalize",
            LayerKind::LayerNormalize { .. } => "layer_normalize",
            LayerKind::Dropout { .. } => "dropout",
            LayerKind::Activation(activation) => activation.name(),
            LayerKind::Softmax => "softmax",
            LayerKind::Reshape { .. } => "reshape",
            LayerKind::Flatten => "flatten",
        }
    }
}

/// Serializable copy of a parameter tensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterData {
    pub size: TensorSize,
    pub value: Vec<f32>,
}

impl From<&Tensor> for ParameterData {
    fn from(tensor: &Tensor) -> Self {
        ParameterData {
            size: tensor.size(),
            value: tensor.value().to_vec(),
        }
    }
}

impl ParameterData {
    pub fn to_tensor(&self) -> Result<Tensor, AxonError> {
        if self.value.is_empty() {
            return Ok(Tensor::empty());
        }
        Tensor::new(self.value.clone(), self.size)
    }
}

/// Everything needed to rebuild a compiled layer, including its parameters.
///
/// `state` holds variant-specific tensors beyond weights and biases (the
/// running statistics of a batch normalization layer, for instance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub kind: LayerKind,
    pub input_size: TensorSize,
    pub output_size: TensorSize,
    pub trainable: bool,
    pub bias_enabled: bool,
    pub initializer: Initializer,
    pub weights: ParameterData,
    pub biases: ParameterData,
    pub state: Vec<ParameterData>,
}

impl LayerDescriptor {
    /// Rebuilds the compiled layer this descriptor was taken from.
    pub fn build(&self) -> Result<Box<dyn Layer>, AxonError> {
        let mut layer: Box<dyn Layer> = match &self.kind {
            LayerKind::Dense { outputs } => Box::new(
                Dense::new(*outputs)
                    .with_bias(self.bias_enabled)
                    .with_initializer(self.initializer),
            ),
            LayerKind::Conv2d {
                filter_count,
                filter_size,
                strides,
                padding,
            } => Box::new(
                Conv2d::new(*filter_count, *filter_size, *strides, *padding)
                    .with_bias(self.bias_enabled)
                    .with_initializer(self.initializer),
            ),
            LayerKind::TransConv2d {
                filter_count,
                filter_size,
                strides,
                padding,
            } => Box::new(
                TransConv2d::new(*filter_count, *filter_size, *strides, *padding)
                    .with_bias(self.bias_enabled)
                    .with_initializer(self.initializer),
            ),
            LayerKind::MaxPool => Box::new(MaxPool::new()),
            LayerKind::BatchNormalize {
                learning_rate,
                momentum,
                epsilon,
            } => Box::new(BatchNormalize::new(*learning_rate).with_statistics(*momentum, *epsilon)),
            LayerKind::LayerNormalize { epsilon } => {
                Box::new(LayerNormalize::new().with_epsilon(*epsilon))
            }
            LayerKind::Dropout { rate } => Box::new(Dropout::new(*rate)?),
            LayerKind::Activation(activation) => Box::new(ActivationLayer::new(*activation)),
            LayerKind::Softmax => Box::new(Softmax::new()),
            LayerKind::Reshape { size } => Box::new(Reshape::new(*size)),
            LayerKind::Flatten => Box::new(Flatten::new()),
        };
        // Parameters are overwritten by `restore`, so any seed will do.
        layer.compile(self.input_size, &mut StdRng::seed_from_u64(0))?;
        if layer.output_size() != self.output_size {
            return Err(AxonError::DescriptorError(format!(
                "{} layer compiles to output {} but the descriptor records {}",
                self.kind.name(),
                layer.output_size(),
                self.output_size
            )));
        }
        layer.restore(self)?;
        layer.set_trainable(self.trainable);
        Ok(layer)
    }
}

/// State every layer variant carries.
#[derive(Debug, Clone)]
pub struct LayerBase {
    pub(crate) input_size: Option<TensorSize>,
    pub(crate) output_size: TensorSize,
    pub(crate) weights: Tensor,
    pub(crate) biases: Tensor,
    pub(crate) trainable: bool,
    pub(crate) bias_enabled: bool,
    pub(crate) initializer: Initializer,
    pub(crate) device: Arc<dyn Device>,
    pub(crate) training: bool,
    pub(crate) compiled: bool,
}

impl Default for LayerBase {
    fn default() -> Self {
        LayerBase {
            input_size: None,
            output_size: TensorSize::default(),
            weights: Tensor::empty(),
            biases: Tensor::empty(),
            trainable: true,
            bias_enabled: false,
            initializer: Initializer::default(),
            device: Arc::new(Cpu),
            training: true,
            compiled: false,
        }
    }
}

impl LayerBase {
    /// Weights and biases after subtracting `scale` times the given
    /// gradients. An empty gradient keeps its parameter unchanged.
    pub(crate) fn updated_parameters(
        &self,
        weights: &Tensor,
        biases: &Tensor,
        scale: f32,
    ) -> Result<(Tensor, Tensor), AxonError> {
        let mut updated_weights = self.weights.clone();
        if !weights.is_empty() && !updated_weights.is_empty() {
            updated_weights.sub_scaled_assign(weights, scale)?;
        }
        let mut updated_biases = self.biases.clone();
        if self.bias_enabled && !biases.is_empty() && !updated_biases.is_empty() {
            updated_biases.sub_scaled_assign(biases, scale)?;
        }
        Ok((updated_weights, updated_biases))
    }

    /// Fails unless the layer is compiled and `input` has the compiled input size.
    pub(crate) fn check_input(&self, input: &Tensor, kind: &LayerKind) -> Result<TensorSize, AxonError> {
        let expected = match self.input_size {
            Some(size) if self.compiled => size,
            _ => {
                return Err(AxonError::NotCompiled {
                    operation: format!("{} forward", kind.name()),
                })
            }
        };
        if input.size() != expected {
            return Err(AxonError::ShapeMismatch {
                expected,
                actual: input.size(),
                operation: format!("{} forward", kind.name()),
            });
        }
        Ok(expected)
    }
}

/// A differentiable building block of a [`Sequential`](crate::model::Sequential) network.
///
/// `forward` records a node with the layer's backward rule in the graph it is
/// given; the graph reports the layer's parameter gradients under the layer's
/// index. Implementations are shared between the workers of a batch, so any
/// state `forward` mutates lives behind a lock.
pub trait Layer: Debug + Send + Sync {
    fn kind(&self) -> LayerKind;

    fn base(&self) -> &LayerBase;

    fn base_mut(&mut self) -> &mut LayerBase;

    /// Fixes the input size, derives the output size and initializes the
    /// parameters.
    fn compile(&mut self, input_size: TensorSize, rng: &mut StdRng) -> Result<(), AxonError>;

    fn forward(&self, input: &Tensor, graph: &mut Graph) -> Result<Tensor, AxonError>;

    /// Subtracts the received gradients from the parameters.
    ///
    /// Layers that consume optimizer output receive ready deltas; the others
    /// receive raw averaged gradients which are scaled by `learning_rate`.
    /// Empty tensors leave the matching parameter untouched.
    fn apply(&mut self, weights: &Tensor, biases: &Tensor, learning_rate: f32) -> Result<(), AxonError> {
        let scale = if self.uses_optimizer() { 1.0 } else { learning_rate };
        let (weights, biases) = self.base().updated_parameters(weights, biases, scale)?;
        let base = self.base_mut();
        base.weights = weights;
        base.biases = biases;
        Ok(())
    }

    /// Whether Adam should turn this layer's gradients into moment-adjusted deltas.
    fn uses_optimizer(&self) -> bool {
        true
    }

    fn input_size(&self) -> Option<TensorSize> {
        self.base().input_size
    }

    /// Declares the input size of the first layer of a network.
    fn set_input_size(&mut self, size: TensorSize) {
        self.base_mut().input_size = Some(size);
    }

    fn output_size(&self) -> TensorSize {
        self.base().output_size
    }

    fn is_compiled(&self) -> bool {
        self.base().compiled
    }

    fn weights(&self) -> &Tensor {
        &self.base().weights
    }

    fn biases(&self) -> &Tensor {
        &self.base().biases
    }

    fn weights_mut(&mut self) -> &mut Tensor {
        &mut self.base_mut().weights
    }

    fn biases_mut(&mut self) -> &mut Tensor {
        &mut self.base_mut().biases
    }

    fn trainable(&self) -> bool {
        self.base().trainable
    }

    fn set_trainable(&mut self, trainable: bool) {
        self.base_mut().trainable = trainable;
    }

    fn bias_enabled(&self) -> bool {
        self.base().bias_enabled
    }

    fn set_device(&mut self, device: Arc<dyn Device>) {
        self.base_mut().device = device;
    }

    /// Switches between training and inference behaviour.
    fn set_training(&mut self, training: bool) {
        self.base_mut().training = training;
    }

    /// Extra tensors to persist beyond weights and biases.
    fn state(&self) -> Result<Vec<Tensor>, AxonError> {
        Ok(Vec::new())
    }

    fn descriptor(&self) -> Result<LayerDescriptor, AxonError> {
        let base = self.base();
        Ok(LayerDescriptor {
            kind: self.kind(),
            input_size: base.input_size.unwrap_or_default(),
            output_size: base.output_size,
            trainable: base.trainable,
            bias_enabled: base.bias_enabled,
            initializer: base.initializer,
            weights: ParameterData::from(&base.weights),
            biases: ParameterData::from(&base.biases),
            state: self.state()?.iter().map(ParameterData::from).collect(),
        })
    }

    /// Loads parameters from a descriptor into a compiled layer.
    fn restore(&mut self, descriptor: &LayerDescriptor) -> Result<(), AxonError> {
        let weights = descriptor.weights.to_tensor()?;
        let biases = descriptor.biases.to_tensor()?;
        let base = self.base_mut();
        for (current, restored, name) in [
            (&base.weights, &weights, "weights"),
            (&base.biases, &biases, "biases"),
        ] {
            if current.size() != restored.size() {
                return Err(AxonError::DescriptorError(format!(
                    "{} of size {} cannot replace {} of size {}",
                    name,
                    restored.size(),
                    name,
                    current.size()
                )));
            }
        }
        base.weights = weights;
        base.biases = biases;
        Ok(())
    }
}
