use super::Sequential;
use crate::autograd::Graph;
use crate::device::Padding;
use crate::error::AxonError;
use crate::nn::layers::{
    ActivationLayer, BatchNormalize, Conv2d, Dense, Dropout, Flatten, MaxPool, Softmax,
};
use crate::nn::Layer;
use crate::tensor::{ones, Tensor, TensorSize};
use approx::assert_relative_eq;

fn conv_network(seed: u64) -> Result<Sequential, AxonError> {
    let mut network = Sequential::new().with_seed(seed);
    network
        .add(
            Conv2d::new(2, (3, 3), (1, 1), Padding::Same)
                .with_input_size(TensorSize::new(5, 5, 1)),
        )
        .add(ActivationLayer::relu())
        .add(MaxPool::new())
        .add(Flatten::new())
        .add(Dense::new(4))
        .add(Softmax::new());
    network.compile()?;
    Ok(network)
}

fn ramp(size: TensorSize) -> Tensor {
    let value = (0..size.numel()).map(|i| (i as f32 * 0.37).sin()).collect();
    Tensor::new(value, size).unwrap()
}

#[test]
fn test_compile_wires_sizes() -> Result<(), AxonError> {
    let network = conv_network(1)?;
    let sizes: Vec<TensorSize> = network.layers().iter().map(|l| l.output_size()).collect();
    assert_eq!(
        sizes,
        vec![
            TensorSize::new(5, 5, 2),
            TensorSize::new(5, 5, 2),
            TensorSize::new(3, 3, 2),
            TensorSize::new(18, 1, 1),
            TensorSize::new(4, 1, 1),
            TensorSize::new(4, 1, 1),
        ]
    );
    assert_eq!(network.input_size(), Some(TensorSize::new(5, 5, 1)));
    assert_eq!(network.output_size(), Some(TensorSize::new(4, 1, 1)));
    Ok(())
}

#[test]
fn test_compile_errors() {
    let mut empty = Sequential::new();
    assert!(matches!(empty.compile(), Err(AxonError::ConfigurationError(_))));

    let mut network = Sequential::new();
    network.add(Dense::new(3));
    assert_eq!(
        network.compile(),
        Err(AxonError::MissingInputSize {
            layer: 0,
            kind: "dense".to_string()
        })
    );
    assert!(!network.is_compiled());
    assert_eq!(network.output_size(), None);
}

#[test]
fn test_forward_requires_compile_and_input_size() -> Result<(), AxonError> {
    let mut network = Sequential::new();
    network.add(Dense::new(2).with_input_size(TensorSize::new(3, 1, 1)));
    let mut graph = Graph::new();
    let input = Tensor::from(vec![1.0, 2.0, 3.0]);
    assert!(matches!(
        network.forward(&input, &mut graph),
        Err(AxonError::NotCompiled { .. })
    ));

    network.compile()?;
    let wrong = Tensor::from(vec![1.0, 2.0]);
    assert!(matches!(
        network.forward(&wrong, &mut graph),
        Err(AxonError::ShapeMismatch { .. })
    ));

    network.add(Softmax::new());
    assert!(!network.is_compiled());
    Ok(())
}

#[test]
fn test_predict_matches_declared_output() -> Result<(), AxonError> {
    let network = conv_network(3)?;
    let output = network.predict(&ramp(TensorSize::new(5, 5, 1)))?;
    assert_eq!(Some(output.size()), network.output_size());
    assert_relative_eq!(output.sum(), 1.0, epsilon = 1e-5);
    assert!(output.node().is_none());
    Ok(())
}

#[test]
fn test_gradients_cover_every_layer() -> Result<(), AxonError> {
    let network = conv_network(5)?;
    let mut graph = Graph::new();
    let input = graph.leaf(&ramp(TensorSize::new(5, 5, 1)))?;
    let output = network.forward(&input, &mut graph)?;
    let gradients = network.gradients(&graph, &output, &ones(output.size()))?;

    assert_eq!(gradients.weights.len(), network.len());
    assert_eq!(gradients.biases.len(), network.len());
    assert_eq!(gradients.weights[0].size(), network.layers()[0].weights().size());
    assert_eq!(gradients.biases[0].size(), TensorSize::new(2, 1, 1));
    assert!(gradients.weights[2].is_empty());
    assert_eq!(gradients.weights[4].size(), TensorSize::new(18, 4, 1));

    let input_grad = gradients.wrt(&input).expect("input gradient");
    assert_eq!(input_grad.size(), input.size());
    Ok(())
}

#[test]
fn test_seed_makes_compile_reproducible() -> Result<(), AxonError> {
    let a = conv_network(11)?;
    let b = conv_network(11)?;
    let c = conv_network(12)?;
    for (la, lb) in a.layers().iter().zip(b.layers()) {
        assert_eq!(la.weights(), lb.weights());
    }
    assert_ne!(a.layers()[0].weights(), c.layers()[0].weights());
    Ok(())
}

#[test]
fn test_descriptors_rebuild_network() -> Result<(), AxonError> {
    let network = conv_network(21)?;
    let descriptors = network.descriptors()?;
    assert_eq!(descriptors.len(), network.len());

    let rebuilt = Sequential::from_descriptors(&descriptors)?;
    assert!(rebuilt.is_compiled());
    let input = ramp(TensorSize::new(5, 5, 1));
    assert!(network
        .predict(&input)?
        .is_value_equal(&rebuilt.predict(&input)?, 1e-6));
    Ok(())
}

#[test]
fn test_descriptor_errors() -> Result<(), AxonError> {
    assert!(matches!(
        Sequential::new().descriptors(),
        Err(AxonError::NotCompiled { .. })
    ));
    assert!(matches!(
        Sequential::from_descriptors(&[]),
        Err(AxonError::DescriptorError(_))
    ));

    let network = conv_network(2)?;
    let mut descriptors = network.descriptors()?;
    descriptors.remove(3);
    assert!(matches!(
        Sequential::from_descriptors(&descriptors),
        Err(AxonError::DescriptorError(_))
    ));
    Ok(())
}

#[test]
fn test_layer_index_out_of_bounds() -> Result<(), AxonError> {
    let network = conv_network(4)?;
    assert_eq!(network.layer(0)?.kind().name(), "conv2d");
    assert_eq!(
        network.layer(6).map(|l| l.kind()),
        Err(AxonError::LayerIndexOutOfBounds { index: 6, count: 6 })
    );
    Ok(())
}

#[test]
fn test_predict_leaves_network_state_alone() -> Result<(), AxonError> {
    let mut network = Sequential::new().with_seed(4);
    network
        .add(Dense::new(3).with_input_size(TensorSize::new(2, 1, 1)))
        .add(BatchNormalize::new(0.1))
        .add(Dropout::new(0.5)?);
    network.compile()?;
    let input = Tensor::from(vec![0.4, -1.2]);
    let state = network.layers()[1].state()?;

    let first = network.predict(&input)?;
    assert_eq!(network.predict(&input)?, first);
    assert_eq!(network.layers()[1].state()?, state);

    // same result as an explicit inference-mode forward pass
    network.set_training(false);
    let expected = network.forward(&input, &mut Graph::new())?;
    assert_eq!(first, expected);
    Ok(())
}
