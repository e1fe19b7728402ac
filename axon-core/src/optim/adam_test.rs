use super::{Adam, AdamConfig};
use crate::autograd::Gradients;
use crate::error::AxonError;
use crate::model::Sequential;
use crate::nn::layers::Dense;
use crate::nn::losses::MeanSquaredError;
use crate::nn::Layer;
use crate::optim::metrics::{Metric, MetricsReporter};
use crate::optim::Optimizer;
use crate::tensor::{Tensor, TensorSize};
use approx::assert_abs_diff_eq;
use std::sync::{Arc, Mutex};

fn dense_network(inputs: usize, outputs: usize, weights: Vec<f32>) -> Sequential {
    let mut network = Sequential::new().with_seed(0);
    network.add(
        Dense::new(outputs)
            .with_bias(false)
            .with_input_size(TensorSize::new(inputs, 1, 1)),
    );
    network.compile().unwrap();
    *network.layers_mut()[0].weights_mut() =
        Tensor::new(weights, TensorSize::new(inputs, outputs, 1)).unwrap();
    network
}

fn weight_gradient(value: Vec<f32>, size: TensorSize) -> Gradients {
    let mut gradients = Gradients::default();
    gradients.weights = vec![Tensor::new(value, size).unwrap()];
    gradients.biases = vec![Tensor::empty()];
    gradients
}

fn adam(learning_rate: f32) -> Adam {
    Adam::new(AdamConfig::default().with_learning_rate(learning_rate).with_workers(2)).unwrap()
}

#[test]
fn test_config_validation() {
    assert!(AdamConfig::default().validate().is_ok());
    let invalid = [
        AdamConfig::default().with_learning_rate(0.0),
        AdamConfig::default().with_learning_rate(f32::NAN),
        AdamConfig {
            beta1: 1.0,
            ..AdamConfig::default()
        },
        AdamConfig {
            beta2: -0.1,
            ..AdamConfig::default()
        },
        AdamConfig {
            epsilon: 0.0,
            ..AdamConfig::default()
        },
        AdamConfig {
            weight_clip: Some(0.0),
            ..AdamConfig::default()
        },
        AdamConfig::default().with_workers(0),
    ];
    for config in invalid {
        assert!(matches!(
            config.validate(),
            Err(AxonError::ConfigurationError(_))
        ));
        assert!(Adam::new(config).is_err());
    }
}

#[test]
fn test_step_requires_compiled_network() {
    let mut optimizer = adam(0.1);
    let mut network = Sequential::new();
    network.add(Dense::new(1));
    assert!(matches!(
        optimizer.step(&mut network),
        Err(AxonError::NotCompiled { .. })
    ));
    assert_eq!(optimizer.step_count(), 0);
}

#[test]
fn test_moment_updates_over_steps() -> Result<(), AxonError> {
    let mut network = dense_network(1, 1, vec![0.5]);
    let mut optimizer = adam(0.1);
    let size = TensorSize::new(1, 1, 1);

    let mut expected_weights = [0.4, 0.3, 0.212_753_26].iter();
    for g in [4.0, 4.0, 1.0] {
        optimizer.accumulator().prepare(&network)?;
        optimizer.accumulator().insert(&weight_gradient(vec![g], size))?;
        let report = optimizer.step(&mut network)?;
        assert_eq!(report.samples, 1);
        let expected = *expected_weights.next().unwrap();
        assert_abs_diff_eq!(network.layers()[0].weights().value()[0], expected, epsilon = 1e-4);
    }
    assert_eq!(optimizer.step_count(), 3);
    Ok(())
}

#[test]
fn test_identical_state_gives_identical_deltas() -> Result<(), AxonError> {
    let start = vec![0.3, -0.2, 0.8, 0.1, 0.0, -0.6];
    let size = TensorSize::new(3, 2, 1);
    let gradient = weight_gradient(vec![0.5, -1.0, 0.25, 2.0, -0.125, 0.0], size);
    let mut optimizer = adam(0.05);

    let mut deltas = Vec::new();
    for _ in 0..2 {
        let mut network = dense_network(3, 2, start.clone());
        optimizer.reset()?;
        for _ in 0..3 {
            optimizer.accumulator().prepare(&network)?;
            optimizer.accumulator().insert(&gradient)?;
            optimizer.step(&mut network)?;
        }
        let after = network.layers()[0].weights().value().to_vec();
        deltas.push(start.iter().zip(&after).map(|(s, a)| s - a).collect::<Vec<f32>>());
    }
    assert_eq!(deltas[0], deltas[1]);
    assert_eq!(optimizer.step_count(), 3);
    Ok(())
}

#[test]
fn test_non_finite_gradient_is_rejected() -> Result<(), AxonError> {
    let mut network = dense_network(2, 1, vec![0.5, 0.5]);
    let mut optimizer = adam(0.1);
    optimizer.accumulator().prepare(&network)?;
    optimizer
        .accumulator()
        .insert(&weight_gradient(vec![f32::NAN, 1.0], TensorSize::new(2, 1, 1)))?;
    assert_eq!(
        optimizer.step(&mut network),
        Err(AxonError::NonFiniteGradient { layer: 0 })
    );
    assert_eq!(network.layers()[0].weights().value(), &[0.5, 0.5]);
    assert_eq!(optimizer.step_count(), 0);
    Ok(())
}

#[test]
fn test_non_trainable_layer_is_left_alone() -> Result<(), AxonError> {
    let mut network = dense_network(2, 1, vec![0.5, 0.5]);
    network.layers_mut()[0].set_trainable(false);
    let mut optimizer = adam(0.1);
    optimizer.accumulator().prepare(&network)?;
    optimizer
        .accumulator()
        .insert(&weight_gradient(vec![1.0, 1.0], TensorSize::new(2, 1, 1)))?;
    optimizer.step(&mut network)?;
    assert_eq!(network.layers()[0].weights().value(), &[0.5, 0.5]);
    Ok(())
}

#[test]
fn test_changed_network_needs_reset() -> Result<(), AxonError> {
    let mut optimizer = adam(0.1);
    let mut small = dense_network(1, 1, vec![0.5]);
    optimizer.accumulator().prepare(&small)?;
    optimizer
        .accumulator()
        .insert(&weight_gradient(vec![1.0], TensorSize::new(1, 1, 1)))?;
    optimizer.step(&mut small)?;

    let mut larger = dense_network(2, 1, vec![0.5, 0.5]);
    assert!(matches!(
        optimizer.step(&mut larger),
        Err(AxonError::MomentShapeMismatch { layer: 0, .. })
    ));

    optimizer.reset()?;
    assert_eq!(optimizer.step_count(), 0);
    optimizer.step(&mut larger)?;
    Ok(())
}

#[test]
fn test_weight_clip() -> Result<(), AxonError> {
    let mut network = dense_network(1, 1, vec![0.5]);
    let config = AdamConfig {
        weight_clip: Some(0.75),
        ..AdamConfig::default().with_learning_rate(1.0).with_workers(1)
    };
    let mut optimizer = Adam::new(config)?;
    optimizer.accumulator().prepare(&network)?;
    optimizer
        .accumulator()
        .insert(&weight_gradient(vec![-3.0], TensorSize::new(1, 1, 1)))?;
    optimizer.step(&mut network)?;
    assert_abs_diff_eq!(network.layers()[0].weights().value()[0], 0.75);
    Ok(())
}

#[test]
fn test_train_on_validates_batch() {
    let network = dense_network(2, 1, vec![0.5, 0.5]);
    let optimizer = adam(0.1);
    let loss = MeanSquaredError::new();

    assert_eq!(
        optimizer.train_on(&network, &[], &loss),
        Err(AxonError::EmptyBatch)
    );
    let batch = vec![(Tensor::from(vec![1.0, 2.0]), Tensor::from(vec![1.0, 0.0]))];
    assert_eq!(
        optimizer.train_on(&network, &batch, &loss),
        Err(AxonError::LabelMismatch {
            expected: 1,
            actual: 2
        })
    );

    let mut uncompiled = Sequential::new();
    uncompiled.add(Dense::new(1).with_input_size(TensorSize::new(2, 1, 1)));
    let batch = vec![(Tensor::from(vec![1.0, 2.0]), Tensor::from(vec![1.0]))];
    assert!(matches!(
        optimizer.train_on(&uncompiled, &batch, &loss),
        Err(AxonError::NotCompiled { .. })
    ));
}

#[test]
fn test_failed_samples_are_excluded() -> Result<(), AxonError> {
    let network = dense_network(2, 1, vec![0.5, 0.5]);
    let optimizer = adam(0.1);
    let loss = MeanSquaredError::new();

    let batch = vec![
        (Tensor::from(vec![1.0, 1.0]), Tensor::from(vec![0.0])),
        (Tensor::from(vec![1.0, 1.0, 1.0]), Tensor::from(vec![0.0])),
    ];
    let report = optimizer.train_on(&network, &batch, &loss)?;
    assert_eq!(report.samples, 1);
    assert_eq!(report.failed, 1);
    assert_abs_diff_eq!(report.loss, 1.0);
    assert_eq!(optimizer.accumulator().count()?, 1);

    optimizer.accumulator().clear()?;
    let all_bad = vec![(Tensor::from(vec![1.0]), Tensor::from(vec![0.0]))];
    assert!(matches!(
        optimizer.train_on(&network, &all_bad, &loss),
        Err(AxonError::BatchFailed(inner)) if matches!(*inner, AxonError::ShapeMismatch { .. })
    ));
    assert_eq!(optimizer.accumulator().count()?, 0);
    Ok(())
}

#[test]
fn test_reporter_receives_metrics() -> Result<(), AxonError> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let reporter = MetricsReporter::new(move |metric, value| {
        sink.lock().unwrap().push((metric, value));
    });
    let mut optimizer = adam(0.1).with_reporter(reporter);
    let mut network = dense_network(2, 1, vec![0.5, 0.5]);
    let batch = vec![
        (Tensor::from(vec![1.0, 1.0]), Tensor::from(vec![0.0])),
        (Tensor::from(vec![2.0, 0.0]), Tensor::from(vec![1.0])),
    ];
    optimizer.train_on(&network, &batch, &MeanSquaredError::new())?;
    let report = optimizer.step(&mut network)?;

    let received = received.lock().unwrap();
    let value = |metric: Metric| received.iter().find(|(m, _)| *m == metric).map(|(_, v)| *v);
    // Both samples predict 1.0: losses 1.0 and 0.0.
    assert_eq!(value(Metric::Loss), Some(0.5));
    assert_eq!(value(Metric::Samples), Some(2.0));
    assert_eq!(value(Metric::FailedSamples), Some(0.0));
    assert_eq!(value(Metric::GradientNorm), Some(report.gradient_norm));
    assert!(report.gradient_norm > 0.0);
    Ok(())
}

#[test]
fn test_l2_normalize_scales_weight_gradient() -> Result<(), AxonError> {
    let mut network = dense_network(2, 1, vec![0.0, 0.0]);
    let config = AdamConfig {
        l2_normalize: true,
        // a large epsilon keeps the gradient scale visible in the first delta
        epsilon: 1.0,
        ..AdamConfig::default().with_learning_rate(0.1).with_workers(1)
    };
    let mut optimizer = Adam::new(config)?;
    optimizer.accumulator().prepare(&network)?;
    optimizer
        .accumulator()
        .insert(&weight_gradient(vec![3.0, 4.0], TensorSize::new(2, 1, 1)))?;
    optimizer.step(&mut network)?;

    // g = [0.6, 0.8], delta = lr * g / (|g| + eps)
    let weights = network.layers()[0].weights().value();
    assert_abs_diff_eq!(weights[0], -0.1 * 0.6 / 1.6, epsilon = 1e-6);
    assert_abs_diff_eq!(weights[1], -0.1 * 0.8 / 1.8, epsilon = 1e-6);
    Ok(())
}

#[test]
fn test_non_finite_parameter_leaves_network_and_moments_untouched() -> Result<(), AxonError> {
    let size = TensorSize::new(1, 1, 1);
    let mut network = Sequential::new().with_seed(0);
    network.add(Dense::new(1).with_bias(false).with_input_size(size));
    network.add(Dense::new(1).with_bias(false));
    network.compile()?;
    *network.layers_mut()[0].weights_mut() = Tensor::new(vec![0.5], size)?;
    *network.layers_mut()[1].weights_mut() = Tensor::new(vec![-3e38], size)?;

    let mut gradients = Gradients::default();
    gradients.weights = vec![Tensor::new(vec![1.0], size)?, Tensor::new(vec![1.0], size)?];
    gradients.biases = vec![Tensor::empty(), Tensor::empty()];

    // the first delta is about lr for each layer, pushing layer 1 past f32::MAX
    let mut optimizer = adam(1e38);
    optimizer.accumulator().prepare(&network)?;
    optimizer.accumulator().insert(&gradients)?;
    assert_eq!(
        optimizer.step(&mut network),
        Err(AxonError::NonFiniteParameter { layer: 1 })
    );
    assert_eq!(network.layers()[0].weights().value(), &[0.5]);
    assert_eq!(network.layers()[1].weights().value(), &[-3e38]);
    assert_eq!(optimizer.step_count(), 0);

    // the next step starts from fresh moments: delta is lr again, not 1.9 / sqrt(2) * lr
    *network.layers_mut()[1].weights_mut() = Tensor::new(vec![0.0], size)?;
    optimizer.accumulator().insert(&gradients)?;
    optimizer.step(&mut network)?;
    assert_eq!(optimizer.step_count(), 1);
    let weight = network.layers()[0].weights().value()[0];
    assert!((weight + 1e38).abs() / 1e38 < 1e-4, "weight {}", weight);
    Ok(())
}
