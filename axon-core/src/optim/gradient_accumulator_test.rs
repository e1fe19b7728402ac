use super::{GradientAccumulator, ParameterSizes};
use crate::autograd::Gradients;
use crate::error::AxonError;
use crate::model::Sequential;
use crate::nn::layers::{ActivationLayer, Dense};
use crate::tensor::{Tensor, TensorSize};
use crate::utils::testing::check_tensor_near;
use std::sync::Arc;
use std::thread;

fn layout() -> Vec<ParameterSizes> {
    vec![
        ParameterSizes {
            weights: TensorSize::new(2, 2, 1),
            biases: TensorSize::new(2, 1, 1),
        },
        ParameterSizes::default(),
    ]
}

fn contribution(weights: Vec<f32>, biases: Vec<f32>) -> Gradients {
    let mut gradients = Gradients::default();
    gradients.weights = vec![
        Tensor::new(weights, TensorSize::new(2, 2, 1)).unwrap(),
        Tensor::empty(),
    ];
    gradients.biases = vec![Tensor::from(biases), Tensor::empty()];
    gradients
}

#[test]
fn test_identical_contributions_average_to_themselves() -> Result<(), AxonError> {
    let accumulator = GradientAccumulator::new(layout());
    let gradients = contribution(vec![0.1, -0.2, 0.3, 0.7], vec![1.5, -2.5]);
    for _ in 0..7 {
        accumulator.insert(&gradients)?;
    }
    assert_eq!(accumulator.count()?, 7);

    let averaged = accumulator.accumulate()?;
    assert_eq!(averaged.samples, 7);
    assert_eq!(averaged.weights[0].value(), &[0.1, -0.2, 0.3, 0.7]);
    assert_eq!(averaged.biases[0].value(), &[1.5, -2.5]);
    assert!(averaged.weights[1].is_empty());
    assert_eq!(accumulator.count()?, 0);
    Ok(())
}

#[test]
fn test_identical_mean_is_exact_for_any_count() -> Result<(), AxonError> {
    let accumulator = GradientAccumulator::new(layout());
    let values = [0.1, 0.3, 0.7, 0.123];
    let gradients = contribution(values.to_vec(), vec![1.3, -0.1]);
    for count in 1..=32 {
        for _ in 0..count {
            accumulator.insert(&gradients)?;
        }
        let averaged = accumulator.accumulate()?;
        assert_eq!(averaged.weights[0].value(), &values, "count {}", count);
        assert_eq!(averaged.biases[0].value(), &[1.3, -0.1], "count {}", count);
    }
    Ok(())
}

#[test]
fn test_mean_of_different_contributions() -> Result<(), AxonError> {
    let accumulator = GradientAccumulator::new(layout());
    accumulator.insert(&contribution(vec![1.0, 2.0, 3.0, 4.0], vec![0.0, 2.0]))?;
    accumulator.insert(&contribution(vec![3.0, 2.0, 1.0, 0.0], vec![4.0, 0.0]))?;
    let averaged = accumulator.accumulate()?;
    check_tensor_near(&averaged.weights[0], &[2, 2, 1], &[2.0, 2.0, 2.0, 2.0], 1e-6);
    check_tensor_near(&averaged.biases[0], &[2, 1, 1], &[2.0, 1.0], 1e-6);
    Ok(())
}

#[test]
fn test_accumulate_without_contributions_gives_zeros() -> Result<(), AxonError> {
    let accumulator = GradientAccumulator::new(layout());
    let averaged = accumulator.accumulate()?;
    assert_eq!(averaged.samples, 0);
    check_tensor_near(&averaged.weights[0], &[2, 2, 1], &[0.0; 4], 0.0);
    check_tensor_near(&averaged.biases[0], &[2, 1, 1], &[0.0; 2], 0.0);
    Ok(())
}

#[test]
fn test_accumulate_clears_state() -> Result<(), AxonError> {
    let accumulator = GradientAccumulator::new(layout());
    accumulator.insert(&contribution(vec![1.0; 4], vec![1.0; 2]))?;
    accumulator.accumulate()?;
    let second = accumulator.accumulate()?;
    assert_eq!(second.samples, 0);
    assert_eq!(second.weights[0].sum(), 0.0);
    Ok(())
}

#[test]
fn test_rejected_contribution_leaves_state_untouched() -> Result<(), AxonError> {
    let accumulator = GradientAccumulator::new(layout());
    accumulator.insert(&contribution(vec![1.0; 4], vec![1.0; 2]))?;

    // Valid weights, wrong bias size: nothing of it may be added.
    let mut bad = contribution(vec![5.0; 4], vec![5.0; 2]);
    bad.biases[0] = Tensor::from(vec![5.0, 5.0, 5.0]);
    assert!(matches!(
        accumulator.insert(&bad),
        Err(AxonError::ShapeMismatch { .. })
    ));

    let mut extra = contribution(vec![5.0; 4], vec![5.0; 2]);
    extra.weights.push(Tensor::from(vec![1.0]));
    assert_eq!(
        accumulator.insert(&extra),
        Err(AxonError::LayerIndexOutOfBounds { index: 2, count: 2 })
    );

    let averaged = accumulator.accumulate()?;
    assert_eq!(averaged.samples, 1);
    check_tensor_near(&averaged.weights[0], &[2, 2, 1], &[1.0; 4], 1e-6);
    Ok(())
}

#[test]
fn test_concurrent_inserts() -> Result<(), AxonError> {
    let accumulator = Arc::new(GradientAccumulator::new(layout()));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let accumulator = Arc::clone(&accumulator);
            thread::spawn(move || {
                let g = contribution(vec![i as f32; 4], vec![1.0, -1.0]);
                for _ in 0..25 {
                    accumulator.insert(&g).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let averaged = accumulator.accumulate()?;
    assert_eq!(averaged.samples, 200);
    // Mean of 0..8 is 3.5.
    check_tensor_near(&averaged.weights[0], &[2, 2, 1], &[3.5; 4], 1e-4);
    check_tensor_near(&averaged.biases[0], &[2, 1, 1], &[1.0, -1.0], 1e-5);
    Ok(())
}

#[test]
fn test_prepare_adopts_network_layout() -> Result<(), AxonError> {
    let mut network = Sequential::new().with_seed(1);
    network
        .add(Dense::new(3).with_input_size(TensorSize::new(2, 1, 1)))
        .add(ActivationLayer::tanh());
    network.compile()?;

    let accumulator = GradientAccumulator::new(layout());
    accumulator.insert(&contribution(vec![1.0; 4], vec![1.0; 2]))?;
    assert!(matches!(
        accumulator.prepare(&network),
        Err(AxonError::ConfigurationError(_))
    ));

    accumulator.clear()?;
    accumulator.prepare(&network)?;
    assert_eq!(accumulator.layout()?, GradientAccumulator::for_network(&network).layout()?);
    assert_eq!(accumulator.layout()?[0].weights, TensorSize::new(2, 3, 1));
    Ok(())
}
