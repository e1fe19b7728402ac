use super::*;
use crate::autograd::grad_check::{check_grad, check_parameter_grad, Parameter};
use crate::tensor::{ones, rand_uniform};
use crate::utils::testing::check_tensor_near;
use rand::SeedableRng;

fn striped_input() -> Tensor {
    let row = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
    Tensor::from_2d(vec![row.to_vec(); 10]).unwrap()
}

fn vertical_filter() -> Tensor {
    Tensor::from_2d(vec![vec![0.0, 1.0, 0.0]; 3]).unwrap()
}

#[test]
fn test_conv2d_same_padding_forward_backward() -> Result<(), AxonError> {
    let mut conv = Conv2d::new(1, (3, 3), (2, 2), Padding::Same).with_bias(false);
    conv.compile(TensorSize::new(10, 10, 1), &mut StdRng::seed_from_u64(0))?;
    assert_eq!(conv.output_size(), TensorSize::new(5, 5, 1));
    *conv.weights_mut() = vertical_filter();

    let mut graph = Graph::new();
    let input = striped_input();
    let output = conv.forward(&input, &mut graph)?;

    let mut expected = vec![0.0; 25];
    for (row, value) in [3.0, 3.0, 3.0, 3.0, 2.0].into_iter().enumerate() {
        expected[row * 5 + 3] = value;
    }
    check_tensor_near(&output, &[5, 5, 1], &expected, 1e-6);

    let gradients = graph.gradients(&output, &ones(output.size()))?;
    let grad_input = &gradients.input[0];
    assert_eq!(grad_input.size(), TensorSize::new(10, 10, 1));
    assert_eq!(grad_input.get(1, 0, 0), 1.0);
    assert_eq!(grad_input.get(1, 2, 0), 2.0);
    assert_eq!(grad_input.get(0, 2, 0), 0.0);
    assert_eq!(gradients.weights[0].size(), TensorSize::new(3, 3, 1));
    assert!(gradients.biases[0].is_empty());
    Ok(())
}

#[test]
fn test_conv2d_valid_multi_channel() -> Result<(), AxonError> {
    let mut conv = Conv2d::new(2, (2, 2), (1, 1), Padding::Valid);
    conv.compile(TensorSize::new(3, 3, 2), &mut StdRng::seed_from_u64(0))?;
    assert_eq!(conv.output_size(), TensorSize::new(2, 2, 2));
    assert_eq!(conv.weights().size(), TensorSize::new(2, 2, 4));

    // filter 0 sums both channels, filter 1 reads channel 1 only
    let mut weights = vec![1.0; 8];
    weights.extend_from_slice(&[0.0; 4]);
    weights.extend_from_slice(&[1.0, 0.0, 0.0, 0.0]);
    *conv.weights_mut() = Tensor::new(weights, TensorSize::new(2, 2, 4))?;
    *conv.biases_mut() = Tensor::from_1d(&[0.5, -1.0]);

    let input = Tensor::new((0..18).map(|v| v as f32).collect(), TensorSize::new(3, 3, 2))?;
    let output = conv.forward(&input, &mut Graph::new())?;
    // filter 0: channel 0 window sums + channel 1 window sums + 0.5
    // filter 1: top-left of channel 1 window - 1
    check_tensor_near(
        &output,
        &[2, 2, 2],
        &[52.5, 60.5, 76.5, 84.5, 8.0, 9.0, 11.0, 12.0],
        1e-5,
    );
    Ok(())
}

#[test]
fn test_conv2d_finite_differences() -> Result<(), AxonError> {
    let mut rng = StdRng::seed_from_u64(5);
    let mut conv = Conv2d::new(2, (3, 2), (2, 1), Padding::Same);
    conv.compile(TensorSize::new(5, 4, 2), &mut rng)?;
    *conv.biases_mut() = Tensor::from_1d(&[0.1, -0.2]);
    let input = rand_uniform(TensorSize::new(5, 4, 2), -1.0, 1.0, &mut rng);
    let output_grad = rand_uniform(conv.output_size(), -1.0, 1.0, &mut rng);

    let layer = conv.clone();
    check_grad(
        |inputs, graph| layer.forward(&inputs[0], graph),
        &[input.clone()],
        &output_grad,
        1e-2,
        1e-2,
    )
    .unwrap();
    check_parameter_grad(&mut conv, Parameter::Weights, &input, &output_grad, 1e-2, 1e-2).unwrap();
    check_parameter_grad(&mut conv, Parameter::Biases, &input, &output_grad, 1e-2, 1e-2).unwrap();
    Ok(())
}

#[test]
fn test_conv2d_valid_too_small_input() {
    let mut conv = Conv2d::new(1, (3, 3), (1, 1), Padding::Valid);
    let result = conv.compile(TensorSize::new(2, 2, 1), &mut StdRng::seed_from_u64(0));
    assert!(matches!(result, Err(AxonError::ConfigurationError(_))));
}
