use axon_core::nn::layers::Dense;
use axon_core::{Sequential, Tensor, TensorSize};

/// Routes `log` output through the test harness. Safe to call from every test.
#[allow(dead_code)]
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[allow(dead_code)]
pub fn create_test_tensor(data: Vec<f32>, shape: &[usize]) -> Tensor {
    Tensor::new(data, TensorSize::from_shape(shape)).expect("Test tensor creation failed")
}

/// Single dense layer, 4 inputs and 5 outputs, no bias, with rows of 0.5 and
/// 0.1 alternating.
#[allow(dead_code)]
pub fn dense_scenario_network() -> Sequential {
    let mut network = Sequential::new().with_seed(0);
    network.add(
        Dense::new(5)
            .with_bias(false)
            .with_input_size(TensorSize::new(4, 1, 1)),
    );
    network.compile().expect("compile dense scenario");
    let rows = [0.5, 0.1, 0.5, 0.1, 0.5];
    let weights = rows.iter().flat_map(|&w| [w; 4]).collect();
    *network.layers_mut()[0].weights_mut() =
        Tensor::new(weights, TensorSize::new(4, 5, 1)).expect("scenario weights");
    network
}

/// Eight points in the unit square labelled one-hot by which side of the
/// diagonal they fall on.
#[allow(dead_code)]
pub fn diagonal_dataset() -> Vec<(Tensor, Tensor)> {
    let points = [
        (0.9, 0.1),
        (0.8, 0.3),
        (0.6, 0.2),
        (0.7, 0.0),
        (0.1, 0.9),
        (0.3, 0.8),
        (0.2, 0.6),
        (0.0, 0.7),
    ];
    points
        .iter()
        .map(|&(x, y)| {
            let label = if x > y { vec![1.0, 0.0] } else { vec![0.0, 1.0] };
            (Tensor::from(vec![x, y]), Tensor::from(label))
        })
        .collect()
}
