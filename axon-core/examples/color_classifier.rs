//! # Colour classifier
//!
//! Trains a small network to tell which channel dominates an RGB colour.
//!
//! 1. Builds a `Sequential` network: `Dense -> LayerNormalize -> ReLU -> Dense -> Softmax`.
//! 2. Generates random colours labelled one-hot by their strongest channel.
//! 3. Trains with `Adam::train_on` / `Optimizer::step`, reporting metrics
//!    through a `MetricsReporter`.
//! 4. Saves the network as layer descriptors and checks that the rebuilt
//!    network predicts the same.
//!
//! Run with `RUST_LOG=info cargo run --example color_classifier`.

use axon_core::nn::layers::{ActivationLayer, Dense, LayerNormalize, Softmax};
use axon_core::nn::losses::CrossEntropy;
use axon_core::optim::{Metric, MetricsReporter};
use axon_core::{Adam, AdamConfig, AxonError, Optimizer, Sequential, Tensor, TensorSize};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const BATCH_SIZE: usize = 32;
const STEPS: usize = 200;

fn colour(rng: &mut StdRng) -> (Tensor, Tensor) {
    let rgb: Vec<f32> = (0..3).map(|_| rng.gen_range(0.0..1.0)).collect();
    let mut label = vec![0.0; 3];
    let strongest = rgb
        .iter()
        .enumerate()
        .fold(0, |best, (i, v)| if *v > rgb[best] { i } else { best });
    label[strongest] = 1.0;
    (Tensor::from(rgb), Tensor::from(label))
}

fn accuracy(network: &Sequential, data: &[(Tensor, Tensor)]) -> Result<f32, AxonError> {
    let mut correct = 0;
    for (input, label) in data {
        let predicted = network.predict(input)?.argmax().map(|(i, _)| i);
        if predicted == label.argmax().map(|(i, _)| i) {
            correct += 1;
        }
    }
    Ok(correct as f32 / data.len() as f32)
}

fn main() -> Result<(), AxonError> {
    env_logger::init();

    let mut network = Sequential::new().with_seed(42);
    network
        .add(Dense::new(16).with_input_size(TensorSize::new(3, 1, 1)))
        .add(LayerNormalize::new())
        .add(ActivationLayer::relu())
        .add(Dense::new(3))
        .add(Softmax::new());
    network.compile()?;

    let reporter = MetricsReporter::new(|metric, value| {
        if metric == Metric::Loss {
            log::debug!("{} = {:.5}", metric, value);
        }
    });
    let mut optimizer =
        Adam::new(AdamConfig::default().with_learning_rate(0.01))?.with_reporter(reporter);
    let loss = CrossEntropy::new();

    let mut rng = StdRng::seed_from_u64(7);
    let test: Vec<_> = (0..200).map(|_| colour(&mut rng)).collect();
    info!("accuracy before training: {:.3}", accuracy(&network, &test)?);

    for step in 0..STEPS {
        let batch: Vec<_> = (0..BATCH_SIZE).map(|_| colour(&mut rng)).collect();
        let report = optimizer.train_on(&network, &batch, &loss)?;
        let step_report = optimizer.step(&mut network)?;
        if step % 50 == 0 {
            info!(
                "step {:>3}: loss {:.4}, gradient norm {:.4}",
                step_report.step, report.loss, step_report.gradient_norm
            );
        }
    }
    info!("accuracy after training: {:.3}", accuracy(&network, &test)?);

    let descriptors = network.descriptors()?;
    let restored = Sequential::from_descriptors(&descriptors)?;
    let probe = Tensor::from(vec![0.9, 0.2, 0.4]);
    let original = network.predict(&probe)?;
    let reloaded = restored.predict(&probe)?;
    info!(
        "prediction for {:?}: {:?} (reloaded {:?})",
        probe.value(),
        original.value(),
        reloaded.value()
    );
    Ok(())
}
