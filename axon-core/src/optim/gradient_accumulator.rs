use crate::autograd::Gradients;
use crate::error::AxonError;
use crate::model::Sequential;
use crate::tensor::{zeros, Tensor, TensorSize};
use crate::utils::lock;
use log::debug;
use std::sync::Mutex;

/// Parameter sizes of one layer; an empty size means the layer owns no such
/// parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParameterSizes {
    pub weights: TensorSize,
    pub biases: TensorSize,
}

/// Mean gradients handed out by [`GradientAccumulator::accumulate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AveragedGradients {
    pub weights: Vec<Tensor>,
    pub biases: Vec<Tensor>,
    /// Number of contributions the mean was taken over.
    pub samples: usize,
}

impl AveragedGradients {
    pub fn norm(&self) -> f32 {
        self.weights
            .iter()
            .chain(self.biases.iter())
            .map(|t| t.value().iter().map(|v| v * v).sum::<f32>())
            .sum::<f32>()
            .sqrt()
    }

    pub fn is_finite(&self, layer: usize) -> bool {
        self.weights.get(layer).map_or(true, Tensor::is_finite)
            && self.biases.get(layer).map_or(true, Tensor::is_finite)
    }
}

/// Sums are kept in `f64` so the mean of identical contributions is the
/// contribution itself.
#[derive(Debug, Default)]
struct Sums {
    layout: Vec<ParameterSizes>,
    weights: Vec<Vec<f64>>,
    biases: Vec<Vec<f64>>,
    count: usize,
}

impl Sums {
    fn zeroed(layout: Vec<ParameterSizes>) -> Self {
        Sums {
            weights: layout.iter().map(|s| vec![0.0; s.weights.numel()]).collect(),
            biases: layout.iter().map(|s| vec![0.0; s.biases.numel()]).collect(),
            layout,
            count: 0,
        }
    }
}

fn add_slot(sum: &mut [f64], gradient: &Tensor) {
    for (s, g) in sum.iter_mut().zip(gradient.value()) {
        *s += f64::from(*g);
    }
}

fn mean_slot(sum: &[f64], size: TensorSize, count: usize) -> Tensor {
    let mut mean = zeros(size);
    let n = count.max(1) as f64;
    for (m, s) in mean.value_mut().iter_mut().zip(sum) {
        *m = (s / n) as f32;
    }
    mean
}

/// Running per-layer sums of sample gradients for one batch.
///
/// Workers call [`insert`](Self::insert) concurrently; every contribution is
/// checked against the layout in full before any of it is added, so a
/// rejected sample leaves the sums as they were. `accumulate` must only run
/// once all workers of the batch have returned.
#[derive(Debug, Default)]
pub struct GradientAccumulator {
    sums: Mutex<Sums>,
}

impl GradientAccumulator {
    pub fn new(layout: Vec<ParameterSizes>) -> Self {
        GradientAccumulator {
            sums: Mutex::new(Sums::zeroed(layout)),
        }
    }

    /// An accumulator laid out for the parameters of `network`.
    pub fn for_network(network: &Sequential) -> Self {
        GradientAccumulator::new(layout_of(network))
    }

    /// Adopts the layout of `network` if it differs from the current one.
    ///
    /// # Errors
    /// `AxonError::ConfigurationError` if contributions for another layout
    /// are still pending.
    pub fn prepare(&self, network: &Sequential) -> Result<(), AxonError> {
        let layout = layout_of(network);
        let mut sums = lock(&self.sums, "gradient accumulator")?;
        if sums.layout == layout {
            return Ok(());
        }
        if sums.count > 0 {
            return Err(AxonError::ConfigurationError(format!(
                "{} pending gradient contributions were made for a different network",
                sums.count
            )));
        }
        debug!("gradient accumulator laid out for {} layers", layout.len());
        *sums = Sums::zeroed(layout);
        Ok(())
    }

    /// Adds one sample's parameter gradients.
    ///
    /// Empty gradient slots count as zero.
    ///
    /// # Errors
    /// `AxonError::LayerIndexOutOfBounds` for gradients of layers beyond the
    /// layout, `AxonError::ShapeMismatch` for a gradient whose size differs
    /// from the parameter it belongs to.
    pub fn insert(&self, gradients: &Gradients) -> Result<(), AxonError> {
        let mut sums = lock(&self.sums, "gradient accumulator")?;
        let layers = sums.layout.len();
        let provided = gradients.weights.len().max(gradients.biases.len());
        if provided > layers {
            return Err(AxonError::LayerIndexOutOfBounds {
                index: provided - 1,
                count: layers,
            });
        }
        for (layer, sizes) in sums.layout.iter().enumerate() {
            check_slot(gradients.weights.get(layer), sizes.weights, layer, "weights")?;
            check_slot(gradients.biases.get(layer), sizes.biases, layer, "biases")?;
        }

        let sums = &mut *sums;
        for (sum, gradient) in sums.weights.iter_mut().zip(&gradients.weights) {
            add_slot(sum, gradient);
        }
        for (sum, gradient) in sums.biases.iter_mut().zip(&gradients.biases) {
            add_slot(sum, gradient);
        }
        sums.count += 1;
        Ok(())
    }

    /// Returns the mean of every contribution since the last call and clears
    /// the sums. Without contributions the gradients are all zero.
    pub fn accumulate(&self) -> Result<AveragedGradients, AxonError> {
        let mut sums = lock(&self.sums, "gradient accumulator")?;
        let layout = sums.layout.clone();
        let taken = std::mem::replace(&mut *sums, Sums::zeroed(layout));
        let weights = taken
            .weights
            .iter()
            .zip(&taken.layout)
            .map(|(sum, sizes)| mean_slot(sum, sizes.weights, taken.count))
            .collect();
        let biases = taken
            .biases
            .iter()
            .zip(&taken.layout)
            .map(|(sum, sizes)| mean_slot(sum, sizes.biases, taken.count))
            .collect();
        Ok(AveragedGradients {
            weights,
            biases,
            samples: taken.count,
        })
    }

    /// Number of contributions since the last `accumulate`.
    pub fn count(&self) -> Result<usize, AxonError> {
        Ok(lock(&self.sums, "gradient accumulator")?.count)
    }

    pub fn layout(&self) -> Result<Vec<ParameterSizes>, AxonError> {
        Ok(lock(&self.sums, "gradient accumulator")?.layout.clone())
    }

    /// Drops pending contributions, keeping the layout.
    pub fn clear(&self) -> Result<(), AxonError> {
        let mut sums = lock(&self.sums, "gradient accumulator")?;
        let layout = std::mem::take(&mut sums.layout);
        *sums = Sums::zeroed(layout);
        Ok(())
    }
}

fn layout_of(network: &Sequential) -> Vec<ParameterSizes> {
    network
        .layers()
        .iter()
        .map(|layer| ParameterSizes {
            weights: layer.weights().size(),
            biases: layer.biases().size(),
        })
        .collect()
}

fn check_slot(
    gradient: Option<&Tensor>,
    expected: TensorSize,
    layer: usize,
    parameter: &str,
) -> Result<(), AxonError> {
    match gradient {
        Some(gradient) if !gradient.is_empty() && gradient.size() != expected => {
            Err(AxonError::ShapeMismatch {
                expected,
                actual: gradient.size(),
                operation: format!("accumulate layer {} {}", layer, parameter),
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "gradient_accumulator_test.rs"]
mod tests;
