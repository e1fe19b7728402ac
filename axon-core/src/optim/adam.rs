use crate::autograd::Graph;
use crate::error::AxonError;
use crate::model::Sequential;
use crate::nn::losses::Loss;
use crate::optim::gradient_accumulator::{AveragedGradients, GradientAccumulator};
use crate::optim::metrics::{Metric, MetricsReporter};
use crate::optim::optimizer_trait::{Optimizer, StepReport};
use crate::tensor::{zeros, Tensor};
use log::{debug, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Hyperparameters of [`Adam`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Scale each layer's weight gradient to unit L2 norm before the update.
    pub l2_normalize: bool,
    /// Clamp trainable parameters into `[-limit, limit]` after every update.
    pub weight_clip: Option<f32>,
    /// Size of the worker pool running per-sample passes.
    pub workers: usize,
}

impl Default for AdamConfig {
    fn default() -> Self {
        AdamConfig {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            l2_normalize: false,
            weight_clip: None,
            workers: rayon::current_num_threads().max(1),
        }
    }
}

impl AdamConfig {
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn validate(&self) -> Result<(), AxonError> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(AxonError::ConfigurationError(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.beta1) {
            return Err(AxonError::ConfigurationError(
                "beta1 must be in [0, 1)".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.beta2) {
            return Err(AxonError::ConfigurationError(
                "beta2 must be in [0, 1)".to_string(),
            ));
        }
        if self.epsilon <= 0.0 {
            return Err(AxonError::ConfigurationError(
                "epsilon must be positive".to_string(),
            ));
        }
        if let Some(limit) = self.weight_clip {
            if limit <= 0.0 {
                return Err(AxonError::ConfigurationError(format!(
                    "weight clip must be positive, got {}",
                    limit
                )));
            }
        }
        if self.workers == 0 {
            return Err(AxonError::ConfigurationError(
                "at least one worker is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// First and second moments of one layer. Allocated on the first step that
/// gives the layer a gradient.
#[derive(Debug, Clone, Default)]
struct Moments {
    m: Option<Tensor>,
    v: Option<Tensor>,
    mb: Option<Tensor>,
    vb: Option<Tensor>,
}

/// Bias corrections `1 - b1^t` and `1 - b2^t` of the current step.
#[derive(Debug, Clone, Copy)]
struct Correction {
    first: f32,
    second: f32,
}

/// Outcome of [`Adam::train_on`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchReport {
    /// Mean loss over the samples that completed.
    pub loss: f32,
    pub samples: usize,
    pub failed: usize,
}

/// Adam optimizer with a per-sample worker pool.
///
/// `train_on` runs the forward and backward pass of every sample of a batch
/// on the pool and feeds the gradients into the accumulator; `step` turns
/// their mean into moment-adjusted deltas. The step counter is shared by all
/// layers.
#[derive(Debug)]
pub struct Adam {
    config: AdamConfig,
    moments: Vec<Moments>,
    t: u64,
    accumulator: GradientAccumulator,
    pool: ThreadPool,
    reporter: Option<MetricsReporter>,
}

impl Adam {
    pub fn new(config: AdamConfig) -> Result<Self, AxonError> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("axon-worker-{}", i))
            .build()
            .map_err(|e| AxonError::ConfigurationError(format!("cannot start worker pool: {}", e)))?;
        Ok(Adam {
            config,
            moments: Vec::new(),
            t: 0,
            accumulator: GradientAccumulator::default(),
            pool,
            reporter: None,
        })
    }

    pub fn with_reporter(mut self, reporter: MetricsReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    /// Completed steps since construction or the last `reset`.
    pub fn step_count(&self) -> u64 {
        self.t
    }

    pub fn accumulator(&self) -> &GradientAccumulator {
        &self.accumulator
    }

    /// Runs forward and backward passes for every `(input, label)` pair and
    /// accumulates the gradients.
    ///
    /// Samples run in parallel on the worker pool against the shared
    /// network. A sample that fails is left out of the accumulated
    /// gradients.
    ///
    /// # Errors
    /// `AxonError::LabelMismatch` before anything runs if a label does not
    /// match the network output, `AxonError::BatchFailed` if no sample
    /// completed.
    pub fn train_on(
        &self,
        network: &Sequential,
        batch: &[(Tensor, Tensor)],
        loss: &dyn Loss,
    ) -> Result<BatchReport, AxonError> {
        if batch.is_empty() {
            return Err(AxonError::EmptyBatch);
        }
        let output_size = network.output_size().ok_or_else(|| AxonError::NotCompiled {
            operation: "train_on".to_string(),
        })?;
        if let Some((_, label)) = batch.iter().find(|(_, l)| l.numel() != output_size.numel()) {
            return Err(AxonError::LabelMismatch {
                expected: output_size.numel(),
                actual: label.numel(),
            });
        }
        self.accumulator.prepare(network)?;

        let results: Vec<Result<f32, AxonError>> = self.pool.install(|| {
            batch
                .par_iter()
                .map(|(input, label)| self.train_sample(network, input, label, loss))
                .collect()
        });

        let mut losses = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(value) => losses.push(value),
                Err(e) => {
                    warn!("sample {} excluded from batch: {}", index, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        let failed = batch.len() - losses.len();
        if losses.is_empty() {
            if let Some(reporter) = &self.reporter {
                reporter.receive(Metric::FailedSamples, failed as f32);
            }
            return Err(AxonError::BatchFailed(Box::new(
                first_error.unwrap_or(AxonError::EmptyBatch),
            )));
        }

        let report = BatchReport {
            loss: losses.iter().sum::<f32>() / losses.len() as f32,
            samples: losses.len(),
            failed,
        };
        if let Some(reporter) = &self.reporter {
            reporter.receive(Metric::Loss, report.loss);
            reporter.receive(Metric::Samples, report.samples as f32);
            reporter.receive(Metric::FailedSamples, report.failed as f32);
        }
        debug!(
            "batch: loss {:.6} over {} samples, {} failed",
            report.loss, report.samples, report.failed
        );
        Ok(report)
    }

    /// Predictions for every input, computed on the worker pool.
    pub fn predict(&self, network: &Sequential, inputs: &[Tensor]) -> Result<Vec<Tensor>, AxonError> {
        self.pool
            .install(|| inputs.par_iter().map(|input| network.predict(input)).collect())
    }

    fn train_sample(
        &self,
        network: &Sequential,
        input: &Tensor,
        label: &Tensor,
        loss: &dyn Loss,
    ) -> Result<f32, AxonError> {
        let mut graph = Graph::new();
        let output = network.forward(input, &mut graph)?;
        let value = loss.loss(&output, label)?;
        let delta = loss.derivative(&output, label)?;
        let gradients = network.gradients(&graph, &output, &delta)?;
        self.accumulator.insert(&gradients)?;
        Ok(value)
    }

    fn correction(&self) -> Correction {
        let t = (self.t + 1) as i32;
        Correction {
            first: 1.0 - self.config.beta1.powi(t),
            second: 1.0 - self.config.beta2.powi(t),
        }
    }

    /// Moment update of one parameter; returns the delta to subtract.
    fn adjust(
        &self,
        gradient: &Tensor,
        m: &mut Option<Tensor>,
        v: &mut Option<Tensor>,
        correction: Correction,
        layer: usize,
    ) -> Result<Tensor, AxonError> {
        if gradient.is_empty() {
            return Ok(Tensor::empty());
        }
        let m = m.get_or_insert_with(|| zeros(gradient.size()));
        let v = v.get_or_insert_with(|| zeros(gradient.size()));
        for moment in [&*m, &*v] {
            if moment.size() != gradient.size() {
                return Err(AxonError::MomentShapeMismatch {
                    layer,
                    expected: moment.size(),
                    actual: gradient.size(),
                });
            }
        }

        let AdamConfig {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = self.config;
        let mut delta = Vec::with_capacity(gradient.numel());
        for ((g, m), v) in gradient
            .value()
            .iter()
            .zip(m.value_mut().iter_mut())
            .zip(v.value_mut().iter_mut())
        {
            *m = b1 * *m + (1.0 - b1) * g;
            *v = b2 * *v + (1.0 - b2) * g * g;
            let m_hat = *m / correction.first;
            let v_hat = *v / correction.second;
            delta.push(lr * m_hat / (v_hat.sqrt() + eps));
        }
        Tensor::new(delta, gradient.size())
    }

    /// Runs the moment updates on `moments` and returns, per layer, the
    /// tensors to hand to `Layer::apply`. `None` marks a non-trainable layer.
    fn plan_updates(
        &self,
        network: &Sequential,
        moments: &mut [Moments],
        averaged: &AveragedGradients,
        correction: Correction,
    ) -> Result<Vec<Option<(Tensor, Tensor)>>, AxonError> {
        let mut updates = Vec::with_capacity(network.len());
        for (index, layer) in network.layers().iter().enumerate() {
            if !layer.trainable() {
                updates.push(None);
                continue;
            }
            let mut weights = averaged.weights[index].clone();
            let biases = &averaged.biases[index];
            if self.config.l2_normalize {
                weights.l2_normalize();
            }

            if layer.uses_optimizer() {
                let state = &mut moments[index];
                let dw = self.adjust(&weights, &mut state.m, &mut state.v, correction, index)?;
                let db = self.adjust(biases, &mut state.mb, &mut state.vb, correction, index)?;
                updates.push(Some((dw, db)));
            } else {
                updates.push(Some((weights, biases.clone())));
            }
        }
        Ok(updates)
    }

    /// Fails with `NonFiniteParameter` if any planned update would leave a
    /// layer with a non-finite parameter. The network is not touched.
    fn check_updates(
        &self,
        network: &Sequential,
        updates: &[Option<(Tensor, Tensor)>],
    ) -> Result<(), AxonError> {
        let lr = self.config.learning_rate;
        for (index, (layer, update)) in network.layers().iter().zip(updates).enumerate() {
            let Some((dw, db)) = update else {
                continue;
            };
            let scale = if layer.uses_optimizer() { 1.0 } else { lr };
            let (mut weights, mut biases) = layer.base().updated_parameters(dw, db, scale)?;
            if let Some(limit) = self.config.weight_clip {
                weights.clip(limit);
                biases.clip(limit);
            }
            let state_finite = layer.state()?.iter().all(Tensor::is_finite);
            if !(weights.is_finite() && biases.is_finite() && state_finite) {
                return Err(AxonError::NonFiniteParameter { layer: index });
            }
        }
        Ok(())
    }
}

impl Optimizer for Adam {
    fn step(&mut self, network: &mut Sequential) -> Result<StepReport, AxonError> {
        if !network.is_compiled() {
            return Err(AxonError::NotCompiled {
                operation: "optimizer step".to_string(),
            });
        }
        self.accumulator.prepare(network)?;
        let averaged = self.accumulator.accumulate()?;
        if let Some(layer) = (0..network.len()).find(|&i| !averaged.is_finite(i)) {
            return Err(AxonError::NonFiniteGradient { layer });
        }

        let gradient_norm = averaged.norm();
        let correction = self.correction();
        let mut moments = self.moments.clone();
        moments.resize_with(network.len(), Moments::default);
        let updates = self.plan_updates(network, &mut moments, &averaged, correction)?;
        self.check_updates(network, &updates)?;

        let lr = self.config.learning_rate;
        for (layer, update) in network.layers_mut().iter_mut().zip(updates) {
            match update {
                Some((dw, db)) => {
                    layer.apply(&dw, &db, lr)?;
                    if let Some(limit) = self.config.weight_clip {
                        layer.weights_mut().clip(limit);
                        layer.biases_mut().clip(limit);
                    }
                }
                None => layer.apply(&Tensor::empty(), &Tensor::empty(), lr)?,
            }
        }
        self.moments = moments;
        self.t += 1;
        if let Some(reporter) = &self.reporter {
            reporter.receive(Metric::GradientNorm, gradient_norm);
        }
        debug!(
            "adam step {}: {} samples, gradient norm {:.6}",
            self.t, averaged.samples, gradient_norm
        );
        Ok(StepReport {
            step: self.t,
            samples: averaged.samples,
            gradient_norm,
        })
    }

    fn reset(&mut self) -> Result<(), AxonError> {
        self.t = 0;
        self.moments.clear();
        self.accumulator.clear()
    }
}

#[cfg(test)]
#[path = "adam_test.rs"]
mod tests;
