use std::fmt;

/// Scalar quantities reported while training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Mean loss over the samples of a batch that completed.
    Loss,
    /// L2 norm of the averaged parameter gradients of a step.
    GradientNorm,
    Samples,
    FailedSamples,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Loss => "loss",
            Metric::GradientNorm => "gradient_norm",
            Metric::Samples => "samples",
            Metric::FailedSamples => "failed_samples",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

type Callback = Box<dyn Fn(Metric, f32) + Send + Sync>;

/// Forwards training metrics to a callback.
///
/// The callback may run on any worker thread.
pub struct MetricsReporter {
    callback: Callback,
}

impl MetricsReporter {
    pub fn new(callback: impl Fn(Metric, f32) + Send + Sync + 'static) -> Self {
        MetricsReporter {
            callback: Box::new(callback),
        }
    }

    pub fn receive(&self, metric: Metric, value: f32) {
        (self.callback)(metric, value);
    }
}

impl fmt::Debug for MetricsReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsReporter").finish_non_exhaustive()
    }
}
