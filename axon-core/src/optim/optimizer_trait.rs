use crate::error::AxonError;
use crate::model::Sequential;

/// What one optimizer step did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Number of completed steps, this one included.
    pub step: u64,
    /// Contributions the averaged gradients were taken over.
    pub samples: usize,
    pub gradient_norm: f32,
}

/// Turns accumulated gradients into parameter updates.
pub trait Optimizer {
    /// Consumes the gradients accumulated since the last step and applies the
    /// resulting deltas to the layers of `network`.
    ///
    /// # Errors
    /// `AxonError::NotCompiled` for an uncompiled network; numerical and
    /// structural failures are reported without being skipped.
    fn step(&mut self, network: &mut Sequential) -> Result<StepReport, AxonError>;

    /// Forgets all optimizer state, as for a freshly initialized network.
    fn reset(&mut self) -> Result<(), AxonError>;
}
