/// Normalization statistics and scale/shift parameters for one channel.
///
/// `gamma` and `beta` are trained by the normalizer itself: every backward
/// pass takes a plain gradient-descent step with `learning_rate`, whatever
/// optimizer drives the rest of the network.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormalizer {
    pub gamma: f32,
    pub beta: f32,
    pub moving_mean: f32,
    pub moving_variance: f32,
    pub momentum: f32,
    pub epsilon: f32,
    pub learning_rate: f32,
}

/// What a forward pass keeps for the matching backward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub output: Vec<f32>,
    pub normalized: Vec<f32>,
    pub std: f32,
    /// `gamma` as used by the forward pass.
    pub gamma: f32,
}

impl BatchNormalizer {
    pub const DEFAULT_MOMENTUM: f32 = 0.9;
    pub const DEFAULT_EPSILON: f32 = 5e-5;

    pub fn new(learning_rate: f32) -> Self {
        BatchNormalizer {
            gamma: 1.0,
            beta: 0.0,
            moving_mean: 0.0,
            moving_variance: 1.0,
            momentum: Self::DEFAULT_MOMENTUM,
            epsilon: Self::DEFAULT_EPSILON,
            learning_rate,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    /// Normalizes `activations` with their own mean and variance and folds
    /// those into the moving statistics.
    pub fn normalize(&mut self, activations: &[f32]) -> Normalized {
        let n = activations.len().max(1) as f32;
        let mean = activations.iter().sum::<f32>() / n;
        let variance = activations.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;

        self.moving_mean = self.momentum * self.moving_mean + (1.0 - self.momentum) * mean;
        self.moving_variance =
            self.momentum * self.moving_variance + (1.0 - self.momentum) * variance;

        self.scale_and_shift(activations, mean, variance)
    }

    /// Normalizes with the moving statistics, for inference.
    pub fn normalize_inference(&self, activations: &[f32]) -> Normalized {
        self.scale_and_shift(activations, self.moving_mean, self.moving_variance)
    }

    fn scale_and_shift(&self, activations: &[f32], mean: f32, variance: f32) -> Normalized {
        let std = (variance + self.epsilon).sqrt();
        let normalized: Vec<f32> = activations.iter().map(|x| (x - mean) / std).collect();
        let output = normalized
            .iter()
            .map(|x| self.gamma * x + self.beta)
            .collect();
        Normalized {
            output,
            normalized,
            std,
            gamma: self.gamma,
        }
    }

    /// Input gradient for `gradient`, then a local SGD step on gamma and beta.
    pub fn backward(&mut self, forward: &Normalized, gradient: &[f32]) -> Vec<f32> {
        let dx = Self::input_gradient(forward, gradient);
        self.update(forward, gradient);
        dx
    }

    /// `(dx̂ - Σdx̂ - x̂·Σ(dx̂·x̂)) / std` with `dx̂ = gradient · gamma`.
    pub fn input_gradient(forward: &Normalized, gradient: &[f32]) -> Vec<f32> {
        let dx_norm: Vec<f32> = gradient.iter().map(|g| g * forward.gamma).collect();
        let dx_norm_sum: f32 = dx_norm.iter().sum();
        let dx_norm_dot: f32 = dx_norm
            .iter()
            .zip(&forward.normalized)
            .map(|(d, x)| d * x)
            .sum();

        dx_norm
            .iter()
            .zip(&forward.normalized)
            .map(|(d, x)| (d - dx_norm_sum - x * dx_norm_dot) / forward.std)
            .collect()
    }

    /// Gradient-descent step on gamma and beta.
    pub fn update(&mut self, forward: &Normalized, gradient: &[f32]) {
        let d_gamma: f32 = gradient
            .iter()
            .zip(&forward.normalized)
            .map(|(g, x)| g * x)
            .sum();
        let d_beta: f32 = gradient.iter().sum();
        self.gamma -= self.learning_rate * d_gamma;
        self.beta -= self.learning_rate * d_beta;
    }

    pub fn is_finite(&self) -> bool {
        self.gamma.is_finite()
            && self.beta.is_finite()
            && self.moving_mean.is_finite()
            && self.moving_variance.is_finite()
    }
}

#[cfg(test)]
#[path = "batch_normalizer_test.rs"]
mod tests;
