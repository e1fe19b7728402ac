use crate::error::AxonError;
use crate::tensor::{Tensor, TensorSize};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Padding mode of convolution layers.
///
/// `Same` keeps `ceil(input / stride)` outputs (or `input * stride` for a
/// transposed convolution), placing the odd pixel of padding at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Padding {
    #[default]
    Valid,
    Same,
}

/// Element-wise activation functions a [`Device`] evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Activation {
    ReLu,
    LeakyReLu { limit: f32 },
    Sigmoid,
    Tanh,
    Swish,
    #[default]
    None,
}

impl Activation {
    /// `f(x)`, or `f'(x)` when `derivative` is set.
    pub fn evaluate(&self, x: f32, derivative: bool) -> f32 {
        let sigmoid = |x: f32| 1.0 / (1.0 + (-x).exp());
        match (self, derivative) {
            (Activation::ReLu, false) => x.max(0.0),
            (Activation::ReLu, true) => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            (Activation::LeakyReLu { limit }, false) => {
                if x > 0.0 {
                    x
                } else {
                    limit * x
                }
            }
            (Activation::LeakyReLu { limit }, true) => {
                if x > 0.0 {
                    1.0
                } else {
                    *limit
                }
            }
            (Activation::Sigmoid, false) => sigmoid(x),
            (Activation::Sigmoid, true) => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            (Activation::Tanh, false) => x.tanh(),
            (Activation::Tanh, true) => 1.0 - x.tanh().powi(2),
            (Activation::Swish, false) => x * sigmoid(x),
            (Activation::Swish, true) => {
                let s = sigmoid(x);
                s + x * s * (1.0 - s)
            }
            (Activation::None, false) => x,
            (Activation::None, true) => 1.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Activation::ReLu => "relu",
            Activation::LeakyReLu { .. } => "leaky_relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Swish => "swish",
            Activation::None => "none",
        }
    }
}

/// Backend that executes the compute-heavy kernels of the layers.
///
/// Calls are synchronous: a backend that dispatches to an accelerator waits
/// for completion before returning. Results must be deterministic for
/// identical inputs.
pub trait Device: Debug + Send + Sync {
    /// Applies `activation` (or its derivative) element-wise.
    fn activate(
        &self,
        input: &Tensor,
        activation: Activation,
        derivative: bool,
    ) -> Result<Tensor, AxonError>;

    /// Cross-correlates a single input plane with a single filter plane.
    fn conv2d(
        &self,
        input: &Tensor,
        filter: &Tensor,
        strides: (usize, usize),
        padding: Padding,
    ) -> Result<Tensor, AxonError>;

    /// Transposed convolution of a single input plane with a single filter plane.
    fn trans_conv2d(
        &self,
        input: &Tensor,
        filter: &Tensor,
        strides: (usize, usize),
        padding: Padding,
    ) -> Result<Tensor, AxonError>;

    fn name(&self) -> &'static str;
}

/// Reference backend running every kernel on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cpu;

impl Device for Cpu {
    fn activate(
        &self,
        input: &Tensor,
        activation: Activation,
        derivative: bool,
    ) -> Result<Tensor, AxonError> {
        Ok(input.map(|x| activation.evaluate(x, derivative)))
    }

    fn conv2d(
        &self,
        input: &Tensor,
        filter: &Tensor,
        strides: (usize, usize),
        padding: Padding,
    ) -> Result<Tensor, AxonError> {
        let (columns, rows) = ConvAxis::conv_pair(input.size(), filter.size(), strides, padding)?;
        Ok(correlate(input.value(), filter.value(), columns, rows))
    }

    fn trans_conv2d(
        &self,
        input: &Tensor,
        filter: &Tensor,
        strides: (usize, usize),
        padding: Padding,
    ) -> Result<Tensor, AxonError> {
        let (columns, rows) =
            ConvAxis::trans_conv_pair(input.size(), filter.size(), strides, padding)?;
        Ok(scatter(input.value(), filter.value(), columns, rows))
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}

/// Geometry of a (transposed) convolution along one axis.
///
/// `small` is the strided side (convolution output, transposed-convolution
/// input) and `large` the dense side. Small index `s` and kernel tap `k` touch
/// large index `s * stride + k - offset` when that lands inside `large`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvAxis {
    pub small: usize,
    pub large: usize,
    pub kernel: usize,
    pub stride: usize,
    pub offset: usize,
}

impl ConvAxis {
    /// Axis of a convolution reading `input` values.
    pub fn conv(input: usize, kernel: usize, stride: usize, padding: Padding) -> Result<Self, AxonError> {
        check_geometry(kernel, stride)?;
        let (output, offset) = match padding {
            Padding::Valid => {
                if input < kernel {
                    return Err(AxonError::ConfigurationError(format!(
                        "valid convolution needs an input of at least {} but got {}",
                        kernel, input
                    )));
                }
                ((input - kernel) / stride + 1, 0)
            }
            Padding::Same => {
                let output = (input + stride - 1) / stride;
                let total = ((output.max(1) - 1) * stride + kernel).saturating_sub(input);
                (output, total / 2)
            }
        };
        Ok(ConvAxis {
            small: output,
            large: input,
            kernel,
            stride,
            offset,
        })
    }

    /// Axis of a transposed convolution reading `input` values.
    pub fn trans_conv(input: usize, kernel: usize, stride: usize, padding: Padding) -> Result<Self, AxonError> {
        check_geometry(kernel, stride)?;
        let full = (input.max(1) - 1) * stride + kernel;
        let (output, offset) = match padding {
            Padding::Valid => (full, 0),
            Padding::Same => {
                let output = input * stride;
                (output, full.saturating_sub(output) / 2)
            }
        };
        Ok(ConvAxis {
            small: input,
            large: output,
            kernel,
            stride,
            offset,
        })
    }

    pub(crate) fn conv_pair(
        input: TensorSize,
        filter: TensorSize,
        strides: (usize, usize),
        padding: Padding,
    ) -> Result<(ConvAxis, ConvAxis), AxonError> {
        Ok((
            ConvAxis::conv(input.columns, filter.columns, strides.0, padding)?,
            ConvAxis::conv(input.rows, filter.rows, strides.1, padding)?,
        ))
    }

    pub(crate) fn trans_conv_pair(
        input: TensorSize,
        filter: TensorSize,
        strides: (usize, usize),
        padding: Padding,
    ) -> Result<(ConvAxis, ConvAxis), AxonError> {
        Ok((
            ConvAxis::trans_conv(input.columns, filter.columns, strides.0, padding)?,
            ConvAxis::trans_conv(input.rows, filter.rows, strides.1, padding)?,
        ))
    }

    #[inline]
    fn large_index(&self, small: usize, tap: usize) -> Option<usize> {
        (small * self.stride + tap)
            .checked_sub(self.offset)
            .filter(|&i| i < self.large)
    }
}

fn check_geometry(kernel: usize, stride: usize) -> Result<(), AxonError> {
    if kernel == 0 || stride == 0 {
        return Err(AxonError::ConfigurationError(format!(
            "kernel size {} and stride {} must both be positive",
            kernel, stride
        )));
    }
    Ok(())
}

/// Dense plane -> strided plane: `small[y][x] = Σ large[..] * filter[ky][kx]`.
pub(crate) fn correlate(large: &[f32], filter: &[f32], columns: ConvAxis, rows: ConvAxis) -> Tensor {
    let mut out = vec![0.0; columns.small * rows.small];
    for y in 0..rows.small {
        for ky in 0..rows.kernel {
            let Some(ly) = rows.large_index(y, ky) else { continue };
            for x in 0..columns.small {
                let mut acc = 0.0;
                for kx in 0..columns.kernel {
                    if let Some(lx) = columns.large_index(x, kx) {
                        acc += large[ly * columns.large + lx] * filter[ky * columns.kernel + kx];
                    }
                }
                out[y * columns.small + x] += acc;
            }
        }
    }
    Tensor::from_plane(out, columns.small, rows.small)
}

/// Strided plane -> dense plane, the adjoint of [`correlate`].
pub(crate) fn scatter(small: &[f32], filter: &[f32], columns: ConvAxis, rows: ConvAxis) -> Tensor {
    let mut out = vec![0.0; columns.large * rows.large];
    for y in 0..rows.small {
        for x in 0..columns.small {
            let value = small[y * columns.small + x];
            if value == 0.0 {
                continue;
            }
            for ky in 0..rows.kernel {
                let Some(ly) = rows.large_index(y, ky) else { continue };
                for kx in 0..columns.kernel {
                    if let Some(lx) = columns.large_index(x, kx) {
                        out[ly * columns.large + lx] += value * filter[ky * columns.kernel + kx];
                    }
                }
            }
        }
    }
    Tensor::from_plane(out, columns.large, rows.large)
}

/// Gradient of a filter plane: `Σ small[y][x] * large[..]` per kernel tap.
pub(crate) fn filter_gradient(large: &[f32], small: &[f32], columns: ConvAxis, rows: ConvAxis) -> Tensor {
    let mut out = vec![0.0; columns.kernel * rows.kernel];
    for y in 0..rows.small {
        for ky in 0..rows.kernel {
            let Some(ly) = rows.large_index(y, ky) else { continue };
            for x in 0..columns.small {
                let value = small[y * columns.small + x];
                for kx in 0..columns.kernel {
                    if let Some(lx) = columns.large_index(x, kx) {
                        out[ky * columns.kernel + kx] += value * large[ly * columns.large + lx];
                    }
                }
            }
        }
    }
    Tensor::from_plane(out, columns.kernel, rows.kernel)
}

#[cfg(test)]
#[path = "device_test.rs"]
mod tests;
