use crate::autograd::Graph;
use crate::device::{ConvAxis, Padding};
use crate::error::AxonError;
use crate::nn::init::Initializer;
use crate::nn::layer::{Layer, LayerBase, LayerKind};
use crate::nn::layers::conv2d::{check_filters, convolve_channels, init_filters, ConvBackward};
use crate::tensor::{Tensor, TensorSize};
use rand::rngs::StdRng;

/// Transposed 2D convolution, upsampling by the strides.
///
/// Filters are laid out as in [`Conv2d`](super::Conv2d). With `Padding::Same`
/// the output is `input * stride` along each axis.
#[derive(Debug, Clone)]
pub struct TransConv2d {
    base: LayerBase,
    filter_count: usize,
    filter_size: (usize, usize),
    strides: (usize, usize),
    padding: Padding,
}

impl TransConv2d {
    pub fn new(
        filter_count: usize,
        filter_size: (usize, usize),
        strides: (usize, usize),
        padding: Padding,
    ) -> Self {
        TransConv2d {
            base: LayerBase {
                bias_enabled: true,
                ..LayerBase::default()
            },
            filter_count,
            filter_size,
            strides,
            padding,
        }
    }

    pub fn with_bias(mut self, enabled: bool) -> Self {
        self.base.bias_enabled = enabled;
        self
    }

    pub fn with_initializer(mut self, initializer: Initializer) -> Self {
        self.base.initializer = initializer;
        self
    }

    pub fn with_input_size(mut self, size: TensorSize) -> Self {
        self.base.input_size = Some(size);
        self
    }

    fn axes(&self, input_size: TensorSize) -> Result<(ConvAxis, ConvAxis), AxonError> {
        let filter = TensorSize::new(self.filter_size.0, self.filter_size.1, 1);
        ConvAxis::trans_conv_pair(input_size, filter, self.strides, self.padding)
    }
}

impl Layer for TransConv2d {
    fn kind(&self) -> LayerKind {
        LayerKind::TransConv2d {
            filter_count: self.filter_count,
            filter_size: self.filter_size,
            strides: self.strides,
            padding: self.padding,
        }
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn compile(&mut self, input_size: TensorSize, rng: &mut StdRng) -> Result<(), AxonError> {
        check_filters(self.filter_count, self.strides)?;
        let (columns, rows) = self.axes(input_size)?;
        self.base.input_size = Some(input_size);
        self.base.output_size = TensorSize::new(columns.large, rows.large, self.filter_count);
        init_filters(&mut self.base, input_size, self.filter_count, self.filter_size, rng);
        self.base.compiled = true;
        Ok(())
    }

    fn forward(&self, input: &Tensor, graph: &mut Graph) -> Result<Tensor, AxonError> {
        let input_size = self.base.check_input(input, &self.kind())?;
        let device = self.base.device.clone();
        let output = convolve_channels(&self.base, input, self.filter_count, |plane, filter| {
            device.trans_conv2d(plane, filter, self.strides, self.padding)
        })?;
        let (columns, rows) = self.axes(input_size)?;
        graph.record(
            output.with_label("trans_conv2d"),
            &[input],
            ConvBackward {
                input: input.detached(),
                filters: self.base.weights.clone(),
                filter_count: self.filter_count,
                columns,
                rows,
                bias_enabled: self.base.bias_enabled,
                transposed: true,
            },
        )
    }
}

#[cfg(test)]
#[path = "trans_conv2d_test.rs"]
mod tests;
