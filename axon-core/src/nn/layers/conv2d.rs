use crate::autograd::{BackwardOp, BackwardResult, Graph};
use crate::device::{correlate, filter_gradient, scatter, ConvAxis, Padding};
use crate::error::AxonError;
use crate::nn::init::Initializer;
use crate::nn::layer::{Layer, LayerBase, LayerKind};
use crate::tensor::{zeros, Tensor, TensorSize};
use rand::rngs::StdRng;

/// 2D convolution (cross-correlation) over every input channel.
///
/// All filters are stored in one weight tensor of size
/// `(filter_columns, filter_rows, input_depth * filter_count)`; the plane for
/// filter `f` and input channel `c` sits at depth `f * input_depth + c`. There
/// is one bias per filter.
#[derive(Debug, Clone)]
pub struct Conv2d {
    base: LayerBase,
    filter_count: usize,
    filter_size: (usize, usize),
    strides: (usize, usize),
    padding: Padding,
}

impl Conv2d {
    pub fn new(
        filter_count: usize,
        filter_size: (usize, usize),
        strides: (usize, usize),
        padding: Padding,
    ) -> Self {
        Conv2d {
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

    /// Filter plane of filter `filter` for input channel `channel`.
    pub fn filter(&self, filter: usize, channel: usize) -> Tensor {
        let depth = self.base.input_size.map_or(1, |s| s.depth);
        self.base.weights.plane(filter * depth + channel)
    }
}

#[derive(Debug)]
pub(crate) struct ConvBackward {
    pub(crate) input: Tensor,
    pub(crate) filters: Tensor,
    pub(crate) filter_count: usize,
    pub(crate) columns: ConvAxis,
    pub(crate) rows: ConvAxis,
    pub(crate) bias_enabled: bool,
    /// Transposed convolutions swap the roles of input and output planes.
    pub(crate) transposed: bool,
}

impl BackwardOp for ConvBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<BackwardResult, AxonError> {
        let input_size = self.input.size();
        let in_depth = input_size.depth;
        let plane_size = TensorSize::new(input_size.columns, input_size.rows, 1);
        let mut grad_input: Vec<Tensor> = Vec::with_capacity(in_depth);
        let mut grad_filters: Vec<Tensor> = Vec::with_capacity(in_depth * self.filter_count);

        for channel in 0..in_depth {
            let mut acc = zeros(plane_size);
            for f in 0..self.filter_count {
                let filter = self.filters.depth_slice(f * in_depth + channel);
                let delta = grad_output.depth_slice(f);
                let contribution = if self.transposed {
                    correlate(delta, filter, self.columns, self.rows)
                } else {
                    scatter(delta, filter, self.columns, self.rows)
                };
                acc.add_assign(&contribution)?;
            }
            grad_input.push(acc);
        }

        for f in 0..self.filter_count {
            let delta = grad_output.depth_slice(f);
            for channel in 0..in_depth {
                let input = self.input.depth_slice(channel);
                let (large, small) = if self.transposed {
                    (delta, input)
                } else {
                    (input, delta)
                };
                grad_filters.push(filter_gradient(large, small, self.columns, self.rows));
            }
        }

        let grad_input = Tensor::stack_depth(&grad_input)?;
        let grad_filters = Tensor::stack_depth(&grad_filters)?;
        let grad_biases = self.bias_enabled.then(|| {
            Tensor::from(
                (0..self.filter_count)
                    .map(|f| grad_output.depth_slice(f).iter().sum())
                    .collect::<Vec<f32>>(),
            )
        });
        Ok(BackwardResult::input(grad_input).with_parameters(grad_filters, grad_biases))
    }

    fn name(&self) -> &'static str {
        if self.transposed {
            "TransConv2dBackward"
        } else {
            "Conv2dBackward"
        }
    }
}

/// Shared parameter setup of the two convolution layers.
pub(crate) fn init_filters(
    base: &mut LayerBase,
    input_size: TensorSize,
    filter_count: usize,
    filter_size: (usize, usize),
    rng: &mut StdRng,
) {
    let (fc, fr) = filter_size;
    let fan_in = fc * fr * input_size.depth;
    let fan_out = fc * fr * filter_count;
    base.weights = base.initializer.tensor(
        TensorSize::new(fc, fr, input_size.depth * filter_count),
        fan_in,
        fan_out,
        rng,
    );
    base.biases = if base.bias_enabled {
        zeros(TensorSize::new(filter_count, 1, 1))
    } else {
        Tensor::empty()
    };
}

/// Runs `kernel` over every (filter, channel) pair and sums per filter.
pub(crate) fn convolve_channels(
    base: &LayerBase,
    input: &Tensor,
    filter_count: usize,
    mut kernel: impl FnMut(&Tensor, &Tensor) -> Result<Tensor, AxonError>,
) -> Result<Tensor, AxonError> {
    let in_depth = input.size().depth;
    let plane_size = TensorSize::new(base.output_size.columns, base.output_size.rows, 1);
    let biases = base.biases.value();
    let mut planes = Vec::with_capacity(filter_count);
    for f in 0..filter_count {
        let mut acc = zeros(plane_size);
        for channel in 0..in_depth {
            let filter = base.weights.plane(f * in_depth + channel);
            let out = kernel(&input.plane(channel), &filter)?;
            acc.add_assign(&out)?;
        }
        if base.bias_enabled {
            let bias = biases[f];
            acc.value_mut().iter_mut().for_each(|v| *v += bias);
        }
        planes.push(acc);
    }
    Tensor::stack_depth(&planes)
}

pub(crate) fn check_filters(filter_count: usize, strides: (usize, usize)) -> Result<(), AxonError> {
    if filter_count == 0 || strides.0 == 0 || strides.1 == 0 {
        return Err(AxonError::ConfigurationError(format!(
            "convolution needs filters and positive strides, got {} filters and strides {:?}",
            filter_count, strides
        )));
    }
    Ok(())
}

impl Layer for Conv2d {
    fn kind(&self) -> LayerKind {
        LayerKind::Conv2d {
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
        let filter = TensorSize::new(self.filter_size.0, self.filter_size.1, 1);
        let (columns, rows) = ConvAxis::conv_pair(input_size, filter, self.strides, self.padding)?;
        self.base.input_size = Some(input_size);
        self.base.output_size = TensorSize::new(columns.small, rows.small, self.filter_count);
        init_filters(&mut self.base, input_size, self.filter_count, self.filter_size, rng);
        self.base.compiled = true;
        Ok(())
    }

    fn forward(&self, input: &Tensor, graph: &mut Graph) -> Result<Tensor, AxonError> {
        let input_size = self.base.check_input(input, &self.kind())?;
        let device = self.base.device.clone();
        let output = convolve_channels(&self.base, input, self.filter_count, |plane, filter| {
            device.conv2d(plane, filter, self.strides, self.padding)
        })?;
        let filter = TensorSize::new(self.filter_size.0, self.filter_size.1, 1);
        let (columns, rows) = ConvAxis::conv_pair(input_size, filter, self.strides, self.padding)?;
        graph.record(
            output.with_label("conv2d"),
            &[input],
            ConvBackward {
                input: input.detached(),
                filters: self.base.weights.clone(),
                filter_count: self.filter_count,
                columns,
                rows,
                bias_enabled: self.base.bias_enabled,
                transposed: false,
            },
        )
    }
}

#[cfg(test)]
#[path = "conv2d_test.rs"]
mod tests;
