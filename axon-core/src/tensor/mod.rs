// src/tensor/mod.rs

use crate::autograd::NodeRef;
use crate::error::AxonError;

pub mod create;
mod size;

pub use create::{full, ones, rand_uniform, randn, zeros, zeros_like};
pub use size::TensorSize;

/// Represents a three dimensional array of `f32` scalars.
///
/// Values are stored flat in depth-major order (`[depth][row][column]`).
/// A tensor produced by a layer's forward pass carries a [`NodeRef`] into the
/// [`Graph`](crate::autograd::Graph) that recorded it; tensors built from raw
/// data carry none and are graph leaves.
///
/// Cloning a tensor copies its values and keeps the graph reference, so the
/// clone still backpropagates through the same node.
#[derive(Debug, Clone, Default)]
pub struct Tensor {
    pub(crate) value: Vec<f32>,
    pub(crate) size: TensorSize,
    /// Optional human readable label, set by the layer that produced the tensor.
    pub label: Option<String>,
    pub(crate) node: Option<NodeRef>,
}

impl Tensor {
    /// Creates a new tensor from flat depth-major data.
    ///
    /// # Errors
    /// Returns `AxonError::TensorCreationError` if `value.len()` does not match
    /// `size.numel()`.
    pub fn new(value: Vec<f32>, size: TensorSize) -> Result<Self, AxonError> {
        if value.len() != size.numel() {
            return Err(AxonError::TensorCreationError {
                data_len: value.len(),
                size,
            });
        }
        Ok(Tensor {
            value,
            size,
            label: None,
            node: None,
        })
    }

    /// The empty tensor, used for parameters a layer does not own.
    pub fn empty() -> Self {
        Tensor::default()
    }

    /// A flat row vector: `(n, 1, 1)`.
    pub fn from_1d(value: &[f32]) -> Self {
        Tensor {
            size: TensorSize::new(value.len(), 1, 1),
            value: value.to_vec(),
            label: None,
            node: None,
        }
    }

    /// A single plane built from rows of equal length.
    pub fn from_2d(rows: Vec<Vec<f32>>) -> Result<Self, AxonError> {
        Tensor::from_3d(vec![rows])
    }

    /// Builds a tensor from `[depth][row][column]` nested vectors.
    ///
    /// # Errors
    /// Returns `AxonError::TensorCreationError` if the nesting is ragged.
    pub fn from_3d(planes: Vec<Vec<Vec<f32>>>) -> Result<Self, AxonError> {
        let depth = planes.len();
        let rows = planes.first().map_or(0, |p| p.len());
        let columns = planes
            .first()
            .and_then(|p| p.first())
            .map_or(0, |r| r.len());
        let size = TensorSize::new(columns, rows, depth);
        let value: Vec<f32> = planes.into_iter().flatten().flatten().collect();
        Tensor::new(value, size)
    }

    pub(crate) fn from_plane(value: Vec<f32>, columns: usize, rows: usize) -> Self {
        Tensor {
            value,
            size: TensorSize::new(columns, rows, 1),
            label: None,
            node: None,
        }
    }

    pub fn size(&self) -> TensorSize {
        self.size
    }

    /// `[columns, rows, depth]`.
    pub fn shape(&self) -> [usize; 3] {
        self.size.as_array()
    }

    pub fn numel(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn value(&self) -> &[f32] {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut [f32] {
        &mut self.value
    }

    pub fn into_value(self) -> Vec<f32> {
        self.value
    }

    /// The graph node that produced this tensor, if any.
    pub fn node(&self) -> Option<NodeRef> {
        self.node
    }

    pub(crate) fn with_node(mut self, node: NodeRef) -> Self {
        self.node = Some(node);
        self
    }

    /// A copy of this tensor with no graph reference.
    pub fn detached(&self) -> Tensor {
        Tensor {
            value: self.value.clone(),
            size: self.size,
            label: self.label.clone(),
            node: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[inline]
    pub fn get(&self, column: usize, row: usize, depth: usize) -> f32 {
        self.value[self.size.index(column, row, depth)]
    }

    #[inline]
    pub fn set(&mut self, column: usize, row: usize, depth: usize, value: f32) {
        let index = self.size.index(column, row, depth);
        self.value[index] = value;
    }

    /// The values of depth plane `depth`.
    pub fn depth_slice(&self, depth: usize) -> &[f32] {
        let plane = self.size.plane();
        &self.value[depth * plane..(depth + 1) * plane]
    }

    /// Copies depth plane `depth` into a new single-plane tensor.
    pub fn plane(&self, depth: usize) -> Tensor {
        Tensor {
            value: self.depth_slice(depth).to_vec(),
            size: TensorSize::new(self.size.columns, self.size.rows, 1),
            label: None,
            node: None,
        }
    }

    /// Stacks single-plane tensors of equal size along the depth axis.
    pub fn stack_depth(planes: &[Tensor]) -> Result<Tensor, AxonError> {
        let first = match planes.first() {
            Some(first) => first.size,
            None => return Ok(Tensor::empty()),
        };
        let plane_size = TensorSize::new(first.columns, first.rows, 1);
        let mut value = Vec::with_capacity(plane_size.numel() * planes.len());
        for plane in planes {
            if plane.size != plane_size {
                return Err(AxonError::ShapeMismatch {
                    expected: plane_size,
                    actual: plane.size,
                    operation: "stack_depth".to_string(),
                });
            }
            value.extend_from_slice(&plane.value);
        }
        Tensor::new(
            value,
            TensorSize::new(first.columns, first.rows, planes.len()),
        )
    }

    /// Nested `[depth][row][column]` copy of the values.
    pub fn to_3d(&self) -> Vec<Vec<Vec<f32>>> {
        (0..self.size.depth)
            .map(|d| {
                self.depth_slice(d)
                    .chunks(self.size.columns.max(1))
                    .map(|row| row.to_vec())
                    .collect()
            })
            .collect()
    }

    /// Same values viewed with a different size.
    pub fn reshaped(&self, size: TensorSize) -> Result<Tensor, AxonError> {
        if size.numel() != self.numel() {
            return Err(AxonError::ShapeMismatch {
                expected: size,
                actual: self.size,
                operation: "reshape".to_string(),
            });
        }
        Ok(Tensor {
            value: self.value.clone(),
            size,
            label: self.label.clone(),
            node: None,
        })
    }

    /// Applies `f` element-wise, producing a detached tensor.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor {
            value: self.value.iter().map(|&v| f(v)).collect(),
            size: self.size,
            label: None,
            node: None,
        }
    }

    /// Combines two tensors of the same size element-wise.
    pub fn zip_map(
        &self,
        other: &Tensor,
        operation: &str,
        f: impl Fn(f32, f32) -> f32,
    ) -> Result<Tensor, AxonError> {
        self.expect_size(other.size, operation)?;
        Ok(Tensor {
            value: self
                .value
                .iter()
                .zip(other.value.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
            size: self.size,
            label: None,
            node: None,
        })
    }

    pub fn add_assign(&mut self, other: &Tensor) -> Result<(), AxonError> {
        self.expect_size(other.size, "add_assign")?;
        for (a, b) in self.value.iter_mut().zip(other.value.iter()) {
            *a += *b;
        }
        Ok(())
    }

    /// `self -= scale * other`, in place.
    pub fn sub_scaled_assign(&mut self, other: &Tensor, scale: f32) -> Result<(), AxonError> {
        self.expect_size(other.size, "sub_scaled_assign")?;
        for (a, b) in self.value.iter_mut().zip(other.value.iter()) {
            *a -= scale * *b;
        }
        Ok(())
    }

    pub fn scale_assign(&mut self, factor: f32) {
        for v in self.value.iter_mut() {
            *v *= factor;
        }
    }

    pub fn sum(&self) -> f32 {
        self.value.iter().sum()
    }

    pub fn l2_norm(&self) -> f32 {
        self.value.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Scales the tensor to unit L2 norm. A zero tensor is left unchanged.
    pub fn l2_normalize(&mut self) {
        let norm = self.l2_norm();
        if norm > 0.0 {
            self.scale_assign(1.0 / norm);
        }
    }

    /// Clamps every element into `[-limit, limit]`.
    pub fn clip(&mut self, limit: f32) {
        for v in self.value.iter_mut() {
            *v = v.clamp(-limit, limit);
        }
    }

    pub fn is_finite(&self) -> bool {
        self.value.iter().all(|v| v.is_finite())
    }

    /// Index and value of the largest element.
    pub fn argmax(&self) -> Option<(usize, f32)> {
        self.value
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (i, v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((i, v)),
            })
    }

    /// Compares sizes and values within `tolerance`, ignoring graph state.
    pub fn is_value_equal(&self, other: &Tensor, tolerance: f32) -> bool {
        self.size == other.size
            && self
                .value
                .iter()
                .zip(other.value.iter())
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    pub(crate) fn expect_size(&self, size: TensorSize, operation: &str) -> Result<(), AxonError> {
        if self.size != size {
            return Err(AxonError::ShapeMismatch {
                expected: self.size,
                actual: size,
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}

impl PartialEq for Tensor {
    /// Tensors are equal when their sizes and values are; labels and graph
    /// references do not take part.
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && self.value == other.value
    }
}

impl From<Vec<f32>> for Tensor {
    fn from(value: Vec<f32>) -> Self {
        Tensor {
            size: TensorSize::new(value.len(), 1, 1),
            value,
            label: None,
            node: None,
        }
    }
}
