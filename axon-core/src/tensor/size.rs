use serde::{Deserialize, Serialize};
use std::fmt;

/// Dimensions of a [`Tensor`](crate::Tensor): columns × rows × depth.
///
/// Every tensor in Axon is three dimensional. A flat vector of `n` values is
/// `(n, 1, 1)`, a matrix is `(columns, rows, 1)`, and an image with several
/// channels stores one plane per depth index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TensorSize {
    pub columns: usize,
    pub rows: usize,
    pub depth: usize,
}

impl TensorSize {
    pub const fn new(columns: usize, rows: usize, depth: usize) -> Self {
        TensorSize { columns, rows, depth }
    }

    /// Builds a size from a `[columns, rows, depth]` array. Missing trailing
    /// dimensions default to 1; an empty array is the empty size.
    pub fn from_shape(shape: &[usize]) -> Self {
        match shape {
            [] => TensorSize::default(),
            [c] => TensorSize::new(*c, 1, 1),
            [c, r] => TensorSize::new(*c, *r, 1),
            [c, r, d, ..] => TensorSize::new(*c, *r, *d),
        }
    }

    /// Total number of scalars.
    pub fn numel(&self) -> usize {
        self.columns * self.rows * self.depth
    }

    /// Number of scalars in one depth plane.
    pub fn plane(&self) -> usize {
        self.columns * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    pub fn as_array(&self) -> [usize; 3] {
        [self.columns, self.rows, self.depth]
    }

    /// Flat index of `(column, row, depth)` in depth-major layout.
    #[inline]
    pub fn index(&self, column: usize, row: usize, depth: usize) -> usize {
        (depth * self.rows + row) * self.columns + column
    }
}

impl fmt::Display for TensorSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}x{}x{})", self.columns, self.rows, self.depth)
    }
}

impl From<[usize; 3]> for TensorSize {
    fn from(shape: [usize; 3]) -> Self {
        TensorSize::new(shape[0], shape[1], shape[2])
    }
}
