//! Reverse-mode differentiation over an arena of recorded layer operations.

pub mod backward_op;
pub mod grad_check;
pub mod graph;

pub use backward_op::{BackwardOp, BackwardResult};
pub use graph::{Gradients, Graph, NodeRef};
