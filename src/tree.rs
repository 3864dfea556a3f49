//! Composable transform expression trees.
//!
//! A [`TransformTree`] is a binary tree whose leaves are primitive
//! transforms and whose internal nodes carry a composition operator:
//! `Pipe` feeds the left child's outputs into the right child, `Stack`
//! evaluates both children side by side on disjoint input blocks.
//! Evaluation, inversion, input/output bookkeeping, and the separability
//! matrix are all structural recursion over the tree.

use crate::transform::{EvalError, InverseError, Transform};
use crate::units::Quantity;
use ndarray::Array2;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Composition operator carried by an internal tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionOp {
    /// Sequential composition: left's outputs feed right's inputs
    Pipe,
    /// Parallel composition: children evaluate on disjoint input blocks
    Stack,
}

impl fmt::Display for CompositionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositionOp::Pipe => f.write_str("pipe"),
            CompositionOp::Stack => f.write_str("stack"),
        }
    }
}

/// Error when piping two trees whose arities do not line up
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot pipe {left_outputs} output(s) into {right_inputs} input(s)")]
pub struct PipeArityError {
    /// Outputs produced by the left tree
    pub left_outputs: usize,
    /// Inputs expected by the right tree
    pub right_inputs: usize,
}

/// A composed transform expression tree.
#[derive(Debug, Clone)]
pub enum TransformTree {
    /// A primitive transform
    Leaf(Arc<dyn Transform>),
    /// Sequential composition
    Pipe(Box<TransformTree>, Box<TransformTree>),
    /// Parallel composition
    Stack(Box<TransformTree>, Box<TransformTree>),
}

impl TransformTree {
    /// Wrap a primitive transform as a leaf.
    pub fn leaf<T: Transform + 'static>(transform: T) -> Self {
        TransformTree::Leaf(Arc::new(transform))
    }

    /// Wrap a shared primitive transform as a leaf.
    pub fn leaf_arc(transform: Arc<dyn Transform>) -> Self {
        TransformTree::Leaf(transform)
    }

    /// Sequentially compose two trees.
    ///
    /// # Returns
    /// * `Ok(TransformTree)` - The piped tree
    /// * `Err(PipeArityError)` - `left.n_outputs() != right.n_inputs()`
    pub fn pipe(left: TransformTree, right: TransformTree) -> Result<Self, PipeArityError> {
        if left.n_outputs() != right.n_inputs() {
            return Err(PipeArityError {
                left_outputs: left.n_outputs(),
                right_inputs: right.n_inputs(),
            });
        }
        Ok(TransformTree::Pipe(Box::new(left), Box::new(right)))
    }

    /// Compose two trees in parallel.
    pub fn stack(left: TransformTree, right: TransformTree) -> Self {
        TransformTree::Stack(Box::new(left), Box::new(right))
    }

    /// The operator of the top node, or `None` for a leaf.
    pub fn op(&self) -> Option<CompositionOp> {
        match self {
            TransformTree::Leaf(_) => None,
            TransformTree::Pipe(_, _) => Some(CompositionOp::Pipe),
            TransformTree::Stack(_, _) => Some(CompositionOp::Stack),
        }
    }

    /// Number of top-level inputs.
    pub fn n_inputs(&self) -> usize {
        match self {
            TransformTree::Leaf(t) => t.n_inputs(),
            TransformTree::Pipe(a, _) => a.n_inputs(),
            TransformTree::Stack(a, b) => a.n_inputs() + b.n_inputs(),
        }
    }

    /// Number of top-level outputs.
    pub fn n_outputs(&self) -> usize {
        match self {
            TransformTree::Leaf(t) => t.n_outputs(),
            TransformTree::Pipe(_, b) => b.n_outputs(),
            TransformTree::Stack(a, b) => a.n_outputs() + b.n_outputs(),
        }
    }

    /// Names of the top-level inputs, in order.
    pub fn input_names(&self) -> Vec<String> {
        match self {
            TransformTree::Leaf(t) => t.input_names(),
            TransformTree::Pipe(a, _) => a.input_names(),
            TransformTree::Stack(a, b) => {
                let mut names = a.input_names();
                names.extend(b.input_names());
                names
            }
        }
    }

    /// Names of the top-level outputs, in order.
    pub fn output_names(&self) -> Vec<String> {
        match self {
            TransformTree::Leaf(t) => t.output_names(),
            TransformTree::Pipe(_, b) => b.output_names(),
            TransformTree::Stack(a, b) => {
                let mut names = a.output_names();
                names.extend(b.output_names());
                names
            }
        }
    }

    /// Evaluate the tree on one quantity per input.
    pub fn evaluate(&self, inputs: &[Quantity]) -> Result<Vec<Quantity>, EvalError> {
        let expected = self.n_inputs();
        if inputs.len() != expected {
            return Err(EvalError::WrongArgumentCount {
                expected,
                got: inputs.len(),
            });
        }
        match self {
            TransformTree::Leaf(t) => t.evaluate(inputs),
            TransformTree::Pipe(a, b) => b.evaluate(&a.evaluate(inputs)?),
            TransformTree::Stack(a, b) => {
                let na = a.n_inputs();
                let mut out = a.evaluate(&inputs[..na])?;
                out.extend(b.evaluate(&inputs[na..])?);
                Ok(out)
            }
        }
    }

    /// The inverse tree: `Pipe` reverses and inverts its children, `Stack`
    /// inverts each side in place, a leaf defers to its transform.
    pub fn inverse(&self) -> Result<TransformTree, InverseError> {
        match self {
            TransformTree::Leaf(t) => t.inverse(),
            TransformTree::Pipe(a, b) => {
                TransformTree::pipe(b.inverse()?, a.inverse()?).map_err(|e| {
                    InverseError::Construction {
                        reason: e.to_string(),
                    }
                })
            }
            TransformTree::Stack(a, b) => Ok(TransformTree::stack(a.inverse()?, b.inverse()?)),
        }
    }

    /// Boolean dependency matrix of the whole tree, `n_outputs` rows by
    /// `n_inputs` columns.
    ///
    /// A leaf reports its own matrix; a `Stack` is the block diagonal of
    /// its children; a `Pipe` is the boolean matrix product, so an output
    /// depends on an input when any intermediate coordinate connects them.
    pub fn separability_matrix(&self) -> Array2<bool> {
        match self {
            TransformTree::Leaf(t) => t.separability(),
            TransformTree::Stack(a, b) => {
                block_diag(&a.separability_matrix(), &b.separability_matrix())
            }
            TransformTree::Pipe(a, b) => {
                bool_matmul(&b.separability_matrix(), &a.separability_matrix())
            }
        }
    }
}

fn block_diag(a: &Array2<bool>, b: &Array2<bool>) -> Array2<bool> {
    let (ar, ac) = a.dim();
    let (br, bc) = b.dim();
    let mut out = Array2::from_elem((ar + br, ac + bc), false);
    for r in 0..ar {
        for c in 0..ac {
            out[(r, c)] = a[(r, c)];
        }
    }
    for r in 0..br {
        for c in 0..bc {
            out[(ar + r, ac + c)] = b[(r, c)];
        }
    }
    out
}

fn bool_matmul(b: &Array2<bool>, a: &Array2<bool>) -> Array2<bool> {
    let (br, bc) = b.dim();
    let (ar, ac) = a.dim();
    debug_assert_eq!(bc, ar);
    let mut out = Array2::from_elem((br, ac), false);
    for r in 0..br {
        for c in 0..ac {
            out[(r, c)] = (0..bc).any(|k| b[(r, k)] && a[(k, c)]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{AffineMatrix2, Identity, Scale, Shift};
    use approx::assert_relative_eq;
    use nalgebra::Matrix2;

    fn shift(offset: f64) -> TransformTree {
        TransformTree::leaf(Shift::new(offset))
    }

    #[test]
    fn test_pipe_evaluation_order() {
        // (x + 1) * 2, not (x * 2) + 1
        let tree = TransformTree::pipe(shift(1.0), TransformTree::leaf(Scale::new(2.0))).unwrap();
        let out = tree.evaluate(&[Quantity::scalar(3.0)]).unwrap();
        assert_relative_eq!(out[0].item().unwrap(), 8.0);
    }

    #[test]
    fn test_pipe_arity_mismatch() {
        let err =
            TransformTree::pipe(shift(1.0), TransformTree::leaf(Identity::new(2))).unwrap_err();
        assert_eq!(err.left_outputs, 1);
        assert_eq!(err.right_inputs, 2);
    }

    #[test]
    fn test_stack_splits_inputs() {
        let tree = TransformTree::stack(shift(10.0), shift(-10.0));
        assert_eq!(tree.n_inputs(), 2);
        let out = tree
            .evaluate(&[Quantity::scalar(1.0), Quantity::scalar(2.0)])
            .unwrap();
        assert_relative_eq!(out[0].item().unwrap(), 11.0);
        assert_relative_eq!(out[1].item().unwrap(), -8.0);
    }

    #[test]
    fn test_pipe_inverse_reverses_children() {
        let tree = TransformTree::pipe(shift(5.0), TransformTree::leaf(Scale::new(4.0))).unwrap();
        let inv = tree.inverse().unwrap();
        let out = tree.evaluate(&[Quantity::scalar(2.0)]).unwrap();
        let back = inv.evaluate(&out).unwrap();
        assert_relative_eq!(back[0].item().unwrap(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_stack_separability_is_block_diagonal() {
        let tree = TransformTree::stack(
            TransformTree::leaf(AffineMatrix2::new(Matrix2::identity())),
            shift(0.0),
        );
        let m = tree.separability_matrix();
        assert_eq!(m.dim(), (3, 3));
        assert!(m[(0, 0)] && m[(0, 1)] && m[(1, 0)] && m[(1, 1)]);
        assert!(m[(2, 2)]);
        assert!(!m[(0, 2)] && !m[(2, 0)] && !m[(2, 1)]);
    }

    #[test]
    fn test_pipe_separability_propagates_through() {
        // Affine couples the pair; piping through per-axis shifts keeps the coupling.
        let rot = TransformTree::leaf(AffineMatrix2::new(Matrix2::new(0.0, -1.0, 1.0, 0.0)));
        let shifts = TransformTree::stack(shift(1.0), shift(2.0));
        let tree = TransformTree::pipe(shifts, rot).unwrap();
        let m = tree.separability_matrix();
        assert!(m[(0, 0)] && m[(0, 1)] && m[(1, 0)] && m[(1, 1)]);
    }

    #[test]
    fn test_wrong_input_count() {
        let tree = TransformTree::stack(shift(0.0), shift(0.0));
        assert!(tree.evaluate(&[Quantity::scalar(0.0)]).is_err());
    }

    #[test]
    fn test_op_reporting() {
        let leaf = shift(0.0);
        assert_eq!(leaf.op(), None);
        assert_eq!(
            TransformTree::stack(shift(0.0), shift(0.0)).op(),
            Some(CompositionOp::Stack)
        );
    }
}
