//! NumPy-rule shape broadcasting over dynamic-dimension arrays.
//!
//! Transforms accept scalars or arrays of any mutually compatible shapes;
//! this module computes the common broadcast shape and materialises each
//! operand as a flat value vector in logical (row-major) order so numeric
//! kernels can iterate in lockstep.

use ndarray::{ArrayD, IxDyn};
use thiserror::Error;

/// Error when operand shapes cannot be broadcast to a common shape
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("shapes {shapes:?} cannot be broadcast together")]
pub struct BroadcastError {
    /// The offending operand shapes
    pub shapes: Vec<Vec<usize>>,
}

/// Compute the common broadcast shape of several operand shapes.
///
/// Shapes are aligned on their trailing axes; a missing or length-1 axis
/// stretches to match, anything else is an error.
pub fn broadcast_shapes(shapes: &[&[usize]]) -> Result<Vec<usize>, BroadcastError> {
    let rank = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut out = vec![1usize; rank];

    for shape in shapes {
        let offset = rank - shape.len();
        for (i, &dim) in shape.iter().enumerate() {
            let o = &mut out[offset + i];
            if *o == dim || dim == 1 {
                continue;
            }
            if *o == 1 {
                *o = dim;
            } else {
                return Err(BroadcastError {
                    shapes: shapes.iter().map(|s| s.to_vec()).collect(),
                });
            }
        }
    }
    Ok(out)
}

/// Broadcast several arrays to their common shape and flatten each into a
/// value vector in logical order.
///
/// Returns the common shape and one flat vector per operand; all vectors
/// have length equal to the product of the common shape, so element `i` of
/// each vector corresponds to the same broadcast sample.
pub fn broadcast_values(
    arrays: &[&ArrayD<f64>],
) -> Result<(Vec<usize>, Vec<Vec<f64>>), BroadcastError> {
    let shapes: Vec<&[usize]> = arrays.iter().map(|a| a.shape()).collect();
    let shape = broadcast_shapes(&shapes)?;

    let mut flats = Vec::with_capacity(arrays.len());
    for array in arrays {
        let view = array.broadcast(IxDyn(&shape)).ok_or_else(|| BroadcastError {
            shapes: shapes.iter().map(|s| s.to_vec()).collect(),
        })?;
        flats.push(view.iter().copied().collect());
    }
    Ok((shape, flats))
}

/// Number of samples in a broadcast shape (product of the dimensions).
pub fn shape_len(shape: &[usize]) -> usize {
    shape.iter().product()
}
