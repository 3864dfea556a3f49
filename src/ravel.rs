//! Linear-index to N-dimensional coordinate mapping.
//!
//! [`Ravel`] collapses an N-tuple of pixel coordinates into one linear
//! index against a fixed array shape and memory order; [`Unravel`] is its
//! structural inverse. Real-valued coordinates are rounded to the nearest
//! integer and clipped into range, so the pair is exact for in-range
//! integer inputs.

use crate::broadcast::{broadcast_values, shape_len};
use crate::transform::{check_arity, EvalError, InverseError, Transform};
use crate::tree::TransformTree;
use crate::units::{merge_units, Quantity};
use ndarray::{Array2, ArrayD, IxDyn};
use thiserror::Error;

/// Error constructing a ravel or unravel transform
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RavelConfigError {
    /// The array shape has fewer than two axes
    #[error("array shape must have at least 2 axes, got {got}")]
    TooFewAxes {
        /// Number of axes supplied
        got: usize,
    },
    /// An axis of the array shape is zero-length
    #[error("array shape {shape:?} has a zero-length axis")]
    ZeroLengthAxis {
        /// The rejected shape
        shape: Vec<usize>,
    },
    /// The memory order flag is not recognised
    #[error("unknown memory order flag {flag:?}: expected 'C' or 'F'")]
    UnknownOrder {
        /// The rejected flag
        flag: char,
    },
}

/// Memory layout order for the linear index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryOrder {
    /// Row-major: the last coordinate varies fastest (flag `'C'`)
    #[default]
    RowMajor,
    /// Column-major: the first coordinate varies fastest (flag `'F'`)
    ColumnMajor,
}

impl MemoryOrder {
    /// Parse a memory order from its conventional single-character flag.
    pub fn from_flag(flag: char) -> Result<Self, RavelConfigError> {
        match flag.to_ascii_uppercase() {
            'C' => Ok(MemoryOrder::RowMajor),
            'F' => Ok(MemoryOrder::ColumnMajor),
            _ => Err(RavelConfigError::UnknownOrder { flag }),
        }
    }
}

fn validate_shape(array_shape: &[usize]) -> Result<(), RavelConfigError> {
    if array_shape.len() < 2 {
        return Err(RavelConfigError::TooFewAxes {
            got: array_shape.len(),
        });
    }
    if array_shape.contains(&0) {
        return Err(RavelConfigError::ZeroLengthAxis {
            shape: array_shape.to_vec(),
        });
    }
    Ok(())
}

/// Cumulative strides for the given shape and order.
fn strides(array_shape: &[usize], order: MemoryOrder) -> Vec<usize> {
    let n = array_shape.len();
    let mut out = vec![1usize; n];
    match order {
        MemoryOrder::RowMajor => {
            for i in (0..n - 1).rev() {
                out[i] = out[i + 1] * array_shape[i + 1];
            }
        }
        MemoryOrder::ColumnMajor => {
            for i in 1..n {
                out[i] = out[i - 1] * array_shape[i - 1];
            }
        }
    }
    out
}

/// N coordinates to one linear index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ravel {
    array_shape: Vec<usize>,
    order: MemoryOrder,
}

impl Ravel {
    /// Create a ravel over `array_shape` in the given memory order.
    ///
    /// # Returns
    /// * `Ok(Ravel)` - Valid configuration
    /// * `Err(RavelConfigError)` - Fewer than 2 axes or a zero-length axis
    pub fn new(array_shape: Vec<usize>, order: MemoryOrder) -> Result<Self, RavelConfigError> {
        validate_shape(&array_shape)?;
        Ok(Self { array_shape, order })
    }

    /// The array shape being indexed.
    pub fn array_shape(&self) -> &[usize] {
        &self.array_shape
    }

    /// The memory order of the linear index.
    pub fn order(&self) -> MemoryOrder {
        self.order
    }
}

impl Transform for Ravel {
    fn n_inputs(&self) -> usize {
        self.array_shape.len()
    }

    fn n_outputs(&self) -> usize {
        1
    }

    fn input_names(&self) -> Vec<String> {
        (0..self.array_shape.len())
            .map(|i| format!("p{i}"))
            .collect()
    }

    fn output_names(&self) -> Vec<String> {
        vec!["index".to_string()]
    }

    fn evaluate(&self, inputs: &[Quantity]) -> Result<Vec<Quantity>, EvalError> {
        check_arity(self.n_inputs(), inputs.len())?;
        let arrays: Vec<&ArrayD<f64>> = inputs.iter().map(|q| &q.values).collect();
        let (shape, flats) = broadcast_values(&arrays)?;
        let len = shape_len(&shape);
        let strides = strides(&self.array_shape, self.order);

        let mut index = ArrayD::from_elem(IxDyn(&shape), 0.0);
        for (i, out) in index.iter_mut().enumerate().take(len) {
            let mut acc = 0.0;
            for (d, (&dim, &stride)) in self.array_shape.iter().zip(&strides).enumerate() {
                let c = flats[d][i].round().clamp(0.0, (dim - 1) as f64);
                acc += c * stride as f64;
            }
            *out = acc;
        }

        let units: Vec<_> = inputs.iter().map(|q| q.unit).collect();
        Ok(vec![Quantity {
            values: index,
            unit: merge_units(&units),
        }])
    }

    fn inverse(&self) -> Result<TransformTree, InverseError> {
        Ok(TransformTree::leaf(Unravel {
            array_shape: self.array_shape.clone(),
            order: self.order,
        }))
    }

    fn separability(&self) -> Array2<bool> {
        Array2::from_elem((1, self.array_shape.len()), true)
    }
}

/// One linear index back to N coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unravel {
    array_shape: Vec<usize>,
    order: MemoryOrder,
}

impl Unravel {
    /// Create an unravel over `array_shape` in the given memory order.
    pub fn new(array_shape: Vec<usize>, order: MemoryOrder) -> Result<Self, RavelConfigError> {
        validate_shape(&array_shape)?;
        Ok(Self { array_shape, order })
    }

    /// The array shape being indexed.
    pub fn array_shape(&self) -> &[usize] {
        &self.array_shape
    }
}

impl Transform for Unravel {
    fn n_inputs(&self) -> usize {
        1
    }

    fn n_outputs(&self) -> usize {
        self.array_shape.len()
    }

    fn input_names(&self) -> Vec<String> {
        vec!["index".to_string()]
    }

    fn output_names(&self) -> Vec<String> {
        (0..self.array_shape.len())
            .map(|i| format!("p{i}"))
            .collect()
    }

    fn evaluate(&self, inputs: &[Quantity]) -> Result<Vec<Quantity>, EvalError> {
        check_arity(1, inputs.len())?;
        let q = &inputs[0];
        let strides = strides(&self.array_shape, self.order);
        let total = shape_len(&self.array_shape) as f64;

        let mut outputs: Vec<ArrayD<f64>> = self
            .array_shape
            .iter()
            .map(|_| ArrayD::from_elem(q.values.raw_dim(), 0.0))
            .collect();
        {
            let mut slots: Vec<_> = outputs.iter_mut().map(|a| a.iter_mut()).collect();
            for &value in q.values.iter() {
                let index = value.round().clamp(0.0, total - 1.0);
                for (d, (&dim, &stride)) in self.array_shape.iter().zip(&strides).enumerate() {
                    let c = (index / stride as f64).floor() % dim as f64;
                    if let Some(slot) = slots[d].next() {
                        *slot = c;
                    }
                }
            }
        }

        Ok(outputs
            .into_iter()
            .map(|values| Quantity {
                values,
                unit: q.unit,
            })
            .collect())
    }

    fn inverse(&self) -> Result<TransformTree, InverseError> {
        Ok(TransformTree::leaf(Ravel {
            array_shape: self.array_shape.clone(),
            order: self.order,
        }))
    }

    fn separability(&self) -> Array2<bool> {
        Array2::from_elem((self.array_shape.len(), 1), true)
    }
}
