//! The generic transform capability and its primitive building blocks.
//!
//! A [`Transform`] maps N named inputs to M named outputs, evaluates over
//! broadcastable coordinate arrays, knows its analytic inverse, and
//! reports which outputs depend on which inputs (separability). Primitive
//! transforms compose into arbitrary expression trees via
//! [`TransformTree`](crate::tree::TransformTree).

use crate::broadcast::{broadcast_values, shape_len, BroadcastError};
use crate::tree::TransformTree;
use crate::units::{merge_units, AxisUnit, Quantity};
use nalgebra::Matrix2;
use ndarray::{ArrayD, Array2, IxDyn};
use std::fmt;
use thiserror::Error;

/// Threshold for considering a determinant as zero
const DETERMINANT_EPSILON: f64 = 1e-10;

/// Error during transform evaluation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    /// Wrong number of input arrays supplied
    #[error("expected {expected} input(s), got {got}")]
    WrongArgumentCount { expected: usize, got: usize },
    /// Input shapes cannot be broadcast together
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

/// Error constructing the inverse of a transform
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InverseError {
    /// The transform has no analytic inverse
    #[error("{transform} has no analytic inverse")]
    NotInvertible { transform: &'static str },
    /// An affine matrix is singular
    #[error("singular matrix: determinant={determinant:.6e}")]
    SingularMatrix { determinant: f64 },
    /// A scale by zero cannot be inverted
    #[error("cannot invert a scale by zero")]
    ZeroScale,
    /// Composing the inverse pipeline failed
    #[error("inverse composition failed: {reason}")]
    Construction { reason: String },
}

/// Error constructing a [`Mapping`] with an out-of-range index
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("mapping index {index} is out of range for {n_inputs} input(s)")]
pub struct MappingIndexError {
    /// The offending index
    pub index: usize,
    /// Number of inputs the mapping draws from
    pub n_inputs: usize,
}

/// A coordinate transform with named inputs and outputs.
///
/// Implementations evaluate element-wise over broadcast coordinate arrays
/// and must be immutable after construction so trees built from them can
/// be shared freely across threads.
pub trait Transform: fmt::Debug + Send + Sync {
    /// Number of input coordinates
    fn n_inputs(&self) -> usize;

    /// Number of output coordinates
    fn n_outputs(&self) -> usize;

    /// Names of the inputs, in order
    fn input_names(&self) -> Vec<String>;

    /// Names of the outputs, in order
    fn output_names(&self) -> Vec<String>;

    /// Apply the transform to one quantity per input.
    fn evaluate(&self, inputs: &[Quantity]) -> Result<Vec<Quantity>, EvalError>;

    /// The analytic inverse, as a transform tree.
    fn inverse(&self) -> Result<TransformTree, InverseError>;

    /// Boolean dependency matrix, `n_outputs` rows by `n_inputs` columns;
    /// entry `(o, i)` is true when output `o` depends on input `i`.
    fn separability(&self) -> Array2<bool>;
}

pub(crate) fn check_arity(expected: usize, got: usize) -> Result<(), EvalError> {
    if expected == got {
        Ok(())
    } else {
        Err(EvalError::WrongArgumentCount { expected, got })
    }
}

fn numbered_names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

/// Additive offset on a single coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct Shift {
    /// Offset added to the input
    pub offset: f64,
}

impl Shift {
    /// Create a shift by `offset`.
    pub fn new(offset: f64) -> Self {
        Self { offset }
    }
}

impl Transform for Shift {
    fn n_inputs(&self) -> usize {
        1
    }

    fn n_outputs(&self) -> usize {
        1
    }

    fn input_names(&self) -> Vec<String> {
        vec!["x".to_string()]
    }

    fn output_names(&self) -> Vec<String> {
        vec!["x".to_string()]
    }

    fn evaluate(&self, inputs: &[Quantity]) -> Result<Vec<Quantity>, EvalError> {
        check_arity(1, inputs.len())?;
        let q = &inputs[0];
        Ok(vec![q.with_values(q.values.mapv(|v| v + self.offset))])
    }

    fn inverse(&self) -> Result<TransformTree, InverseError> {
        Ok(TransformTree::leaf(Shift::new(-self.offset)))
    }

    fn separability(&self) -> Array2<bool> {
        Array2::from_elem((1, 1), true)
    }
}

/// Multiplicative scale on a single coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct Scale {
    /// Factor the input is multiplied by
    pub factor: f64,
}

impl Scale {
    /// Create a scale by `factor`.
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }
}

impl Transform for Scale {
    fn n_inputs(&self) -> usize {
        1
    }

    fn n_outputs(&self) -> usize {
        1
    }

    fn input_names(&self) -> Vec<String> {
        vec!["x".to_string()]
    }

    fn output_names(&self) -> Vec<String> {
        vec!["x".to_string()]
    }

    fn evaluate(&self, inputs: &[Quantity]) -> Result<Vec<Quantity>, EvalError> {
        check_arity(1, inputs.len())?;
        let q = &inputs[0];
        Ok(vec![q.with_values(q.values.mapv(|v| v * self.factor))])
    }

    fn inverse(&self) -> Result<TransformTree, InverseError> {
        if self.factor == 0.0 {
            return Err(InverseError::ZeroScale);
        }
        Ok(TransformTree::leaf(Scale::new(1.0 / self.factor)))
    }

    fn separability(&self) -> Array2<bool> {
        Array2::from_elem((1, 1), true)
    }
}

/// 2x2 affine transform of a coordinate pair.
///
/// Applies `(x', y') = M (x, y)` element-wise over the broadcast of the
/// two inputs; the output unit is the merged unit of the inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineMatrix2 {
    /// The transformation matrix
    pub matrix: Matrix2<f64>,
}

impl AffineMatrix2 {
    /// Create an affine transform from a 2x2 matrix.
    pub fn new(matrix: Matrix2<f64>) -> Self {
        Self { matrix }
    }
}

impl Transform for AffineMatrix2 {
    fn n_inputs(&self) -> usize {
        2
    }

    fn n_outputs(&self) -> usize {
        2
    }

    fn input_names(&self) -> Vec<String> {
        vec!["x".to_string(), "y".to_string()]
    }

    fn output_names(&self) -> Vec<String> {
        vec!["x".to_string(), "y".to_string()]
    }

    fn evaluate(&self, inputs: &[Quantity]) -> Result<Vec<Quantity>, EvalError> {
        check_arity(2, inputs.len())?;
        let (shape, flats) = broadcast_values(&[&inputs[0].values, &inputs[1].values])?;
        let len = shape_len(&shape);
        let m = &self.matrix;

        let mut out_x = ArrayD::from_elem(IxDyn(&shape), 0.0);
        let mut out_y = ArrayD::from_elem(IxDyn(&shape), 0.0);
        for (i, (ox, oy)) in out_x.iter_mut().zip(out_y.iter_mut()).enumerate().take(len) {
            let (x, y) = (flats[0][i], flats[1][i]);
            *ox = m[(0, 0)] * x + m[(0, 1)] * y;
            *oy = m[(1, 0)] * x + m[(1, 1)] * y;
        }

        let unit = merge_units(&[inputs[0].unit, inputs[1].unit]);
        Ok(vec![
            Quantity {
                values: out_x,
                unit,
            },
            Quantity {
                values: out_y,
                unit,
            },
        ])
    }

    fn inverse(&self) -> Result<TransformTree, InverseError> {
        let det = self.matrix.determinant();
        if det.abs() < DETERMINANT_EPSILON {
            return Err(InverseError::SingularMatrix { determinant: det });
        }
        let inv = self
            .matrix
            .try_inverse()
            .ok_or(InverseError::SingularMatrix { determinant: det })?;
        Ok(TransformTree::leaf(AffineMatrix2::new(inv)))
    }

    fn separability(&self) -> Array2<bool> {
        Array2::from_elem((2, 2), true)
    }
}

/// Pass-through of `n` coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    n: usize,
}

impl Identity {
    /// Create an identity over `n` coordinates.
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl Transform for Identity {
    fn n_inputs(&self) -> usize {
        self.n
    }

    fn n_outputs(&self) -> usize {
        self.n
    }

    fn input_names(&self) -> Vec<String> {
        numbered_names("x", self.n)
    }

    fn output_names(&self) -> Vec<String> {
        numbered_names("x", self.n)
    }

    fn evaluate(&self, inputs: &[Quantity]) -> Result<Vec<Quantity>, EvalError> {
        check_arity(self.n, inputs.len())?;
        Ok(inputs.to_vec())
    }

    fn inverse(&self) -> Result<TransformTree, InverseError> {
        Ok(TransformTree::leaf(self.clone()))
    }

    fn separability(&self) -> Array2<bool> {
        Array2::from_shape_fn((self.n, self.n), |(o, i)| o == i)
    }
}

/// Rearrangement (and duplication) of inputs by index.
///
/// Output `o` is a copy of input `indices[o]`; an index may appear more
/// than once, which duplicates that input. Mappings have no general
/// inverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    indices: Vec<usize>,
    n_inputs: usize,
}

impl Mapping {
    /// Create a mapping over `n_inputs` coordinates.
    ///
    /// # Arguments
    /// * `indices` - For each output, the input index it copies
    /// * `n_inputs` - Number of inputs the mapping draws from
    ///
    /// # Returns
    /// * `Ok(Mapping)` - Valid mapping
    /// * `Err(MappingIndexError)` - An index is `>= n_inputs`
    pub fn new(indices: Vec<usize>, n_inputs: usize) -> Result<Self, MappingIndexError> {
        if let Some(&index) = indices.iter().find(|&&i| i >= n_inputs) {
            return Err(MappingIndexError { index, n_inputs });
        }
        Ok(Self { indices, n_inputs })
    }

    /// The output-to-input index table.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl Transform for Mapping {
    fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    fn n_outputs(&self) -> usize {
        self.indices.len()
    }

    fn input_names(&self) -> Vec<String> {
        numbered_names("x", self.n_inputs)
    }

    fn output_names(&self) -> Vec<String> {
        self.indices.iter().map(|i| format!("x{i}")).collect()
    }

    fn evaluate(&self, inputs: &[Quantity]) -> Result<Vec<Quantity>, EvalError> {
        check_arity(self.n_inputs, inputs.len())?;
        Ok(self.indices.iter().map(|&i| inputs[i].clone()).collect())
    }

    fn inverse(&self) -> Result<TransformTree, InverseError> {
        Err(InverseError::NotInvertible {
            transform: "Mapping",
        })
    }

    fn separability(&self) -> Array2<bool> {
        let mut m = Array2::from_elem((self.indices.len(), self.n_inputs), false);
        for (o, &i) in self.indices.iter().enumerate() {
            m[(o, i)] = true;
        }
        m
    }
}

/// A fixed coordinate injected into a composition.
///
/// Takes no inputs and produces one scalar output; stacking a `Constant`
/// alongside pass-through transforms supplies a pinned coordinate to a
/// downstream transform without it appearing as a public input.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    /// The injected value
    pub value: f64,
    /// Unit of the injected value, if any
    pub unit: Option<AxisUnit>,
}

impl Constant {
    /// Create a unitless constant.
    pub fn new(value: f64) -> Self {
        Self { value, unit: None }
    }

    /// Create a constant carrying a unit.
    pub fn with_unit(value: f64, unit: AxisUnit) -> Self {
        Self {
            value,
            unit: Some(unit),
        }
    }
}

impl Transform for Constant {
    fn n_inputs(&self) -> usize {
        0
    }

    fn n_outputs(&self) -> usize {
        1
    }

    fn input_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn output_names(&self) -> Vec<String> {
        vec!["value".to_string()]
    }

    fn evaluate(&self, inputs: &[Quantity]) -> Result<Vec<Quantity>, EvalError> {
        check_arity(0, inputs.len())?;
        Ok(vec![Quantity {
            values: ndarray::arr0(self.value).into_dyn(),
            unit: self.unit,
        }])
    }

    fn inverse(&self) -> Result<TransformTree, InverseError> {
        Err(InverseError::NotInvertible {
            transform: "Constant",
        })
    }

    fn separability(&self) -> Array2<bool> {
        Array2::from_elem((1, 0), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    fn scalar(v: f64) -> Quantity {
        Quantity::scalar(v)
    }

    #[test]
    fn test_shift_and_inverse() {
        let shift = Shift::new(3.0);
        let out = shift.evaluate(&[scalar(2.0)]).unwrap();
        assert_relative_eq!(out[0].item().unwrap(), 5.0);

        let inv = shift.inverse().unwrap();
        let back = inv.evaluate(&out).unwrap();
        assert_relative_eq!(back[0].item().unwrap(), 2.0);
    }

    #[test]
    fn test_shift_preserves_unit() {
        let shift = Shift::new(1.0);
        let out = shift
            .evaluate(&[Quantity::scalar_in(4.0, AxisUnit::Pixel)])
            .unwrap();
        assert_eq!(out[0].unit, Some(AxisUnit::Pixel));
    }

    #[test]
    fn test_scale_zero_not_invertible() {
        assert_eq!(Scale::new(0.0).inverse().unwrap_err(), InverseError::ZeroScale);
    }

    #[test]
    fn test_affine_rotation() {
        let rot = AffineMatrix2::new(Matrix2::new(0.0, -1.0, 1.0, 0.0));
        let out = rot.evaluate(&[scalar(1.0), scalar(0.0)]).unwrap();
        assert_relative_eq!(out[0].item().unwrap(), 0.0);
        assert_relative_eq!(out[1].item().unwrap(), 1.0);
    }

    #[test]
    fn test_affine_round_trip() {
        let m = Matrix2::new(2.0, 1.0, 1.0, 3.0);
        let affine = AffineMatrix2::new(m);
        let inputs = [
            Quantity::unitless(arr1(&[1.0, -2.0, 0.5]).into_dyn()),
            Quantity::unitless(arr1(&[4.0, 0.0, -1.5]).into_dyn()),
        ];
        let out = affine.evaluate(&inputs).unwrap();
        let back = affine.inverse().unwrap().evaluate(&out).unwrap();
        for i in 0..3 {
            assert_relative_eq!(back[0].values[[i]], inputs[0].values[[i]], epsilon = 1e-10);
            assert_relative_eq!(back[1].values[[i]], inputs[1].values[[i]], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_affine_singular_matrix_error() {
        let affine = AffineMatrix2::new(Matrix2::new(1.0, 2.0, 2.0, 4.0));
        match affine.inverse() {
            Err(InverseError::SingularMatrix { determinant }) => {
                assert!(determinant.abs() < 1e-9)
            }
            other => panic!("expected singular matrix error, got {other:?}"),
        }
    }

    #[test]
    fn test_affine_mixed_units_strip() {
        let affine = AffineMatrix2::new(Matrix2::identity());
        let out = affine
            .evaluate(&[Quantity::scalar_in(1.0, AxisUnit::Pixel), scalar(2.0)])
            .unwrap();
        assert_eq!(out[0].unit, None);
    }

    #[test]
    fn test_affine_broadcasts_scalar_against_array() {
        let affine = AffineMatrix2::new(Matrix2::identity());
        let out = affine
            .evaluate(&[
                scalar(7.0),
                Quantity::unitless(arr1(&[1.0, 2.0]).into_dyn()),
            ])
            .unwrap();
        assert_eq!(out[0].shape(), &[2]);
        assert_relative_eq!(out[0].values[[0]], 7.0);
        assert_relative_eq!(out[1].values[[1]], 2.0);
    }

    #[test]
    fn test_identity_separability_is_diagonal() {
        let id = Identity::new(3);
        let m = id.separability();
        assert!(m[(0, 0)] && m[(1, 1)] && m[(2, 2)]);
        assert!(!m[(0, 1)] && !m[(2, 0)]);
    }

    #[test]
    fn test_mapping_duplicates_inputs() {
        let mapping = Mapping::new(vec![0, 1, 1], 2).unwrap();
        let out = mapping.evaluate(&[scalar(5.0), scalar(9.0)]).unwrap();
        assert_eq!(out.len(), 3);
        assert_relative_eq!(out[1].item().unwrap(), 9.0);
        assert_relative_eq!(out[2].item().unwrap(), 9.0);
    }

    #[test]
    fn test_mapping_rejects_bad_index() {
        let err = Mapping::new(vec![0, 2], 2).unwrap_err();
        assert_eq!(err.index, 2);
        assert_eq!(err.n_inputs, 2);
    }

    #[test]
    fn test_constant_takes_no_inputs() {
        let c = Constant::with_unit(5.0, AxisUnit::Pixel);
        let out = c.evaluate(&[]).unwrap();
        assert_relative_eq!(out[0].item().unwrap(), 5.0);
        assert_eq!(out[0].unit, Some(AxisUnit::Pixel));
        assert!(c.evaluate(&[scalar(1.0)]).is_err());
    }

    #[test]
    fn test_wrong_argument_count() {
        let err = Shift::new(1.0).evaluate(&[]).unwrap_err();
        assert_eq!(
            err,
            EvalError::WrongArgumentCount {
                expected: 1,
                got: 0
            }
        );
    }
}
