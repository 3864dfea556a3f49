//! Parallel composition with shared inputs.
//!
//! A [`CoupledCompoundModel`] stacks two transforms that consume an
//! overlapping block of pixel coordinates: the trailing `shared_inputs`
//! inputs of the left side are the same coordinates as the leading
//! `shared_inputs` inputs of the right side. Both sides receive the
//! shared values on the forward path, and the public input count is
//! reduced by the overlap.
//!
//! Inverting the composition is where the coupling bites: the left
//! side's inverse needs the *recovered* shared coordinates, which only
//! the right side's inverse can produce from the world outputs. The
//! inverse is therefore a two-stage pipeline that first recovers the
//! shared coordinates, then duplicates them so one copy feeds the left
//! inverse and one copy passes through to the output.

use crate::transform::{EvalError, Identity, InverseError, Mapping, Transform};
use crate::tree::{CompositionOp, TransformTree};
use crate::units::Quantity;
use log::trace;
use ndarray::Array2;
use thiserror::Error;

/// Error constructing a coupled compound model
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CouplingError {
    /// Only the stack operator supports shared-input coupling
    #[error("shared-input coupling requires the stack operator, got {op}")]
    UnsupportedOperator {
        /// The rejected operator
        op: CompositionOp,
    },
    /// More inputs shared than either side has
    #[error("cannot share {shared_inputs} input(s) between sides with {left_inputs} and {right_inputs} input(s)")]
    SharedInputsTooLarge {
        /// Requested overlap
        shared_inputs: usize,
        /// Inputs of the left side
        left_inputs: usize,
        /// Inputs of the right side
        right_inputs: usize,
    },
}

/// Two stacked transforms coupled through shared inputs.
///
/// `n_inputs = left.n_inputs() + right.n_inputs() - shared_inputs`: the
/// first `left.n_inputs()` public inputs feed the left side and the last
/// `right.n_inputs()` feed the right side, overlapping on the shared
/// block.
///
/// For the inverse to exist, the left side's inverse must accept the
/// left world outputs *followed by the shared pixel coordinates* as its
/// inputs (as the varying celestial transforms do with their lookup
/// coordinates).
#[derive(Debug, Clone)]
pub struct CoupledCompoundModel {
    left: TransformTree,
    right: TransformTree,
    shared_inputs: usize,
}

impl CoupledCompoundModel {
    /// Couple two transforms with the given operator.
    ///
    /// # Arguments
    /// * `op` - Composition operator; anything but [`CompositionOp::Stack`]
    ///   is rejected
    /// * `left`, `right` - The two sides
    /// * `shared_inputs` - Number of trailing left inputs identified with
    ///   leading right inputs
    pub fn new(
        op: CompositionOp,
        left: TransformTree,
        right: TransformTree,
        shared_inputs: usize,
    ) -> Result<Self, CouplingError> {
        if op != CompositionOp::Stack {
            return Err(CouplingError::UnsupportedOperator { op });
        }
        if shared_inputs > left.n_inputs() || shared_inputs > right.n_inputs() {
            return Err(CouplingError::SharedInputsTooLarge {
                shared_inputs,
                left_inputs: left.n_inputs(),
                right_inputs: right.n_inputs(),
            });
        }
        Ok(Self {
            left,
            right,
            shared_inputs,
        })
    }

    /// Couple two transforms with the stack operator.
    pub fn stack(
        left: TransformTree,
        right: TransformTree,
        shared_inputs: usize,
    ) -> Result<Self, CouplingError> {
        Self::new(CompositionOp::Stack, left, right, shared_inputs)
    }

    /// The left side.
    pub fn left(&self) -> &TransformTree {
        &self.left
    }

    /// The right side.
    pub fn right(&self) -> &TransformTree {
        &self.right
    }

    /// Number of shared inputs.
    pub fn shared_inputs(&self) -> usize {
        self.shared_inputs
    }
}

impl Transform for CoupledCompoundModel {
    fn n_inputs(&self) -> usize {
        self.left.n_inputs() + self.right.n_inputs() - self.shared_inputs
    }

    fn n_outputs(&self) -> usize {
        self.left.n_outputs() + self.right.n_outputs()
    }

    fn input_names(&self) -> Vec<String> {
        let mut names = self.left.input_names();
        names.extend(self.right.input_names().into_iter().skip(self.shared_inputs));
        names
    }

    fn output_names(&self) -> Vec<String> {
        let mut names = self.left.output_names();
        names.extend(self.right.output_names());
        names
    }

    fn evaluate(&self, inputs: &[Quantity]) -> Result<Vec<Quantity>, EvalError> {
        let expected = self.n_inputs();
        if inputs.len() != expected {
            return Err(EvalError::WrongArgumentCount {
                expected,
                got: inputs.len(),
            });
        }
        let n_left = self.left.n_inputs();
        let n_right = self.right.n_inputs();

        // The shared block sits at the end of the left slice and the
        // start of the right slice.
        let mut out = self.left.evaluate(&inputs[..n_left])?;
        out.extend(self.right.evaluate(&inputs[inputs.len() - n_right..])?);
        Ok(out)
    }

    fn inverse(&self) -> Result<TransformTree, InverseError> {
        let left_inverse = self.left.inverse()?;
        let right_inverse = self.right.inverse()?;

        let n_left_world = self.left.n_outputs();
        let n_right_recovered = right_inverse.n_outputs();
        let shared = self.shared_inputs;

        // Stage one: pass the left world coordinates through untouched
        // while the right inverse recovers its pixel coordinates, the
        // leading `shared` of which are the shared block.
        let stage1 = TransformTree::stack(
            TransformTree::leaf(Identity::new(n_left_world)),
            right_inverse,
        );

        // Stage two: duplicate the recovered shared block, so one copy
        // feeds the left inverse and one copy survives to the output.
        let mut indices: Vec<usize> = (0..n_left_world + shared).collect();
        indices.extend(n_left_world..n_left_world + n_right_recovered);
        let duplicate = Mapping::new(indices, n_left_world + n_right_recovered).map_err(|e| {
            InverseError::Construction {
                reason: e.to_string(),
            }
        })?;

        let stage3 = TransformTree::stack(
            left_inverse,
            TransformTree::leaf(Identity::new(n_right_recovered)),
        );

        trace!(
            "coupled inverse: {n_left_world} left world output(s), {shared} shared, {n_right_recovered} recovered on the right"
        );

        let tree = TransformTree::pipe(stage1, TransformTree::leaf(duplicate))
            .and_then(|t| TransformTree::pipe(t, stage3))
            .map_err(|e| InverseError::Construction {
                reason: e.to_string(),
            })?;
        Ok(tree)
    }

    fn separability(&self) -> Array2<bool> {
        let left = self.left.separability_matrix();
        let right = self.right.separability_matrix();
        let n_left = self.left.n_inputs();
        let (rows, cols) = (self.n_outputs(), self.n_inputs());
        let mut m = Array2::from_elem((rows, cols), false);

        for o in 0..left.nrows() {
            for i in 0..left.ncols() {
                m[(o, i)] = left[(o, i)];
            }
        }
        // Right-side inputs start inside the shared block.
        let offset = n_left - self.shared_inputs;
        for o in 0..right.nrows() {
            for i in 0..right.ncols() {
                if right[(o, i)] {
                    m[(left.nrows() + o, offset + i)] = true;
                }
            }
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::celestial::VaryingCelestialTransform;
    use crate::projection::Projection;
    use crate::transform::{Scale, Shift};
    use crate::units::{AngleExt, Quantity};
    use approx::assert_relative_eq;
    use ndarray::{ArrayD, IxDyn};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use uom::si::f64::Angle;

    fn celestial() -> VaryingCelestialTransform {
        let mut pc = Vec::new();
        for i in 0..10 {
            let angle = (i as f64 * 10.0).to_radians();
            let (s, c) = angle.sin_cos();
            pc.extend_from_slice(&[c, s, -s, c]);
        }
        VaryingCelestialTransform::from_tables(
            [5.0, 5.0],
            [Angle::from_arcseconds(1.0), Angle::from_arcseconds(1.0)],
            Angle::from_degrees(180.0),
            &ArrayD::from_shape_vec(IxDyn(&[10, 2, 2]), pc).unwrap(),
            &ArrayD::from_elem(IxDyn(&[2]), Angle::from_arcseconds(0.0)),
            Projection::Gnomonic,
            false,
        )
        .unwrap()
    }

    /// Celestial transform sharing its lookup coordinate with a temporal
    /// scale: public inputs (x, y, z), outputs (lon, lat, time).
    fn coupled() -> CoupledCompoundModel {
        CoupledCompoundModel::stack(
            TransformTree::leaf(celestial()),
            TransformTree::leaf(Scale::new(10.0)),
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_input_arithmetic() {
        let model = coupled();
        assert_eq!(model.n_inputs(), 3);
        assert_eq!(model.n_outputs(), 3);
        assert_eq!(model.input_names(), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_rejects_pipe_operator() {
        let err = CoupledCompoundModel::new(
            CompositionOp::Pipe,
            TransformTree::leaf(Shift::new(0.0)),
            TransformTree::leaf(Shift::new(0.0)),
            1,
        )
        .unwrap_err();
        assert_eq!(
            err,
            CouplingError::UnsupportedOperator {
                op: CompositionOp::Pipe
            }
        );
    }

    #[test]
    fn test_rejects_oversized_shared_block() {
        let err = CoupledCompoundModel::stack(
            TransformTree::leaf(Shift::new(0.0)),
            TransformTree::leaf(Shift::new(0.0)),
            2,
        )
        .unwrap_err();
        assert!(matches!(err, CouplingError::SharedInputsTooLarge { .. }));
    }

    #[test]
    fn test_forward_feeds_shared_value_to_both_sides() {
        let model = coupled();
        let out = model
            .evaluate(&[
                Quantity::scalar(0.0),
                Quantity::scalar(0.0),
                Quantity::scalar(5.0),
            ])
            .unwrap();
        assert_eq!(out.len(), 3);
        // The temporal side saw the shared z = 5.
        assert_relative_eq!(out[2].item().unwrap(), 50.0);
        // The celestial side saw the same z as its lookup coordinate.
        assert_relative_eq!(out[0].item().unwrap(), 359.99804329, epsilon = 1e-6);
    }

    #[test]
    fn test_inverse_round_trip() {
        let model = coupled();
        let inv = model.inverse().unwrap();
        assert_eq!(inv.n_inputs(), 3);
        assert_eq!(inv.n_outputs(), 3);

        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..100 {
            let x = rng.gen_range(-5.0..5.0);
            let y = rng.gen_range(-5.0..5.0);
            let z = rng.gen_range(0..10) as f64;
            let world = model.evaluate(&[x.into(), y.into(), z.into()]).unwrap();
            let pixel = inv.evaluate(&world).unwrap();
            assert_relative_eq!(pixel[0].item().unwrap(), x, epsilon = 1e-5);
            assert_relative_eq!(pixel[1].item().unwrap(), y, epsilon = 1e-5);
            assert_relative_eq!(pixel[2].item().unwrap(), z, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_separability_overlaps_on_shared_column() {
        let model = coupled();
        let m = model.separability();
        assert_eq!(m.dim(), (3, 3));
        // Sky outputs depend on x, y and the shared z.
        assert!(m[(0, 0)] && m[(0, 1)] && m[(0, 2)]);
        // Time depends only on the shared z.
        assert!(!m[(2, 0)] && !m[(2, 1)] && m[(2, 2)]);
    }
}
