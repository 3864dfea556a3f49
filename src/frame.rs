//! Frame metadata for coordinate systems.
//!
//! A [`Frame`] describes a block of coordinate axes: how many, their
//! global axis indices, and per-axis type/unit/name. The world side of a
//! coordinate system is either a single frame or a composite of named
//! sub-frames, each owning a contiguous range of world axis indices.

use crate::transform::EvalError;
use crate::tree::TransformTree;
use crate::units::{AxisUnit, Quantity};
use thiserror::Error;

/// Error constructing a frame with inconsistent metadata
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("frame {name:?} declares {naxes} axes but {field} has {got} entries")]
pub struct FrameShapeError {
    /// Name of the frame
    pub name: String,
    /// Declared number of axes
    pub naxes: usize,
    /// The metadata field with the wrong length
    pub field: &'static str,
    /// Number of entries that field actually has
    pub got: usize,
}

/// Metadata for a block of coordinate axes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Name of the frame
    pub name: String,
    /// Number of axes
    pub naxes: usize,
    /// Global axis index of each axis, in order
    pub axes_order: Vec<usize>,
    /// Physical type of each axis
    pub axes_type: Vec<String>,
    /// Unit of each axis
    pub axes_unit: Vec<AxisUnit>,
    /// Name of each axis
    pub axes_name: Vec<String>,
}

impl Frame {
    /// Create a frame, validating that every metadata vector covers every
    /// axis.
    pub fn new(
        name: impl Into<String>,
        axes_order: Vec<usize>,
        axes_type: Vec<String>,
        axes_unit: Vec<AxisUnit>,
        axes_name: Vec<String>,
    ) -> Result<Self, FrameShapeError> {
        let name = name.into();
        let naxes = axes_order.len();
        for (field, got) in [
            ("axes_type", axes_type.len()),
            ("axes_unit", axes_unit.len()),
            ("axes_name", axes_name.len()),
        ] {
            if got != naxes {
                return Err(FrameShapeError {
                    name,
                    naxes,
                    field,
                    got,
                });
            }
        }
        Ok(Self {
            name,
            naxes,
            axes_order,
            axes_type,
            axes_unit,
            axes_name,
        })
    }

    /// Drop the axis at `position` (an index into this frame's own axis
    /// vectors, not a global axis index).
    pub(crate) fn drop_position(&mut self, position: usize) {
        self.axes_order.remove(position);
        self.axes_type.remove(position);
        self.axes_unit.remove(position);
        self.axes_name.remove(position);
        self.naxes -= 1;
    }
}

/// The world side of a coordinate system.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFrame {
    /// One frame owning every world axis
    Single(Frame),
    /// Named sub-frames, each owning a contiguous block of world axes
    Composite {
        /// Name of the composite
        name: String,
        /// The sub-frames, in world axis order
        frames: Vec<Frame>,
    },
}

impl OutputFrame {
    /// Total number of world axes.
    pub fn naxes(&self) -> usize {
        match self {
            OutputFrame::Single(f) => f.naxes,
            OutputFrame::Composite { frames, .. } => frames.iter().map(|f| f.naxes).sum(),
        }
    }

    /// The frames in world axis order (one for a single frame).
    pub fn frames(&self) -> Vec<&Frame> {
        match self {
            OutputFrame::Single(f) => vec![f],
            OutputFrame::Composite { frames, .. } => frames.iter().collect(),
        }
    }

    /// Index of the sub-frame owning the given global world axis.
    pub fn axis_owner(&self, axis: usize) -> Option<usize> {
        self.frames()
            .iter()
            .position(|f| f.axes_order.contains(&axis))
    }

    /// Renumber all axis orders to be contiguous and zero-based while
    /// preserving their relative order.
    pub fn renumber(&mut self) {
        let mut order: Vec<usize> = self
            .frames()
            .iter()
            .flat_map(|f| f.axes_order.iter().copied())
            .collect();
        order.sort_unstable();

        let renumbered = |axis: usize| order.iter().position(|&a| a == axis).unwrap_or(axis);
        match self {
            OutputFrame::Single(f) => {
                f.axes_order = f.axes_order.iter().map(|&a| renumbered(a)).collect();
            }
            OutputFrame::Composite { frames, .. } => {
                for f in frames.iter_mut() {
                    f.axes_order = f.axes_order.iter().map(|&a| renumbered(a)).collect();
                }
            }
        }
    }
}

/// A full coordinate system: forward transform plus frame metadata.
#[derive(Debug, Clone)]
pub struct CoordinateSystem {
    /// Pixel-to-world transform
    pub forward: TransformTree,
    /// The pixel frame
    pub input_frame: Frame,
    /// The world frame
    pub output_frame: OutputFrame,
}

impl CoordinateSystem {
    /// Bundle a transform with its frames.
    pub fn new(forward: TransformTree, input_frame: Frame, output_frame: OutputFrame) -> Self {
        Self {
            forward,
            input_frame,
            output_frame,
        }
    }

    /// Evaluate the forward transform on pixel coordinates.
    pub fn pixel_to_world(&self, pixel: &[Quantity]) -> Result<Vec<Quantity>, EvalError> {
        self.forward.evaluate(pixel)
    }

    /// Evaluate the inverse transform on world coordinates.
    ///
    /// Returns the evaluation error for mismatched inputs; a transform
    /// without an analytic inverse surfaces as
    /// [`crate::transform::InverseError`] from [`TransformTree::inverse`],
    /// so callers needing to distinguish should invert explicitly.
    pub fn world_to_pixel(&self, world: &[Quantity]) -> Result<Vec<Quantity>, WorldToPixelError> {
        let inverse = self.forward.inverse()?;
        Ok(inverse.evaluate(world)?)
    }
}

/// Error converting world coordinates back to pixels
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorldToPixelError {
    /// The forward transform has no inverse
    #[error(transparent)]
    Inverse(#[from] crate::transform::InverseError),
    /// The inverse evaluation failed
    #[error(transparent)]
    Eval(#[from] EvalError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Shift;

    fn frame(name: &str, axes: &[usize]) -> Frame {
        Frame::new(
            name,
            axes.to_vec(),
            axes.iter().map(|_| "custom".to_string()).collect(),
            axes.iter().map(|_| AxisUnit::Pixel).collect(),
            axes.iter().map(|a| format!("axis{a}")).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_frame_validates_lengths() {
        let err = Frame::new(
            "bad",
            vec![0, 1],
            vec!["t".to_string()],
            vec![AxisUnit::Pixel, AxisUnit::Pixel],
            vec!["a".to_string(), "b".to_string()],
        )
        .unwrap_err();
        assert_eq!(err.field, "axes_type");
        assert_eq!(err.got, 1);
    }

    #[test]
    fn test_composite_axis_owner() {
        let out = OutputFrame::Composite {
            name: "world".to_string(),
            frames: vec![frame("celestial", &[0, 1]), frame("temporal", &[2])],
        };
        assert_eq!(out.naxes(), 3);
        assert_eq!(out.axis_owner(1), Some(0));
        assert_eq!(out.axis_owner(2), Some(1));
        assert_eq!(out.axis_owner(7), None);
    }

    #[test]
    fn test_renumber_compacts_axis_orders() {
        let mut out = OutputFrame::Composite {
            name: "world".to_string(),
            frames: vec![frame("celestial", &[1, 2]), frame("spectral", &[4])],
        };
        out.renumber();
        let frames = out.frames();
        assert_eq!(frames[0].axes_order, vec![0, 1]);
        assert_eq!(frames[1].axes_order, vec![2]);
    }

    #[test]
    fn test_pixel_to_world_runs_forward() {
        let system = CoordinateSystem::new(
            TransformTree::leaf(Shift::new(10.0)),
            frame("pixel", &[0]),
            OutputFrame::Single(frame("world", &[0])),
        );
        let out = system.pixel_to_world(&[Quantity::scalar(1.0)]).unwrap();
        assert_eq!(out[0].item().unwrap(), 11.0);
        let back = system.world_to_pixel(&out).unwrap();
        assert_eq!(back[0].item().unwrap(), 1.0);
    }
}
