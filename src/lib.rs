//! varying-wcs - Coordinate transforms with lookup-table-varying pointing
//!
//! This crate provides the transform algebra for world coordinate systems
//! whose pointing parameters change along extra pixel axes (a telescope
//! re-pointing between exposures, a slit spectrograph rastering across
//! the sky):
//!
//! - **VaryingCelestialTransform** - gnomonic sky transforms whose
//!   rotation and reference value are looked up per sample, with exact
//!   analytic inverses
//! - **TransformTree** - composable transform expressions (pipe/stack)
//!   with separability tracking
//! - **CoupledCompoundModel** - parallel composition with shared inputs
//!   and inverse-path output duplication
//! - **Tree algebra** - separability-aware removal of pixel axes from a
//!   composed transform
//! - **Ravel/Unravel** - linear-index to N-D coordinate mapping
//! - **Slicer** - array-style slicing of a transform plus its frame
//!   metadata
//!
//! # Example
//!
//! ```
//! use ndarray::{ArrayD, IxDyn};
//! use uom::si::f64::Angle;
//! use varying_wcs::{
//!     AngleExt, Projection, Quantity, Transform, VaryingCelestialTransform,
//! };
//!
//! // Ten pointings rotating from 0 to 90 degrees.
//! let mut pc = Vec::new();
//! for i in 0..10 {
//!     let (s, c) = (i as f64 * 10.0).to_radians().sin_cos();
//!     pc.extend_from_slice(&[c, s, -s, c]);
//! }
//! let vct = VaryingCelestialTransform::from_tables(
//!     [5.0, 5.0],
//!     [Angle::from_arcseconds(1.0), Angle::from_arcseconds(1.0)],
//!     Angle::from_degrees(180.0),
//!     &ArrayD::from_shape_vec(IxDyn(&[10, 2, 2]), pc).unwrap(),
//!     &ArrayD::from_elem(IxDyn(&[2]), Angle::from_arcseconds(0.0)),
//!     Projection::Gnomonic,
//!     false,
//! )
//! .unwrap();
//!
//! let world = vct
//!     .evaluate(&[Quantity::scalar(0.0), Quantity::scalar(0.0), Quantity::scalar(5.0)])
//!     .unwrap();
//! assert!((world[0].item().unwrap() - 359.998).abs() < 1e-3);
//! ```

pub mod algebra;
pub mod broadcast;
pub mod celestial;
pub mod coupled;
pub mod frame;
pub mod projection;
pub mod ravel;
pub mod slicer;
pub mod transform;
pub mod tree;
pub mod units;

// Re-export commonly used types
pub use algebra::{coupled_input_groups, input_map, recompose, remove_input, remove_input_at, AlgebraError};
pub use broadcast::{broadcast_shapes, broadcast_values, BroadcastError};
pub use celestial::{
    CelestialConfigError, CelestialKind, InverseVaryingCelestialTransform,
    VaryingCelestialTransform,
};
pub use coupled::{CoupledCompoundModel, CouplingError};
pub use frame::{CoordinateSystem, Frame, FrameShapeError, OutputFrame, WorldToPixelError};
pub use projection::{Projection, UnsupportedProjection};
pub use ravel::{MemoryOrder, Ravel, RavelConfigError, Unravel};
pub use slicer::{parse_slice, slice_system, SliceError, SliceItem};
pub use transform::{
    AffineMatrix2, Constant, EvalError, Identity, InverseError, Mapping, Scale, Shift, Transform,
};
pub use tree::{CompositionOp, PipeArityError, TransformTree};
pub use units::{merge_units, AngleExt, AxisUnit, Quantity};
