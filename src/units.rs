//! Type-safe angular units and unit-carrying array quantities.
//!
//! Scalar transform parameters (pixel scales, reference values, pole
//! longitudes) are strongly typed using the `uom` crate to prevent unit
//! confusion at compile time. Coordinate data travelling through transforms
//! is wrapped in [`Quantity`], which pairs an N-dimensional array with an
//! optional per-axis unit so unit kind can be propagated end to end.

use ndarray::{arr0, ArrayD};
use std::fmt;
use uom::si::angle::{degree, radian, second};
use uom::si::f64::Angle;

/// Extension trait for angle conversions commonly used in WCS parameters.
pub trait AngleExt {
    /// Create an angle from degrees
    fn from_degrees(deg: f64) -> Self;

    /// Get the angle in degrees
    fn as_degrees(&self) -> f64;

    /// Create an angle from radians
    fn from_radians(rad: f64) -> Self;

    /// Get the angle in radians
    fn as_radians(&self) -> f64;

    /// Create an angle from arcseconds
    fn from_arcseconds(arcsec: f64) -> Self;

    /// Get the angle in arcseconds
    fn as_arcseconds(&self) -> f64;
}

impl AngleExt for Angle {
    fn from_degrees(deg: f64) -> Self {
        Angle::new::<degree>(deg)
    }

    fn as_degrees(&self) -> f64 {
        self.get::<degree>()
    }

    fn from_radians(rad: f64) -> Self {
        Angle::new::<radian>(rad)
    }

    fn as_radians(&self) -> f64 {
        self.get::<radian>()
    }

    fn from_arcseconds(arcsec: f64) -> Self {
        Angle::new::<second>(arcsec)
    }

    fn as_arcseconds(&self) -> f64 {
        self.get::<second>()
    }
}

/// Unit attached to a coordinate axis or a coordinate array.
///
/// This is deliberately a small closed set: pixel coordinates on the
/// detector side, angular units on the sky side. Unit *kind* is what
/// transforms propagate; conversion factors for scalar parameters go
/// through [`AngleExt`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisUnit {
    /// Detector pixel coordinate
    Pixel,
    /// Degrees of arc
    Degree,
    /// Seconds of arc
    Arcsecond,
    /// Radians
    Radian,
}

impl AxisUnit {
    /// Short label used in frame metadata and log output.
    pub fn label(&self) -> &'static str {
        match self {
            AxisUnit::Pixel => "pix",
            AxisUnit::Degree => "deg",
            AxisUnit::Arcsecond => "arcsec",
            AxisUnit::Radian => "rad",
        }
    }
}

impl fmt::Display for AxisUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Combine the units of several operands into the unit of a result.
///
/// The unit survives only when every operand agrees on it; a single
/// unitless operand (or any disagreement) strips the unit from the result.
pub fn merge_units(units: &[Option<AxisUnit>]) -> Option<AxisUnit> {
    let first = units.first().copied().flatten()?;
    if units.iter().all(|u| *u == Some(first)) {
        Some(first)
    } else {
        None
    }
}

/// An N-dimensional coordinate array with an optional unit.
///
/// Transforms accept and produce `Quantity` values so that unit kind flows
/// through arbitrary compositions. A scalar is represented as a 0-d array
/// and broadcasts against any shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    /// Coordinate values
    pub values: ArrayD<f64>,
    /// Unit of the values, if any
    pub unit: Option<AxisUnit>,
}

impl Quantity {
    /// Wrap an array with a unit.
    pub fn new(values: ArrayD<f64>, unit: AxisUnit) -> Self {
        Self {
            values,
            unit: Some(unit),
        }
    }

    /// Wrap an array without a unit.
    pub fn unitless(values: ArrayD<f64>) -> Self {
        Self { values, unit: None }
    }

    /// A unitless scalar (0-d array).
    pub fn scalar(value: f64) -> Self {
        Self::unitless(arr0(value).into_dyn())
    }

    /// A scalar carrying a unit.
    pub fn scalar_in(value: f64, unit: AxisUnit) -> Self {
        Self::new(arr0(value).into_dyn(), unit)
    }

    /// Shape of the underlying array.
    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    /// The single value of a one-element quantity, if it is one.
    pub fn item(&self) -> Option<f64> {
        if self.values.len() == 1 {
            self.values.iter().next().copied()
        } else {
            None
        }
    }

    /// Replace the values, keeping this quantity's unit.
    pub fn with_values(&self, values: ArrayD<f64>) -> Self {
        Self {
            values,
            unit: self.unit,
        }
    }
}

impl From<f64> for Quantity {
    fn from(value: f64) -> Self {
        Quantity::scalar(value)
    }
}
