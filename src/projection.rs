//! Gnomonic (tangent plane) projection and celestial sphere rotation.
//!
//! Implements the scalar math shared by every varying celestial transform:
//! the gnomonic projection between the intermediate tangent plane and
//! native spherical coordinates, and the rotation between the native
//! sphere and celestial coordinates defined by a reference value and a
//! native pole longitude. Angles on the plane are in degrees; native
//! longitude/latitude are in radians internally.
//!
//! The gnomonic projection is a central projection onto a plane tangent
//! to the sphere at the native pole: small angles are preserved near the
//! tangent point and distortion grows polynomially toward the field
//! edges, which keeps sub-0.01 pixel round-trip accuracy for any
//! realistic field of view.

use std::f64::consts::PI;
use thiserror::Error;

/// Error when a projection code other than the gnomonic TAN is requested
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unsupported projection code {code:?}: only TAN (gnomonic) is supported")]
pub struct UnsupportedProjection {
    /// The rejected projection code
    pub code: String,
}

/// Sky projection kind.
///
/// Only the gnomonic (TAN) projection is supported; the enum exists so the
/// projection is an explicit, validated construction parameter rather than
/// an implicit assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Gnomonic (tangent plane) projection, FITS code "TAN"
    #[default]
    Gnomonic,
}

impl Projection {
    /// Parse a projection from its FITS code.
    ///
    /// # Arguments
    /// * `code` - FITS projection code, e.g. `"TAN"`
    ///
    /// # Returns
    /// * `Ok(Projection)` - The recognised projection
    /// * `Err(UnsupportedProjection)` - Any code other than TAN
    pub fn from_fits_code(code: &str) -> Result<Self, UnsupportedProjection> {
        match code.trim().to_ascii_uppercase().as_str() {
            "TAN" => Ok(Projection::Gnomonic),
            _ => Err(UnsupportedProjection {
                code: code.to_string(),
            }),
        }
    }

    /// The FITS code of this projection.
    pub fn fits_code(&self) -> &'static str {
        match self {
            Projection::Gnomonic => "TAN",
        }
    }
}

/// Project a tangent-plane point to native spherical coordinates.
///
/// # Arguments
/// * `x` - Plane coordinate in degrees
/// * `y` - Plane coordinate in degrees
///
/// # Returns
/// `(phi, theta)` native longitude and latitude in radians. The plane
/// origin maps to the native pole (`theta = 90°`).
pub fn plane_to_native(x: f64, y: f64) -> (f64, f64) {
    let r = x.hypot(y);
    let phi = x.atan2(-y);
    let theta = (180.0 / PI).atan2(r);
    (phi, theta)
}

/// Project native spherical coordinates onto the tangent plane.
///
/// Exact inverse of [`plane_to_native`]. Points at or below the native
/// equator (`theta <= 0`) have no gnomonic image; the radial coordinate
/// diverges and the result carries infinities or NaN accordingly.
///
/// # Arguments
/// * `phi` - Native longitude in radians
/// * `theta` - Native latitude in radians
///
/// # Returns
/// `(x, y)` plane coordinates in degrees.
pub fn native_to_plane(phi: f64, theta: f64) -> (f64, f64) {
    let r = (180.0 / PI) / theta.tan();
    (r * phi.sin(), -r * phi.cos())
}

/// Rotate native spherical coordinates to celestial coordinates.
///
/// Applies the spherical rotation defined by the celestial coordinates of
/// the native pole (`crval`) and the native longitude of the celestial
/// pole (`lon_pole`).
///
/// # Arguments
/// * `phi`, `theta` - Native longitude/latitude in radians
/// * `crval_lon`, `crval_lat` - Celestial reference value in degrees
/// * `lon_pole` - Native longitude of the celestial pole in degrees
///
/// # Returns
/// `(lon, lat)` celestial coordinates in degrees, longitude wrapped to
/// `[0, 360)`.
pub fn native_to_celestial(
    phi: f64,
    theta: f64,
    crval_lon: f64,
    crval_lat: f64,
    lon_pole: f64,
) -> (f64, f64) {
    let alpha_p = crval_lon.to_radians();
    let delta_p = crval_lat.to_radians();
    let phi_p = lon_pole.to_radians();

    let dphi = phi - phi_p;
    let sin_delta = theta.sin() * delta_p.sin() + theta.cos() * delta_p.cos() * dphi.cos();
    let delta = sin_delta.clamp(-1.0, 1.0).asin();
    let alpha = alpha_p
        + (-theta.cos() * dphi.sin())
            .atan2(theta.sin() * delta_p.cos() - theta.cos() * delta_p.sin() * dphi.cos());

    (alpha.to_degrees().rem_euclid(360.0), delta.to_degrees())
}

/// Rotate celestial coordinates back to native spherical coordinates.
///
/// Exact inverse of [`native_to_celestial`] for the same `crval` and
/// `lon_pole`.
///
/// # Arguments
/// * `lon`, `lat` - Celestial coordinates in degrees
/// * `crval_lon`, `crval_lat` - Celestial reference value in degrees
/// * `lon_pole` - Native longitude of the celestial pole in degrees
///
/// # Returns
/// `(phi, theta)` native longitude/latitude in radians.
pub fn celestial_to_native(
    lon: f64,
    lat: f64,
    crval_lon: f64,
    crval_lat: f64,
    lon_pole: f64,
) -> (f64, f64) {
    let alpha_p = crval_lon.to_radians();
    let delta_p = crval_lat.to_radians();
    let phi_p = lon_pole.to_radians();

    let alpha = lon.to_radians();
    let delta = lat.to_radians();
    let dalpha = alpha - alpha_p;

    let phi = phi_p
        + (-delta.cos() * dalpha.sin())
            .atan2(delta.sin() * delta_p.cos() - delta.cos() * delta_p.sin() * dalpha.cos());
    let sin_theta = delta.sin() * delta_p.sin() + delta.cos() * delta_p.cos() * dalpha.cos();
    let theta = sin_theta.clamp(-1.0, 1.0).asin();

    (phi, theta)
}
