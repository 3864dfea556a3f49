//! Celestial transforms whose pointing varies along lookup pixel axes.
//!
//! A [`VaryingCelestialTransform`] maps detector pixel coordinates to sky
//! coordinates through a gnomonic projection whose reference pixel and
//! pixel scale are fixed, but whose rotation matrix (`pc`) and reference
//! value (`crval`) are looked up per sample from tables indexed by one,
//! two, or three extra integer pixel coordinates. Slit variants carry a
//! single spatial axis and reuse one table row for every pixel along the
//! slit.
//!
//! The per-sample pipeline is
//!
//! ```text
//! shift(-crpix) -> scale(cdelt) -> pc -> TAN -> rotate(crval, lon_pole)
//! ```
//!
//! and the inverse transform applies the exact analytic inverse, taking
//! the lookup coordinates as explicit inputs so it selects the same table
//! row as the forward direction.

use crate::broadcast::{broadcast_values, shape_len};
use crate::projection::{
    celestial_to_native, native_to_celestial, native_to_plane, plane_to_native, Projection,
    UnsupportedProjection,
};
use crate::transform::{check_arity, EvalError, InverseError, Transform};
use crate::tree::TransformTree;
use crate::units::{AngleExt, AxisUnit, Quantity};
use log::debug;
use nalgebra::Matrix2;
use ndarray::{Array2, ArrayD, IxDyn};
use std::sync::Arc;
use thiserror::Error;
use uom::si::f64::Angle;

/// Threshold for considering a pc matrix determinant as zero
const DETERMINANT_EPSILON: f64 = 1e-10;

/// Error constructing a varying celestial transform
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CelestialConfigError {
    /// The pc table does not end in a 2x2 matrix axis pair
    #[error("the pc table must have trailing shape (2, 2), got {shape:?}")]
    PcTableShape {
        /// The rejected table shape
        shape: Vec<usize>,
    },
    /// The crval table does not end in a pair axis
    #[error("the crval table must have trailing shape (2,), got {shape:?}")]
    CrvalTableShape {
        /// The rejected table shape
        shape: Vec<usize>,
    },
    /// Both tables vary but over differently shaped lookup grids
    #[error("pc table shape {pc_shape:?} does not match crval table shape {crval_shape:?}")]
    TableShapeMismatch {
        /// Full shape of the pc table
        pc_shape: Vec<usize>,
        /// Full shape of the crval table
        crval_shape: Vec<usize>,
    },
    /// The lookup tables vary over an unsupported number of axes
    #[error("unsupported lookup table rank {rank}: expected 1, 2 or 3")]
    UnsupportedTableRank {
        /// The rejected rank
        rank: usize,
    },
    /// The projection code is not the gnomonic TAN
    #[error(transparent)]
    Projection(#[from] UnsupportedProjection),
}

/// The variant a lookup-table rank (and slit flag) selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CelestialKind {
    /// `(x, y, z)` with a rank-1 table
    Varying1D,
    /// `(x, y, z1, z2)` with a rank-2 table
    Varying2D,
    /// `(x, y, z1, z2, z3)` with a rank-3 table
    Varying3D,
    /// `(along_slit, raster)` with a rank-1 table
    Slit1D,
    /// `(along_slit, raster, repeat)` with a rank-2 table
    Slit2D,
    /// `(along_slit, raster, repeat, scan)` with a rank-3 table
    Slit3D,
}

impl CelestialKind {
    /// Number of lookup axes of this variant.
    pub fn table_rank(&self) -> usize {
        match self {
            CelestialKind::Varying1D | CelestialKind::Slit1D => 1,
            CelestialKind::Varying2D | CelestialKind::Slit2D => 2,
            CelestialKind::Varying3D | CelestialKind::Slit3D => 3,
        }
    }

    /// Whether this is a slit variant.
    pub fn is_slit(&self) -> bool {
        matches!(
            self,
            CelestialKind::Slit1D | CelestialKind::Slit2D | CelestialKind::Slit3D
        )
    }
}

/// Validated lookup tables, shared between a transform and its inverse.
#[derive(Debug)]
struct TableData {
    /// Shape of the lookup grid
    table_shape: Vec<usize>,
    /// pc matrices, four values per row (one row total when static)
    pc: Vec<f64>,
    pc_static: bool,
    /// crval pairs in degrees, two values per row (one row when static)
    crval_deg: Vec<f64>,
    crval_static: bool,
}

impl TableData {
    /// Linear row index from lookup coordinates, rounding each to the
    /// nearest integer. Out-of-range (or NaN) coordinates have no row.
    fn row_index(&self, zs: &[f64]) -> Option<usize> {
        let mut idx = 0usize;
        for (&z, &dim) in zs.iter().zip(&self.table_shape) {
            let r = z.round();
            if !(r >= 0.0 && r <= (dim - 1) as f64) {
                return None;
            }
            idx = idx * dim + r as usize;
        }
        Some(idx)
    }

    fn pc_row(&self, row: usize) -> Matrix2<f64> {
        let base = if self.pc_static { 0 } else { row * 4 };
        Matrix2::new(
            self.pc[base],
            self.pc[base + 1],
            self.pc[base + 2],
            self.pc[base + 3],
        )
    }

    fn crval_row(&self, row: usize) -> (f64, f64) {
        let base = if self.crval_static { 0 } else { row * 2 };
        (self.crval_deg[base], self.crval_deg[base + 1])
    }

    fn n_pc_rows(&self) -> usize {
        if self.pc_static {
            1
        } else {
            shape_len(&self.table_shape)
        }
    }
}

fn validate_tables(
    pc_table: &ArrayD<f64>,
    crval_shape: &[usize],
) -> Result<Vec<usize>, CelestialConfigError> {
    let pc_shape = pc_table.shape();
    let pc_leading = if pc_shape == [2, 2] {
        None
    } else if pc_shape.len() > 2 && pc_shape[pc_shape.len() - 2..] == [2, 2] {
        Some(pc_shape[..pc_shape.len() - 2].to_vec())
    } else {
        return Err(CelestialConfigError::PcTableShape {
            shape: pc_shape.to_vec(),
        });
    };

    let crval_leading = if crval_shape == [2] {
        None
    } else if crval_shape.len() > 1 && crval_shape[crval_shape.len() - 1] == 2 {
        Some(crval_shape[..crval_shape.len() - 1].to_vec())
    } else {
        return Err(CelestialConfigError::CrvalTableShape {
            shape: crval_shape.to_vec(),
        });
    };

    match (pc_leading, crval_leading) {
        (Some(pc), Some(crval)) if pc != crval => Err(CelestialConfigError::TableShapeMismatch {
            pc_shape: pc_shape.to_vec(),
            crval_shape: crval_shape.to_vec(),
        }),
        (Some(pc), _) => Ok(pc),
        (None, Some(crval)) => Ok(crval),
        (None, None) => Ok(Vec::new()),
    }
}

/// A celestial transform whose rotation and reference value vary with
/// lookup pixel coordinates.
///
/// Construct through [`VaryingCelestialTransform::from_tables`], which
/// validates the tables and selects the variant from their rank.
#[derive(Debug, Clone)]
pub struct VaryingCelestialTransform {
    crpix: [f64; 2],
    cdelt_deg: [f64; 2],
    lon_pole_deg: f64,
    projection: Projection,
    kind: CelestialKind,
    tables: Arc<TableData>,
}

impl VaryingCelestialTransform {
    /// Build a varying celestial transform from its parameter tables.
    ///
    /// The variant is selected by an explicit match on the rank of the
    /// lookup tables: rank 1, 2 or 3, each in a plain or slit flavour.
    /// Either table may be static (`(2,2)` / `(2,)`); when both vary
    /// their lookup grids must agree.
    ///
    /// # Arguments
    /// * `crpix` - Reference pixel, in pixels
    /// * `cdelt` - Pixel scale, angle per pixel
    /// * `lon_pole` - Native longitude of the celestial pole
    /// * `pc_table` - Rotation matrices, trailing shape `(2, 2)`
    /// * `crval_table` - Reference values, trailing shape `(2,)`
    /// * `projection` - Sky projection (only TAN is accepted upstream)
    /// * `slit` - Select the slit variants
    pub fn from_tables(
        crpix: [f64; 2],
        cdelt: [Angle; 2],
        lon_pole: Angle,
        pc_table: &ArrayD<f64>,
        crval_table: &ArrayD<Angle>,
        projection: Projection,
        slit: bool,
    ) -> Result<Self, CelestialConfigError> {
        let table_shape = validate_tables(pc_table, crval_table.shape())?;

        let kind = match (table_shape.len(), slit) {
            (1, false) => CelestialKind::Varying1D,
            (2, false) => CelestialKind::Varying2D,
            (3, false) => CelestialKind::Varying3D,
            (1, true) => CelestialKind::Slit1D,
            (2, true) => CelestialKind::Slit2D,
            (3, true) => CelestialKind::Slit3D,
            (rank, _) => return Err(CelestialConfigError::UnsupportedTableRank { rank }),
        };
        debug!("selected {kind:?} for lookup table shape {table_shape:?}");

        let tables = TableData {
            pc_static: pc_table.shape() == [2, 2],
            pc: pc_table.iter().copied().collect(),
            crval_static: crval_table.shape() == [2],
            crval_deg: crval_table.iter().map(|a| a.as_degrees()).collect(),
            table_shape,
        };

        Ok(Self {
            crpix,
            cdelt_deg: [cdelt[0].as_degrees(), cdelt[1].as_degrees()],
            lon_pole_deg: lon_pole.as_degrees(),
            projection,
            kind,
            tables: Arc::new(tables),
        })
    }

    /// The variant selected at construction.
    pub fn kind(&self) -> CelestialKind {
        self.kind
    }

    /// The sky projection.
    pub fn projection(&self) -> Projection {
        self.projection
    }

    /// Shape of the lookup grid.
    pub fn table_shape(&self) -> &[usize] {
        &self.tables.table_shape
    }

    /// The reference pixel.
    pub fn crpix(&self) -> [f64; 2] {
        self.crpix
    }

    /// The pixel scale.
    pub fn cdelt(&self) -> [Angle; 2] {
        [
            Angle::from_degrees(self.cdelt_deg[0]),
            Angle::from_degrees(self.cdelt_deg[1]),
        ]
    }

    /// The native longitude of the celestial pole.
    pub fn lon_pole(&self) -> Angle {
        Angle::from_degrees(self.lon_pole_deg)
    }

    /// Names of the lookup inputs, after the spatial input(s).
    fn lookup_names(&self) -> Vec<String> {
        let rank = self.kind.table_rank();
        if self.kind.is_slit() {
            ["raster", "repeat", "scan"][..rank]
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else if rank == 1 {
            vec!["z".to_string()]
        } else {
            (1..=rank).map(|i| format!("z{i}")).collect()
        }
    }

    fn world_from_pixel(&self, x: f64, y: f64, row: usize) -> (f64, f64) {
        let u = (x - self.crpix[0]) * self.cdelt_deg[0];
        let v = (y - self.crpix[1]) * self.cdelt_deg[1];
        let pc = self.tables.pc_row(row);
        let a = pc[(0, 0)] * u + pc[(0, 1)] * v;
        let b = pc[(1, 0)] * u + pc[(1, 1)] * v;
        let (phi, theta) = plane_to_native(a, b);
        let (crval_lon, crval_lat) = self.tables.crval_row(row);
        native_to_celestial(phi, theta, crval_lon, crval_lat, self.lon_pole_deg)
    }

    fn pixel_from_world(&self, lon: f64, lat: f64, row: usize) -> (f64, f64) {
        let (crval_lon, crval_lat) = self.tables.crval_row(row);
        let (phi, theta) = celestial_to_native(lon, lat, crval_lon, crval_lat, self.lon_pole_deg);
        let (a, b) = native_to_plane(phi, theta);
        match self.tables.pc_row(row).try_inverse() {
            Some(inv) => {
                let u = inv[(0, 0)] * a + inv[(0, 1)] * b;
                let v = inv[(1, 0)] * a + inv[(1, 1)] * b;
                (
                    u / self.cdelt_deg[0] + self.crpix[0],
                    v / self.cdelt_deg[1] + self.crpix[1],
                )
            }
            None => (f64::NAN, f64::NAN),
        }
    }

    /// Index of the first lookup input among this variant's inputs.
    fn lookup_start(&self) -> usize {
        if self.kind.is_slit() {
            1
        } else {
            2
        }
    }
}

impl Transform for VaryingCelestialTransform {
    fn n_inputs(&self) -> usize {
        self.lookup_start() + self.kind.table_rank()
    }

    fn n_outputs(&self) -> usize {
        2
    }

    fn input_names(&self) -> Vec<String> {
        let mut names = if self.kind.is_slit() {
            vec!["along_slit".to_string()]
        } else {
            vec!["x".to_string(), "y".to_string()]
        };
        names.extend(self.lookup_names());
        names
    }

    fn output_names(&self) -> Vec<String> {
        vec!["lon".to_string(), "lat".to_string()]
    }

    fn evaluate(&self, inputs: &[Quantity]) -> Result<Vec<Quantity>, EvalError> {
        check_arity(self.n_inputs(), inputs.len())?;
        let arrays: Vec<&ArrayD<f64>> = inputs.iter().map(|q| &q.values).collect();
        let (shape, flats) = broadcast_values(&arrays)?;
        let len = shape_len(&shape);
        let zs_start = self.lookup_start();
        let rank = self.kind.table_rank();

        let mut lon = ArrayD::from_elem(IxDyn(&shape), f64::NAN);
        let mut lat = ArrayD::from_elem(IxDyn(&shape), f64::NAN);
        let mut zs = vec![0.0; rank];
        for (i, (lo, la)) in lon.iter_mut().zip(lat.iter_mut()).enumerate().take(len) {
            for (d, z) in zs.iter_mut().enumerate() {
                *z = flats[zs_start + d][i];
            }
            // No row for this sample: the outputs stay NaN.
            if let Some(row) = self.tables.row_index(&zs) {
                let (l, b) = self.world_from_pixel(flats[0][i], flats[1][i], row);
                *lo = l;
                *la = b;
            }
        }

        Ok(vec![
            Quantity::new(lon, AxisUnit::Degree),
            Quantity::new(lat, AxisUnit::Degree),
        ])
    }

    fn inverse(&self) -> Result<TransformTree, InverseError> {
        for row in 0..self.tables.n_pc_rows() {
            let det = self.tables.pc_row(row).determinant();
            if det.abs() < DETERMINANT_EPSILON {
                return Err(InverseError::SingularMatrix { determinant: det });
            }
        }
        Ok(TransformTree::leaf(InverseVaryingCelestialTransform {
            forward: self.clone(),
        }))
    }

    fn separability(&self) -> Array2<bool> {
        // Both sky outputs depend on every input.
        Array2::from_elem((2, self.n_inputs()), true)
    }
}

/// The analytic inverse of a [`VaryingCelestialTransform`].
///
/// Takes the world coordinates plus the same lookup coordinates as the
/// forward transform, so it selects the identical table row, and applies
/// the inverse pipeline.
#[derive(Debug, Clone)]
pub struct InverseVaryingCelestialTransform {
    forward: VaryingCelestialTransform,
}

impl Transform for InverseVaryingCelestialTransform {
    fn n_inputs(&self) -> usize {
        2 + self.forward.kind.table_rank()
    }

    fn n_outputs(&self) -> usize {
        if self.forward.kind.is_slit() {
            1
        } else {
            2
        }
    }

    fn input_names(&self) -> Vec<String> {
        let mut names = vec!["lon".to_string(), "lat".to_string()];
        names.extend(self.forward.lookup_names());
        names
    }

    fn output_names(&self) -> Vec<String> {
        if self.forward.kind.is_slit() {
            vec!["along_slit".to_string()]
        } else {
            vec!["x".to_string(), "y".to_string()]
        }
    }

    fn evaluate(&self, inputs: &[Quantity]) -> Result<Vec<Quantity>, EvalError> {
        check_arity(self.n_inputs(), inputs.len())?;
        let arrays: Vec<&ArrayD<f64>> = inputs.iter().map(|q| &q.values).collect();
        let (shape, flats) = broadcast_values(&arrays)?;
        let len = shape_len(&shape);
        let rank = self.forward.kind.table_rank();
        let slit = self.forward.kind.is_slit();

        let mut out_x = ArrayD::from_elem(IxDyn(&shape), f64::NAN);
        let mut out_y = ArrayD::from_elem(IxDyn(&shape), f64::NAN);
        let mut zs = vec![0.0; rank];
        for (i, (ox, oy)) in out_x
            .iter_mut()
            .zip(out_y.iter_mut())
            .enumerate()
            .take(len)
        {
            for (d, z) in zs.iter_mut().enumerate() {
                *z = flats[2 + d][i];
            }
            if let Some(row) = self.forward.tables.row_index(&zs) {
                let (x, y) = self.forward.pixel_from_world(flats[0][i], flats[1][i], row);
                *ox = x;
                *oy = y;
            }
        }

        let mut out = vec![Quantity::new(out_x, AxisUnit::Pixel)];
        if !slit {
            out.push(Quantity::new(out_y, AxisUnit::Pixel));
        }
        Ok(out)
    }

    fn inverse(&self) -> Result<TransformTree, InverseError> {
        Ok(TransformTree::leaf(self.forward.clone()))
    }

    fn separability(&self) -> Array2<bool> {
        Array2::from_elem((self.n_outputs(), self.n_inputs()), true)
    }
}
