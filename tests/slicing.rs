//! End-to-end slicing of a coupled celestial + temporal coordinate system.
//!
//! Builds the kind of system a rastering telescope produces: a varying
//! celestial transform sharing its raster coordinate with a temporal
//! axis, wrapped in pixel/world frames, then slices it and checks the
//! transform and frames stay consistent with each other.

use approx::assert_relative_eq;
use ndarray::{ArrayD, IxDyn};
use uom::si::f64::Angle;
use varying_wcs::{
    parse_slice, AngleExt, AxisUnit, CompositionOp, CoordinateSystem, CoupledCompoundModel,
    Frame, OutputFrame, Projection, Quantity, Scale, SliceError, SliceItem, TransformTree,
    VaryingCelestialTransform,
};

fn celestial() -> VaryingCelestialTransform {
    let mut pc = Vec::new();
    for i in 0..10 {
        let (s, c) = (i as f64 * 10.0).to_radians().sin_cos();
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

/// Pixel axes (x, y, raster) to world axes (lon, lat, time): the raster
/// coordinate both selects the pointing and sets the exposure time.
fn raster_system() -> CoordinateSystem {
    let coupled = CoupledCompoundModel::new(
        CompositionOp::Stack,
        TransformTree::leaf(celestial()),
        TransformTree::leaf(Scale::new(12.0)),
        1,
    )
    .unwrap();

    let input_frame = Frame::new(
        "detector",
        vec![0, 1, 2],
        vec!["PIXEL".into(), "PIXEL".into(), "PIXEL".into()],
        vec![AxisUnit::Pixel, AxisUnit::Pixel, AxisUnit::Pixel],
        vec!["spatial_x".into(), "spatial_y".into(), "raster".into()],
    )
    .unwrap();

    let celestial_frame = Frame::new(
        "celestial",
        vec![0, 1],
        vec!["lon".into(), "lat".into()],
        vec![AxisUnit::Degree, AxisUnit::Degree],
        vec!["longitude".into(), "latitude".into()],
    )
    .unwrap();
    let temporal_frame = Frame::new(
        "temporal",
        vec![2],
        vec!["time".into()],
        vec![AxisUnit::Arcsecond],
        vec!["exposure_time".into()],
    )
    .unwrap();

    CoordinateSystem::new(
        TransformTree::leaf(coupled),
        input_frame,
        OutputFrame::Composite {
            name: "world".into(),
            frames: vec![celestial_frame, temporal_frame],
        },
    )
}

#[test]
fn full_system_round_trips() {
    let system = raster_system();
    let pixel = [
        Quantity::scalar(1.0),
        Quantity::scalar(2.0),
        Quantity::scalar(5.0),
    ];
    let world = system.pixel_to_world(&pixel).unwrap();
    assert_eq!(world.len(), 3);
    assert_relative_eq!(world[2].item().unwrap(), 60.0);

    let back = system.world_to_pixel(&world).unwrap();
    assert_relative_eq!(back[0].item().unwrap(), 1.0, epsilon = 1e-5);
    assert_relative_eq!(back[1].item().unwrap(), 2.0, epsilon = 1e-5);
    assert_relative_eq!(back[2].item().unwrap(), 5.0, epsilon = 1e-9);
}

#[test]
fn pinning_the_raster_axis_keeps_every_world_axis() {
    let system = raster_system();
    // Array order [3, :, :] fixes pixel axis 2, the raster coordinate.
    // Everything couples through it, so nothing can be removed; the
    // coordinate is pinned instead.
    let (sliced, missing) = system.slice(&parse_slice("3, :, :").unwrap()).unwrap();

    assert_eq!(sliced.forward.n_inputs(), 2);
    assert_eq!(sliced.forward.n_outputs(), 3);
    assert_eq!(sliced.input_frame.naxes, 2);
    assert_eq!(sliced.input_frame.axes_name, vec!["spatial_x", "spatial_y"]);
    assert_eq!(missing, vec![false, false, false]);

    // The sliced system at (x, y) matches the full system at (x, y, 3).
    let full = system
        .pixel_to_world(&[
            Quantity::scalar(0.0),
            Quantity::scalar(0.0),
            Quantity::scalar(3.0),
        ])
        .unwrap();
    let reduced = sliced
        .pixel_to_world(&[Quantity::scalar(0.0), Quantity::scalar(0.0)])
        .unwrap();
    for (a, b) in full.iter().zip(&reduced) {
        assert_relative_eq!(a.item().unwrap(), b.item().unwrap(), epsilon = 1e-12);
    }
}

#[test]
fn range_slice_offsets_the_pixel_origin() {
    let system = raster_system();
    // Array order [:, 10:20, :] offsets the spatial_y axis by 10.
    let (sliced, missing) = system.slice(&parse_slice(":, 10:20, :").unwrap()).unwrap();
    assert_eq!(sliced.forward.n_inputs(), 3);
    assert_eq!(missing, vec![false, false, false]);

    let full = system
        .pixel_to_world(&[
            Quantity::scalar(0.0),
            Quantity::scalar(11.0),
            Quantity::scalar(4.0),
        ])
        .unwrap();
    let shifted = sliced
        .pixel_to_world(&[
            Quantity::scalar(0.0),
            Quantity::scalar(1.0),
            Quantity::scalar(4.0),
        ])
        .unwrap();
    for (a, b) in full.iter().zip(&shifted) {
        assert_relative_eq!(a.item().unwrap(), b.item().unwrap(), epsilon = 1e-12);
    }
}

#[test]
fn non_unit_step_fails_before_any_work() {
    let system = raster_system();
    let err = system
        .slice(&parse_slice("::2, :, :").unwrap())
        .unwrap_err();
    assert_eq!(err, SliceError::NonUnitStep { step: 2 });
}

#[test]
fn malformed_items_are_usage_errors() {
    assert!(matches!(
        parse_slice("1.5, :, :").unwrap_err(),
        SliceError::InvalidItem { .. }
    ));
    assert!(matches!(
        parse_slice("foo").unwrap_err(),
        SliceError::InvalidItem { .. }
    ));
}

#[test]
fn separable_world_axis_drops_with_its_pixel_axis() {
    // Decouple the temporal axis: stack the celestial transform with an
    // independent exposure counter instead of sharing the raster.
    let forward = TransformTree::stack(
        TransformTree::leaf(celestial()),
        TransformTree::leaf(Scale::new(2.0)),
    );
    let input_frame = Frame::new(
        "detector",
        vec![0, 1, 2, 3],
        vec!["PIXEL".into(); 4],
        vec![AxisUnit::Pixel; 4],
        vec![
            "spatial_x".into(),
            "spatial_y".into(),
            "raster".into(),
            "exposure".into(),
        ],
    )
    .unwrap();
    let celestial_frame = Frame::new(
        "celestial",
        vec![0, 1],
        vec!["lon".into(), "lat".into()],
        vec![AxisUnit::Degree, AxisUnit::Degree],
        vec!["longitude".into(), "latitude".into()],
    )
    .unwrap();
    let temporal_frame = Frame::new(
        "temporal",
        vec![2],
        vec!["time".into()],
        vec![AxisUnit::Arcsecond],
        vec!["exposure_time".into()],
    )
    .unwrap();
    let system = CoordinateSystem::new(
        forward,
        input_frame,
        OutputFrame::Composite {
            name: "world".into(),
            frames: vec![celestial_frame, temporal_frame],
        },
    );

    // Array order [7, :, :, :] fixes pixel axis 3, the exposure counter.
    let (sliced, missing) = system.slice(&[SliceItem::Index(7)]).unwrap();
    assert_eq!(sliced.forward.n_inputs(), 3);
    assert_eq!(sliced.forward.n_outputs(), 2);
    assert_eq!(sliced.input_frame.naxes, 3);
    assert!(matches!(sliced.output_frame, OutputFrame::Single(_)));
    assert_eq!(sliced.output_frame.frames()[0].name, "celestial");
    assert_eq!(missing, vec![true, false, false]);
}

#[test]
fn sliced_system_still_inverts() {
    let system = raster_system();
    let (sliced, _) = system.slice(&parse_slice(":, 5:, :").unwrap()).unwrap();
    let world = sliced
        .pixel_to_world(&[
            Quantity::scalar(2.0),
            Quantity::scalar(1.0),
            Quantity::scalar(6.0),
        ])
        .unwrap();
    let pixel = sliced.world_to_pixel(&world).unwrap();
    assert_relative_eq!(pixel[0].item().unwrap(), 2.0, epsilon = 1e-5);
    // The shifted axis inverts through the shift as well.
    assert_relative_eq!(pixel[1].item().unwrap(), 1.0, epsilon = 1e-5);
    assert_relative_eq!(pixel[2].item().unwrap(), 6.0, epsilon = 1e-9);
}
