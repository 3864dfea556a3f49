//! Array-style slicing of full coordinate systems.
//!
//! Slicing fixes or offsets pixel axes of a [`CoordinateSystem`] and
//! reduces the transform and both frames to match. Items are given in
//! array order (reversed against pixel order, as array indices are);
//! every item is validated before anything is built, and the input
//! system is never touched: slicing returns a fresh system together with
//! a missing-axis vector marking which original world axes were removed.
//!
//! Per-axis behaviour:
//! - an integer on a separable axis removes the axis from the transform
//!   and both frames;
//! - an integer on a coupled axis removes the whole group only when
//!   every axis of the group is fixed, otherwise a constant-input
//!   adapter pins the coordinate and the world axes survive;
//! - a range with a non-zero start prepends a pixel-origin shift;
//! - a full range is a no-op.

use crate::algebra::{recompose, removal_span, remove_input_at, AlgebraError};
use crate::frame::{CoordinateSystem, Frame, OutputFrame};
use crate::transform::{Constant, Identity, Shift};
use crate::tree::{PipeArityError, TransformTree};
use log::debug;
use std::ops::{Range, RangeFrom, RangeFull, RangeTo};
use std::str::FromStr;
use thiserror::Error;

/// One item of a slice specification, in array order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceItem {
    /// Fix the axis at an integer coordinate
    Index(usize),
    /// Restrict the axis to `start..stop` (stop `None` = unbounded)
    Range {
        /// First kept coordinate
        start: usize,
        /// One past the last kept coordinate, if bounded
        stop: Option<usize>,
        /// Stride between kept coordinates; only 1 is supported
        step: usize,
    },
    /// Keep the axis untouched
    Full,
}

impl From<usize> for SliceItem {
    fn from(index: usize) -> Self {
        SliceItem::Index(index)
    }
}

impl From<RangeFull> for SliceItem {
    fn from(_: RangeFull) -> Self {
        SliceItem::Full
    }
}

impl From<Range<usize>> for SliceItem {
    fn from(range: Range<usize>) -> Self {
        SliceItem::Range {
            start: range.start,
            stop: Some(range.end),
            step: 1,
        }
    }
}

impl From<RangeFrom<usize>> for SliceItem {
    fn from(range: RangeFrom<usize>) -> Self {
        SliceItem::Range {
            start: range.start,
            stop: None,
            step: 1,
        }
    }
}

impl From<RangeTo<usize>> for SliceItem {
    fn from(range: RangeTo<usize>) -> Self {
        SliceItem::Range {
            start: 0,
            stop: Some(range.end),
            step: 1,
        }
    }
}

impl FromStr for SliceItem {
    type Err = SliceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| SliceError::InvalidItem {
            item: s.to_string(),
            reason: reason.to_string(),
        };
        let text = s.trim();
        if text.is_empty() || text == ":" {
            return Ok(SliceItem::Full);
        }
        if !text.contains(':') {
            return text
                .parse::<usize>()
                .map(SliceItem::Index)
                .map_err(|_| invalid("expected a non-negative integer or a slice"));
        }

        let parts: Vec<&str> = text.split(':').collect();
        if parts.len() > 3 {
            return Err(invalid("too many ':' separators"));
        }
        let field = |part: &str, what: &str| -> Result<Option<usize>, SliceError> {
            let part = part.trim();
            if part.is_empty() {
                Ok(None)
            } else {
                part.parse::<usize>()
                    .map(Some)
                    .map_err(|_| invalid(&format!("{what} is not a non-negative integer")))
            }
        };
        let start = field(parts[0], "start")?.unwrap_or(0);
        let stop = field(parts[1], "stop")?;
        let step = match parts.get(2) {
            Some(part) => field(part, "step")?.unwrap_or(1),
            None => 1,
        };
        Ok(SliceItem::Range { start, stop, step })
    }
}

/// Parse a comma-separated slice specification such as `"10, :, 0:5"`
/// (surrounding brackets are accepted and ignored).
pub fn parse_slice(spec: &str) -> Result<Vec<SliceItem>, SliceError> {
    spec.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(SliceItem::from_str)
        .collect()
}

/// Error slicing a coordinate system
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SliceError {
    /// A range with a stride other than one
    #[error("slice step must be 1, got {step}")]
    NonUnitStep {
        /// The rejected step
        step: usize,
    },
    /// An item that is neither an integer nor a valid slice
    #[error("invalid slice item {item:?}: {reason}")]
    InvalidItem {
        /// The rejected item
        item: String,
        /// Why it was rejected
        reason: String,
    },
    /// More items than the system has pixel axes
    #[error("slice has {got} item(s) but the system has {naxes} pixel axes")]
    TooManyItems {
        /// Items supplied
        got: usize,
        /// Pixel axes of the system
        naxes: usize,
    },
    /// The frames do not match the transform's arity
    #[error("{side} frame covers {frame_axes} axes but the transform has {transform_axes}")]
    FrameMismatch {
        /// "input" or "output"
        side: &'static str,
        /// Axes described by the frame
        frame_axes: usize,
        /// Axes of the transform
        transform_axes: usize,
    },
    /// The tree algebra refused the removal
    #[error(transparent)]
    Algebra(#[from] AlgebraError),
    /// Recomposition produced mismatched arities
    #[error(transparent)]
    Composition(#[from] PipeArityError),
}

/// Union-find over pixel axes: axes sharing a transform output or an
/// output sub-frame belong to one coupling group.
fn coupling_roots(system: &CoordinateSystem) -> Vec<usize> {
    let m = system.forward.separability_matrix();
    let n = m.ncols();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        let mut root = i;
        while parent[root] != root {
            root = parent[root];
        }
        let mut walk = i;
        while parent[walk] != root {
            let next = parent[walk];
            parent[walk] = root;
            walk = next;
        }
        root
    }
    let union = |parent: &mut Vec<usize>, a: usize, b: usize| {
        let (ra, rb) = (find(parent, a), find(parent, b));
        if ra != rb {
            parent[rb] = ra;
        }
    };

    // Axes feeding one output are coupled.
    for o in 0..m.nrows() {
        let mut first = None;
        for i in 0..n {
            if m[(o, i)] {
                match first {
                    None => first = Some(i),
                    Some(f) => union(&mut parent, f, i),
                }
            }
        }
    }
    // Axes feeding world axes of one sub-frame are coupled, separable or
    // not (a lon/lat pair stays together even under a diagonal transform).
    for frame in system.output_frame.frames() {
        let mut first = None;
        for i in 0..n {
            let feeds_frame = frame
                .axes_order
                .iter()
                .any(|&a| a < m.nrows() && m[(a, i)]);
            if feeds_frame {
                match first {
                    None => first = Some(i),
                    Some(f) => union(&mut parent, f, i),
                }
            }
        }
    }

    (0..n).map(|i| find(&mut parent, i)).collect()
}

/// Slice a coordinate system by a per-axis specification in array order.
///
/// Returns the reduced system and the missing-axis vector: one entry per
/// original world axis, in array order, true where that world axis was
/// removed. The input system is left untouched; any error is raised
/// before a new system is constructed.
pub fn slice_system(
    system: &CoordinateSystem,
    spec: &[SliceItem],
) -> Result<(CoordinateSystem, Vec<bool>), SliceError> {
    let naxes = system.input_frame.naxes;
    let n_world = system.output_frame.naxes();
    let m = system.forward.separability_matrix();
    if m.ncols() != naxes {
        return Err(SliceError::FrameMismatch {
            side: "input",
            frame_axes: naxes,
            transform_axes: m.ncols(),
        });
    }
    if m.nrows() != n_world {
        return Err(SliceError::FrameMismatch {
            side: "output",
            frame_axes: n_world,
            transform_axes: m.nrows(),
        });
    }

    // Validate every item before any construction.
    if spec.len() > naxes {
        return Err(SliceError::TooManyItems {
            got: spec.len(),
            naxes,
        });
    }
    for item in spec {
        if let SliceItem::Range { start, stop, step } = item {
            if *step != 1 {
                return Err(SliceError::NonUnitStep { step: *step });
            }
            if let Some(stop) = stop {
                if stop < start {
                    return Err(SliceError::InvalidItem {
                        item: format!("{start}:{stop}"),
                        reason: "stop is before start".to_string(),
                    });
                }
            }
        }
    }

    // Array order reverses against pixel order; short specs leave the
    // remaining (leading pixel) axes untouched.
    let mut items = vec![SliceItem::Full; naxes];
    for (i, item) in spec.iter().enumerate() {
        items[naxes - 1 - i] = item.clone();
    }

    let roots = coupling_roots(system);
    let members = |k: usize| -> Vec<usize> {
        (0..naxes).filter(|&i| roots[i] == roots[k]).collect()
    };

    // Classify each pixel axis.
    let mut removed = vec![false; naxes];
    let mut fixed: Vec<Option<f64>> = vec![None; naxes];
    let mut shifts: Vec<Option<f64>> = vec![None; naxes];
    for k in 0..naxes {
        match items[k] {
            SliceItem::Full => {}
            SliceItem::Range { start, .. } => {
                if start > 0 {
                    debug!("axis {k}: pixel origin shift by {start}");
                    shifts[k] = Some(start as f64);
                }
            }
            SliceItem::Index(value) => {
                let group = members(k);
                let whole_group_fixed = group
                    .iter()
                    .all(|&g| matches!(items[g], SliceItem::Index(_)));
                if group.len() == 1 {
                    debug!("axis {k}: separable, removing");
                    removed[k] = true;
                } else if whole_group_fixed {
                    debug!("axis {k}: coupled group {group:?} fully fixed, removing");
                    for &g in &group {
                        removed[g] = true;
                    }
                } else {
                    debug!("axis {k}: coupled group {group:?} partially fixed, pinning at {value}");
                    fixed[k] = Some(value as f64);
                }
            }
        }
    }

    // Remove dropped axes from the transform, tracking every input the
    // dropped subtrees take with them.
    let mut tree = system.forward.clone();
    let mut eliminated = vec![false; naxes];
    for k in 0..naxes {
        if !removed[k] || eliminated[k] {
            continue;
        }
        let current = k - eliminated[..k].iter().filter(|&&e| e).count();
        let drop_coupled = members(k).len() > 1;
        let (offset, len) = removal_span(&tree, current, drop_coupled);
        tree = recompose(remove_input_at(&tree, current, drop_coupled)?)?;

        // Current positions [offset, offset + len) map back to the
        // original axes that survived so far.
        let survivors: Vec<usize> = (0..naxes).filter(|&i| !eliminated[i]).collect();
        for &original in &survivors[offset..offset + len] {
            eliminated[original] = true;
        }
    }

    // Pin and shift surviving axes ahead of the reduced transform.
    if fixed.iter().any(Option::is_some) || shifts.iter().any(Option::is_some) {
        let mut parts = Vec::new();
        for k in 0..naxes {
            if eliminated[k] {
                continue;
            }
            if let Some(value) = fixed[k] {
                parts.push(TransformTree::leaf(Constant::with_unit(
                    value,
                    system.input_frame.axes_unit[k],
                )));
            } else if let Some(offset) = shifts[k] {
                parts.push(TransformTree::leaf(Shift::new(offset)));
            } else {
                parts.push(TransformTree::leaf(Identity::new(1)));
            }
        }
        let prepend = recompose(parts)?;
        tree = TransformTree::pipe(prepend, tree)?;
    }

    // A world axis disappears when everything feeding it was removed.
    let mut world_dropped = vec![false; n_world];
    for (o, dropped) in world_dropped.iter_mut().enumerate() {
        let mut feeds = (0..naxes).filter(|&i| m[(o, i)]).peekable();
        *dropped = feeds.peek().is_some() && feeds.all(|i| eliminated[i]);
    }

    // Rebuild the pixel frame without the eliminated and pinned axes.
    let mut input_frame = system.input_frame.clone();
    for k in (0..naxes).rev() {
        if eliminated[k] || fixed[k].is_some() {
            input_frame.drop_position(k);
        }
    }
    input_frame.axes_order = (0..input_frame.naxes).collect();

    // Rebuild the world frame without the dropped axes and renumber the
    // survivors to stay contiguous and zero-based.
    let mut output_frame = system.output_frame.clone();
    match &mut output_frame {
        OutputFrame::Single(frame) => {
            drop_world_axes(frame, &world_dropped);
        }
        OutputFrame::Composite { frames, .. } => {
            for frame in frames.iter_mut() {
                drop_world_axes(frame, &world_dropped);
            }
            frames.retain(|f| f.naxes > 0);
        }
    }
    output_frame.renumber();
    if let OutputFrame::Composite { frames, .. } = &output_frame {
        if frames.len() == 1 {
            output_frame = OutputFrame::Single(frames[0].clone());
        }
    }

    // Missing-axis vector in array order, like the slice items.
    let missing: Vec<bool> = world_dropped.iter().rev().copied().collect();

    Ok((
        CoordinateSystem::new(tree, input_frame, output_frame),
        missing,
    ))
}

fn drop_world_axes(frame: &mut Frame, world_dropped: &[bool]) {
    for position in (0..frame.naxes).rev() {
        let axis = frame.axes_order[position];
        if world_dropped.get(axis).copied().unwrap_or(false) {
            frame.drop_position(position);
        }
    }
}

impl CoordinateSystem {
    /// Slice this system by a per-axis specification in array order.
    ///
    /// See [`slice_system`].
    pub fn slice(&self, spec: &[SliceItem]) -> Result<(CoordinateSystem, Vec<bool>), SliceError> {
        slice_system(self, spec)
    }
}
