//! Region-of-interest reductions on image stacks.
//!
//! The last two axes of the base dataset are image rows and columns; any
//! leading axes are frames. Only the windowed region is read, and every
//! reduction is computed per frame.

use std::sync::Arc;

use hdfmap_core::{Error, LazyDataset, Result, SelectItem, Selection, SliceSpec, Value};
use hdfmap_namespace::RoiDefinition;
use ndarray::{s, ArrayD, ArrayView2, Axis, IxDyn};

use crate::engine::Evaluator;
use crate::expr;

/// Name suffixes derived from every registered region.
pub const SUFFIXES: &[&str] = &[
    "", "_total", "_max", "_min", "_mean", "_bkg", "_rmbkg", "_box", "_bkg_box",
];

/// Half-open pixel window `rows.0..rows.1`, `cols.0..cols.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiWindow {
    pub rows: (usize, usize),
    pub cols: (usize, usize),
}

impl RoiWindow {
    #[must_use]
    pub fn height(&self) -> usize {
        self.rows.1 - self.rows.0
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.cols.1 - self.cols.0
    }

    /// Corner coordinates as `(col, row)` pairs, closed back to the start.
    ///
    /// # Errors
    /// Returns [`Error::Evaluation`] if the corner array cannot be built.
    #[allow(clippy::cast_precision_loss)]
    pub fn corners(&self) -> Result<Value> {
        let (r0, r1) = (self.rows.0 as f64, self.rows.1 as f64);
        let (c0, c1) = (self.cols.0 as f64, self.cols.1 as f64);
        let points = vec![c0, r0, c1, r0, c1, r1, c0, r1, c0, r0];
        ArrayD::from_shape_vec(IxDyn(&[5, 2]), points)
            .map(Value::Array)
            .map_err(|e| Error::Evaluation(e.to_string()))
    }

    fn selection(&self, rank: usize) -> Selection {
        let mut items = vec![SelectItem::Slice(SliceSpec::full()); rank - 2];
        #[allow(clippy::cast_possible_wrap)]
        items.push(SelectItem::Slice(SliceSpec::range(
            self.rows.0 as isize,
            self.rows.1 as isize,
        )));
        #[allow(clippy::cast_possible_wrap)]
        items.push(SelectItem::Slice(SliceSpec::range(
            self.cols.0 as isize,
            self.cols.1 as isize,
        )));
        Selection::from_items(items)
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn clip(start: isize, len: usize, extent: usize) -> Option<(usize, usize)> {
    let extent = extent as isize;
    let stop = start + len as isize;
    let lo = start.clamp(0, extent);
    let hi = stop.clamp(0, extent);
    (lo < hi).then_some((lo as usize, hi as usize))
}

/// Window of `height` x `width` pixels around `center`, clipped to `extent`.
///
/// Returns `None` when nothing of the window lies inside the image.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn roi_window(
    center: (isize, isize),
    height: usize,
    width: usize,
    extent: (usize, usize),
) -> Option<RoiWindow> {
    let row0 = center.0 - (height / 2) as isize;
    let col0 = center.1 - (width / 2) as isize;
    Some(RoiWindow {
        rows: clip(row0, height, extent.0)?,
        cols: clip(col0, width, extent.1)?,
    })
}

/// The region grown by half its size on every side, clipped to `extent`.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn background_window(
    center: (isize, isize),
    height: usize,
    width: usize,
    extent: (usize, usize),
) -> Option<RoiWindow> {
    let (pad_rows, pad_cols) = (height / 2, width / 2);
    let row0 = center.0 - (height / 2) as isize - pad_rows as isize;
    let col0 = center.1 - (width / 2) as isize - pad_cols as isize;
    Some(RoiWindow {
        rows: clip(row0, height + 2 * pad_rows, extent.0)?,
        cols: clip(col0, width + 2 * pad_cols, extent.1)?,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn center_of(evaluator: &Evaluator<'_>, expression: &str, depth: usize) -> Result<isize> {
    let value = expr::materialize(evaluator.eval_at(expression, depth + 1)?)?;
    let x = value.as_f64().ok_or_else(|| {
        Error::InvalidRoi(format!(
            "centre '{expression}' evaluates to a {}, not a number",
            value.type_name()
        ))
    })?;
    if !x.is_finite() {
        return Err(Error::InvalidRoi(format!("centre '{expression}' is not finite")));
    }
    Ok(x.round() as isize)
}

/// Per-frame reductions of one region.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FrameStats {
    total: f64,
    max: f64,
    min: f64,
    mean: f64,
    bkg: f64,
}

/// Evaluates `roi_name + suffix` for a registered region.
///
/// # Errors
/// Returns [`Error::InvalidRoi`] if the base dataset is not an image or the
/// region lies outside it, and the reader error if the read fails.
pub(crate) fn evaluate(
    evaluator: &Evaluator<'_>,
    roi_name: &str,
    definition: &RoiDefinition,
    suffix: &str,
    depth: usize,
) -> Result<Value> {
    let map = evaluator.map();
    let path = map.path_of(&definition.base_image)?;
    let dataset = LazyDataset::open(Arc::clone(evaluator.source()), &path)?;
    let shape = dataset.shape().to_vec();
    if shape.len() < 2 {
        return Err(Error::InvalidRoi(format!(
            "base image '{path}' of '{roi_name}' has rank {}",
            shape.len()
        )));
    }
    let extent = (shape[shape.len() - 2], shape[shape.len() - 1]);
    let center = (
        center_of(evaluator, &definition.center_row, depth)?,
        center_of(evaluator, &definition.center_col, depth)?,
    );
    let outside = || {
        Error::InvalidRoi(format!(
            "'{roi_name}' at {center:?} lies outside the image of {extent:?} pixels"
        ))
    };
    let roi = roi_window(center, definition.height, definition.width, extent).ok_or_else(outside)?;
    let bkg = background_window(center, definition.height, definition.width, extent)
        .ok_or_else(outside)?;
    log::debug!("{roi_name}{suffix}: window {roi:?}, background {bkg:?}");

    match suffix {
        "_box" => return roi.corners(),
        "_bkg_box" => return bkg.corners(),
        _ => {}
    }

    let with_background = matches!(suffix, "_bkg" | "_rmbkg");
    let read_window = if with_background { bkg } else { roi };
    let data = dataset.read(&read_window.selection(shape.len()))?;
    let volume = data
        .to_f64()
        .ok_or_else(|| Error::InvalidRoi(format!("base image '{path}' is not numeric")))?;
    if suffix.is_empty() {
        return Ok(Value::Array(volume));
    }

    let frame_shape = &shape[..shape.len() - 2];
    let frames: usize = frame_shape.iter().product();
    let stack = volume
        .into_shape_with_order((frames, read_window.height(), read_window.width()))
        .map_err(|e| Error::Evaluation(format!("region read of unexpected shape: {e}")))?;
    let inner_rows = (roi.rows.0 - read_window.rows.0, roi.rows.1 - read_window.rows.0);
    let inner_cols = (roi.cols.0 - read_window.cols.0, roi.cols.1 - read_window.cols.0);

    let mut values = Vec::with_capacity(frames);
    for frame in stack.axis_iter(Axis(0)) {
        let inner = frame.slice(s![inner_rows.0..inner_rows.1, inner_cols.0..inner_cols.1]);
        let stats = frame_stats(inner.sum(), &inner, frame.sum(), frame.len());
        values.push(match suffix {
            "_total" => stats.total,
            "_max" => stats.max,
            "_min" => stats.min,
            "_mean" => stats.mean,
            "_bkg" => stats.bkg,
            _ => stats.total - stats.bkg,
        });
    }

    if frame_shape.is_empty() {
        return values
            .first()
            .map(|v| Value::Float(*v))
            .ok_or_else(|| Error::Evaluation("image has no frames".into()));
    }
    ArrayD::from_shape_vec(IxDyn(frame_shape), values)
        .map(Value::Array)
        .map_err(|e| Error::Evaluation(e.to_string()))
}

#[allow(clippy::cast_precision_loss)]
fn frame_stats(
    total: f64,
    inner: &ArrayView2<'_, f64>,
    outer_total: f64,
    outer_len: usize,
) -> FrameStats {
    let count = inner.len();
    let max = inner.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = inner.iter().copied().fold(f64::INFINITY, f64::min);
    let ring = outer_len.saturating_sub(count);
    let bkg = if ring > 0 {
        (outer_total - total) / ring as f64 * count as f64
    } else {
        0.0
    };
    FrameStats {
        total,
        max,
        min,
        mean: total / count as f64,
        bkg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_centered() {
        let window = roi_window((10, 20), 4, 6, (100, 100)).unwrap();
        assert_eq!(window.rows, (8, 12));
        assert_eq!(window.cols, (17, 23));
    }

    #[test]
    fn test_window_clips_at_edges() {
        let window = roi_window((1, 98), 10, 10, (100, 100)).unwrap();
        assert_eq!(window.rows, (0, 6));
        assert_eq!(window.cols, (93, 100));
        assert!(window.width() <= 10);
        assert!(roi_window((-50, 5), 10, 10, (100, 100)).is_none());
    }

    #[test]
    fn test_background_ring() {
        let bkg = background_window((10, 10), 4, 4, (100, 100)).unwrap();
        assert_eq!(bkg.rows, (6, 14));
        assert_eq!(bkg.cols, (6, 14));
        let clipped = background_window((0, 0), 4, 4, (100, 100)).unwrap();
        assert_eq!(clipped.rows, (0, 4));
    }

    #[test]
    fn test_corners() {
        let window = RoiWindow {
            rows: (1, 3),
            cols: (2, 5),
        };
        assert_eq!(
            window.corners().unwrap().to_string(),
            "[[2.0, 1.0], [5.0, 1.0], [5.0, 3.0], [2.0, 3.0], [2.0, 1.0]]"
        );
    }

    #[test]
    fn test_frame_stats() {
        let mut frame = ndarray::Array2::from_elem((4, 4), 1.0);
        frame.slice_mut(s![1..3, 1..3]).fill(5.0);
        let inner = frame.slice(s![1..3, 1..3]);
        let stats = frame_stats(inner.sum(), &inner, frame.sum(), frame.len());
        assert_eq!(stats.total, 20.0);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.bkg, 4.0);
    }
}
