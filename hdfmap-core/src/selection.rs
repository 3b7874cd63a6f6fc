//! Dataset selectors: full read, single index and multi-dimensional slices.
//!
//! Indices follow the usual half-open, negative-from-the-end conventions.
//! A selection with fewer items than the dataset rank selects the remaining
//! axes in full.

use std::fmt;

use ndarray::{ArrayD, Axis, Slice};

use crate::{Error, Result};

/// A `start:stop:step` slice on one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceSpec {
    pub start: Option<isize>,
    pub stop: Option<isize>,
    pub step: Option<isize>,
}

impl SliceSpec {
    /// The full-axis slice `:`.
    #[must_use]
    pub fn full() -> Self {
        Self::default()
    }

    /// `start..stop` with unit step.
    #[must_use]
    pub fn range(start: isize, stop: isize) -> Self {
        Self {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
    }
}

/// One selector item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectItem {
    /// Picks a single position and drops the axis.
    Index(isize),
    Slice(SliceSpec),
}

/// Selector item resolved against a concrete axis length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisSelection {
    Index(usize),
    Range {
        start: usize,
        stop: usize,
        step: usize,
    },
}

impl AxisSelection {
    /// Number of elements kept on this axis (indices keep one, and drop the axis).
    #[must_use]
    pub fn len(&self) -> usize {
        match *self {
            Self::Index(_) => 1,
            Self::Range { start, stop, step } => (stop - start).div_ceil(step),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Multi-axis selection; empty means "everything".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    items: Vec<SelectItem>,
}

impl Selection {
    /// Full read.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Single index on the leading axis.
    #[must_use]
    pub fn index(index: isize) -> Self {
        Self {
            items: vec![SelectItem::Index(index)],
        }
    }

    #[must_use]
    pub fn from_items(items: Vec<SelectItem>) -> Self {
        Self { items }
    }

    #[must_use]
    pub fn items(&self) -> &[SelectItem] {
        &self.items
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        self.items
            .iter()
            .all(|item| matches!(item, SelectItem::Slice(s) if *s == SliceSpec::full()))
    }

    /// Resolves every axis of `shape` into concrete bounds.
    ///
    /// # Errors
    /// Returns [`Error::Evaluation`] for too many selector items, an
    /// out-of-range index, or a non-positive step.
    pub fn resolve(&self, shape: &[usize]) -> Result<Vec<AxisSelection>> {
        if self.items.len() > shape.len() {
            return Err(Error::Evaluation(format!(
                "too many indices ({}) for array of rank {}",
                self.items.len(),
                shape.len()
            )));
        }
        let mut resolved = Vec::with_capacity(shape.len());
        for (axis, &len) in shape.iter().enumerate() {
            let item = self
                .items
                .get(axis)
                .copied()
                .unwrap_or(SelectItem::Slice(SliceSpec::full()));
            resolved.push(resolve_item(item, len)?);
        }
        Ok(resolved)
    }

    /// Shape of the result after applying this selection to `shape`.
    ///
    /// # Errors
    /// Same conditions as [`Selection::resolve`].
    pub fn output_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        Ok(self
            .resolve(shape)?
            .iter()
            .filter_map(|axis| match axis {
                AxisSelection::Index(_) => None,
                range @ AxisSelection::Range { .. } => Some(range.len()),
            })
            .collect())
    }

    /// Applies the selection to an in-memory array.
    ///
    /// # Errors
    /// Same conditions as [`Selection::resolve`].
    pub fn apply<T: Clone>(&self, array: &ArrayD<T>) -> Result<ArrayD<T>> {
        let resolved = self.resolve(array.shape())?;
        let mut view = array.view();
        let mut axis = 0;
        for selection in resolved {
            match selection {
                AxisSelection::Index(i) => {
                    view = view.index_axis_move(Axis(axis), i);
                }
                AxisSelection::Range { start, stop, step } => {
                    #[allow(clippy::cast_possible_wrap)]
                    view.slice_axis_inplace(
                        Axis(axis),
                        Slice::new(start as isize, Some(stop as isize), step as isize),
                    );
                    axis += 1;
                }
            }
        }
        Ok(view.to_owned())
    }
}

impl From<Vec<SelectItem>> for Selection {
    fn from(items: Vec<SelectItem>) -> Self {
        Self::from_items(items)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.items.is_empty() {
            return write!(f, "[()]");
        }
        let parts: Vec<String> = self
            .items
            .iter()
            .map(|item| match item {
                SelectItem::Index(i) => i.to_string(),
                SelectItem::Slice(s) => {
                    let part = |v: Option<isize>| v.map(|v| v.to_string()).unwrap_or_default();
                    match s.step {
                        Some(step) => format!("{}:{}:{step}", part(s.start), part(s.stop)),
                        None => format!("{}:{}", part(s.start), part(s.stop)),
                    }
                }
            })
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn resolve_item(item: SelectItem, len: usize) -> Result<AxisSelection> {
    let ilen = len as isize;
    match item {
        SelectItem::Index(i) => {
            let idx = if i < 0 { i + ilen } else { i };
            if idx < 0 || idx >= ilen {
                return Err(Error::Evaluation(format!(
                    "index {i} is out of bounds for axis with size {len}"
                )));
            }
            Ok(AxisSelection::Index(idx as usize))
        }
        SelectItem::Slice(spec) => {
            let step = spec.step.unwrap_or(1);
            if step <= 0 {
                return Err(Error::Evaluation(format!(
                    "slice step must be positive, got {step}"
                )));
            }
            let clamp = |v: isize| -> usize {
                let v = if v < 0 { v + ilen } else { v };
                v.clamp(0, ilen) as usize
            };
            let start = spec.start.map_or(0, clamp);
            let stop = spec.stop.map_or(len, clamp).max(start);
            Ok(AxisSelection::Range {
                start,
                stop,
                step: step as usize,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_resolve_negative_and_clipped() {
        let sel = Selection::from_items(vec![
            SelectItem::Index(-1),
            SelectItem::Slice(SliceSpec::range(-3, 100)),
        ]);
        let resolved = sel.resolve(&[4, 10]).unwrap();
        assert_eq!(resolved[0], AxisSelection::Index(3));
        assert_eq!(
            resolved[1],
            AxisSelection::Range {
                start: 7,
                stop: 10,
                step: 1
            }
        );
        assert_eq!(sel.output_shape(&[4, 10]).unwrap(), vec![3]);
    }

    #[test]
    fn test_index_out_of_bounds() {
        let err = Selection::index(5).resolve(&[5]).unwrap_err();
        assert!(matches!(err, Error::Evaluation(_)));
    }

    #[test]
    fn test_too_many_items() {
        let sel = Selection::from_items(vec![SelectItem::Index(0), SelectItem::Index(0)]);
        assert!(sel.resolve(&[3]).is_err());
    }

    #[test]
    fn test_apply_to_array() {
        let array = ArrayD::from_shape_vec(IxDyn(&[3, 4]), (0..12).map(f64::from).collect())
            .unwrap();
        let sel = Selection::from_items(vec![
            SelectItem::Slice(SliceSpec::full()),
            SelectItem::Slice(SliceSpec {
                start: Some(1),
                stop: None,
                step: Some(2),
            }),
        ]);
        let out = sel.apply(&array).unwrap();
        assert_eq!(out.shape(), &[3, 2]);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![1.0, 3.0, 5.0, 7.0, 9.0, 11.0]);
        assert_abs_diff_eq!(out.mean().unwrap(), 6.0);

        let row = Selection::index(1).apply(&array).unwrap();
        assert_eq!(row.shape(), &[4]);
        assert!(Selection::all().is_all());
    }
}
