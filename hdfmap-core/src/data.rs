//! Raw array data returned by a reader.

use ndarray::{ArrayD, IxDyn};

use crate::Selection;
use crate::Result;

/// Data read from a dataset, before conversion into a [`crate::Value`].
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    /// Numeric data, widened to `f64`.
    Numeric(ArrayD<f64>),
    /// Integer data kept exact.
    Integer(ArrayD<i64>),
    /// String or decoded byte data.
    Text(ArrayD<String>),
}

impl Data {
    /// Scalar float.
    #[must_use]
    pub fn scalar(value: f64) -> Self {
        Self::Numeric(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Scalar string.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(ArrayD::from_elem(IxDyn(&[]), value.into()))
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Numeric(a) => a.shape(),
            Self::Integer(a) => a.shape(),
            Self::Text(a) => a.shape(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(a) => a.len(),
            Self::Integer(a) => a.len(),
            Self::Text(a) => a.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies an in-memory selection.
    ///
    /// # Errors
    /// Returns an error when the selection does not fit the data shape.
    pub fn select(&self, selection: &Selection) -> Result<Self> {
        Ok(match self {
            Self::Numeric(a) => Self::Numeric(selection.apply(a)?),
            Self::Integer(a) => Self::Integer(selection.apply(a)?),
            Self::Text(a) => Self::Text(selection.apply(a)?),
        })
    }

    /// Numeric view of the data; integers are widened, text yields `None`.
    #[must_use]
    pub fn to_f64(&self) -> Option<ArrayD<f64>> {
        match self {
            Self::Numeric(a) => Some(a.clone()),
            #[allow(clippy::cast_precision_loss)]
            Self::Integer(a) => Some(a.mapv(|v| v as f64)),
            Self::Text(_) => None,
        }
    }
}

impl From<ArrayD<f64>> for Data {
    fn from(value: ArrayD<f64>) -> Self {
        Self::Numeric(value)
    }
}

impl From<ArrayD<i64>> for Data {
    fn from(value: ArrayD<i64>) -> Self {
        Self::Integer(value)
    }
}

impl From<Vec<f64>> for Data {
    fn from(value: Vec<f64>) -> Self {
        let len = value.len();
        Self::Numeric(ArrayD::from_shape_vec(IxDyn(&[len]), value).unwrap_or_default())
    }
}
