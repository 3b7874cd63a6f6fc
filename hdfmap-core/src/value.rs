//! Evaluated values.

use std::fmt;

use ndarray::{ArrayD, Axis, IxDyn};

use crate::text::round_string_floats;
use crate::{AttrValue, Data, LazyDataset};

/// Result of resolving or evaluating a name.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Numeric array of any rank.
    Array(ArrayD<f64>),
    /// String array of any rank.
    TextArray(ArrayD<String>),
    /// Tuple of values (comma-separated expressions, box corners, ...).
    List(Vec<Value>),
    /// Unread dataset; indexing it reads only the selected region.
    Dataset(LazyDataset),
}

impl Value {
    /// Converts reader output into a value.
    ///
    /// Numeric data is squeezed: length-one axes are dropped and a single
    /// element becomes a scalar. Text has long floats shortened.
    #[must_use]
    pub fn from_data(data: Data) -> Self {
        match data {
            Data::Numeric(array) => squeeze_numeric(array),
            Data::Integer(array) => {
                if array.len() == 1 {
                    array.iter().next().map_or(Self::None, |v| Self::Int(*v))
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    squeeze_numeric(array.mapv(|v| v as f64))
                }
            }
            Data::Text(array) => {
                if array.len() == 1 {
                    array
                        .iter()
                        .next()
                        .map_or(Self::None, |s| Self::Str(round_string_floats(s)))
                } else {
                    Self::TextArray(squeeze(array))
                }
            }
        }
    }

    /// Short type label used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Array(_) => "array",
            Self::TextArray(_) => "text array",
            Self::List(_) => "tuple",
            Self::Dataset(_) => "dataset",
        }
    }

    /// Numeric scalar value, if this is a scalar (or a one-element array).
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Array(a) if a.len() == 1 => a.iter().next().copied(),
            _ => None,
        }
    }

    /// Numeric array view (scalars become 0-d arrays).
    #[must_use]
    pub fn to_array(&self) -> Option<ArrayD<f64>> {
        match self {
            Self::Array(a) => Some(a.clone()),
            Self::List(items) => {
                let values: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
                values.and_then(|v| ArrayD::from_shape_vec(IxDyn(&[v.len()]), v).ok())
            }
            other => other
                .as_f64()
                .map(|v| ArrayD::from_elem(IxDyn(&[]), v)),
        }
    }

    /// Truthiness used by conditionals and boolean operators.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Array(a) => a.iter().any(|v| *v != 0.0),
            Self::TextArray(a) => !a.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Dataset(_) => true,
        }
    }

    #[must_use]
    pub fn is_numeric_scalar(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Int(_) | Self::Float(_))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<ArrayD<f64>> for Value {
    fn from(value: ArrayD<f64>) -> Self {
        Self::Array(value)
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        let len = value.len();
        ArrayD::from_shape_vec(IxDyn(&[len]), value).map_or(Self::None, Self::Array)
    }
}

impl From<&AttrValue> for Value {
    fn from(value: &AttrValue) -> Self {
        match value {
            AttrValue::Int(i) => Self::Int(*i),
            AttrValue::Float(f) => Self::Float(*f),
            AttrValue::Str(_) | AttrValue::Bytes(_) => {
                Self::Str(value.as_text().unwrap_or_default())
            }
            AttrValue::IntArray(v) if v.len() == 1 => Self::Int(v[0]),
            AttrValue::FloatArray(v) if v.len() == 1 => Self::Float(v[0]),
            #[allow(clippy::cast_precision_loss)]
            AttrValue::IntArray(v) => Self::from(v.iter().map(|&i| i as f64).collect::<Vec<_>>()),
            AttrValue::FloatArray(v) => Self::from(v.clone()),
            AttrValue::StrArray(v) if v.len() == 1 => Self::Str(v[0].clone()),
            AttrValue::StrArray(v) => {
                let len = v.len();
                ArrayD::from_shape_vec(IxDyn(&[len]), v.clone()).map_or(Self::None, Self::TextArray)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{}", format_float(*x)),
            Self::Str(s) => write!(f, "{s}"),
            Self::Array(a) => write!(f, "{}", format_array(a, &format_float)),
            Self::TextArray(a) => write!(f, "{}", format_array(a, &|s: String| format!("'{s}'"))),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(", "))
            }
            Self::Dataset(d) => write!(f, "<dataset '{}' shape {:?}>", d.path(), d.shape()),
        }
    }
}

/// Float formatting that keeps a trailing `.0` on integral values.
#[must_use]
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Nested bracket rendering of an n-d array.
pub fn format_array<T: Clone>(array: &ArrayD<T>, item: &dyn Fn(T) -> String) -> String {
    if array.ndim() == 0 {
        return array.iter().next().cloned().map(item).unwrap_or_default();
    }
    if array.ndim() == 1 {
        let parts: Vec<String> = array.iter().cloned().map(item).collect();
        return format!("[{}]", parts.join(", "));
    }
    let rows: Vec<String> = array
        .axis_iter(Axis(0))
        .map(|row| format_array(&row.to_owned(), item))
        .collect();
    format!("[{}]", rows.join(", "))
}

fn squeeze_numeric(array: ArrayD<f64>) -> Value {
    if array.len() == 1 {
        return array.iter().next().map_or(Value::None, |v| Value::Float(*v));
    }
    Value::Array(squeeze(array))
}

/// Drops every axis of length one.
#[must_use]
pub fn squeeze<T: Clone>(array: ArrayD<T>) -> ArrayD<T> {
    let shape: Vec<usize> = array.shape().iter().copied().filter(|&n| n != 1).collect();
    if shape.len() == array.ndim() {
        return array;
    }
    let flat: Vec<T> = array.iter().cloned().collect();
    ArrayD::from_shape_vec(IxDyn(&shape), flat).unwrap_or(array)
}
