//! Node records produced by a tree scan.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Path separator inside a container.
pub const SEP: char = '/';

/// Scalar or small-array attribute value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    StrArray(Vec<String>),
}

impl AttrValue {
    /// Text content, decoding bytes lossily. Numeric values return `None`.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Bytes(b) => Some(String::from_utf8_lossy(b).trim_end_matches('\0').to_string()),
            _ => None,
        }
    }

    /// All text entries: a single string becomes a one-element list.
    #[must_use]
    pub fn as_text_list(&self) -> Vec<String> {
        match self {
            Self::StrArray(items) => items.clone(),
            other => other.as_text().into_iter().collect(),
        }
    }

    /// Numeric value of a scalar attribute.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::IntArray(v) if v.len() == 1 => {
                #[allow(clippy::cast_precision_loss)]
                Some(v[0] as f64)
            }
            Self::FloatArray(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Bytes(_) => write!(f, "{}", self.as_text().unwrap_or_default()),
            Self::IntArray(v) => write!(f, "{v:?}"),
            Self::FloatArray(v) => write!(f, "{v:?}"),
            Self::StrArray(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Ordered attribute mapping (declaration order preserved).
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Attributes {
    entries: Vec<(String, AttrValue)>,
}

impl Attributes {
    /// Creates an empty attribute set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an attribute, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Builder form of [`Attributes::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.insert(name, value);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Text value of an attribute, if it is textual.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name).and_then(AttrValue::as_text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<AttrValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attrs = Self::new();
        for (k, v) in iter {
            attrs.insert(k, v);
        }
        attrs
    }
}

/// Kind of tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NodeKind {
    Group,
    Dataset,
}

/// Element class of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DtypeClass {
    #[default]
    Numeric,
    String,
    Bytes,
}

/// How a child is attached to its parent group.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LinkKind {
    Hard,
    /// Soft link to another path in the same container.
    Soft { target: String },
    /// External link into another container.
    External { file: String, target: String },
}

/// One entry of a group listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildLink {
    pub name: String,
    pub link: LinkKind,
}

impl ChildLink {
    #[must_use]
    pub fn hard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link: LinkKind::Hard,
        }
    }
}

/// Metadata for a single node, as returned by a reader.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub kind: NodeKind,
    pub attributes: Attributes,
    /// Dataset shape; empty for groups and scalars.
    pub shape: Vec<usize>,
    pub dtype: DtypeClass,
}

/// Group entry of the scanned tree.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GroupRecord {
    pub path: String,
    /// Final path segment.
    pub name: String,
    pub attributes: Attributes,
    pub link_target: Option<String>,
    /// Convention class tag (e.g. `NXdata`), if declared.
    pub class_name: Option<String>,
    pub child_paths: Vec<String>,
}

/// Dataset entry of the scanned tree.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DatasetRecord {
    pub path: String,
    /// Final path segment.
    pub name: String,
    pub attributes: Attributes,
    pub link_target: Option<String>,
    /// Total element count; 0 for scalars.
    pub size: usize,
    pub shape: Vec<usize>,
    pub dtype_class: DtypeClass,
}

impl DatasetRecord {
    /// Number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Scalar datasets are "values", everything else is an array.
    #[must_use]
    pub fn is_value(&self) -> bool {
        self.size == 0
    }
}

/// Element count for a shape; scalars count as 0.
#[must_use]
pub fn shape_size(shape: &[usize]) -> usize {
    if shape.is_empty() {
        0
    } else {
        shape.iter().product()
    }
}

/// Joins a parent path and a child name.
#[must_use]
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() || parent == "/" {
        format!("{SEP}{name}")
    } else {
        format!("{parent}{SEP}{name}")
    }
}

/// Final segment of a path.
#[must_use]
pub fn leaf_name(path: &str) -> &str {
    path.rsplit(SEP).next().unwrap_or(path)
}

/// Parent group path; the root is its own parent.
#[must_use]
pub fn parent_path(path: &str) -> &str {
    match path.rfind(SEP) {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_path_helpers() {
        assert_eq!(join_path("/", "entry"), "/entry");
        assert_eq!(join_path("/entry", "data"), "/entry/data");
        assert_eq!(leaf_name("/entry/data/x"), "x");
        assert_eq!(parent_path("/entry/data/x"), "/entry/data");
        assert_eq!(parent_path("/entry"), "/");
        assert_eq!(shape_size(&[]), 0);
        assert_eq!(shape_size(&[3, 4]), 12);
        assert_eq!(shape_size(&[0]), 0);
    }

    #[test]
    fn test_attributes_keep_order() {
        let mut attrs = Attributes::new().with("b", 1_i64).with("a", "x");
        attrs.insert("b", 2_i64);
        let names: Vec<&str> = attrs.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(attrs.get("b"), Some(&AttrValue::Int(2)));
        assert_eq!(attrs.text("a").as_deref(), Some("x"));
    }

    #[test]
    fn test_attr_bytes_decode() {
        let value = AttrValue::Bytes(b"NXdata\0".to_vec());
        assert_eq!(value.as_text().as_deref(), Some("NXdata"));
        assert_abs_diff_eq!(AttrValue::Float(2.5).as_f64().unwrap(), 2.5);
        assert_abs_diff_eq!(AttrValue::IntArray(vec![7]).as_f64().unwrap(), 7.0);
        assert!(AttrValue::FloatArray(vec![1.0, 2.0]).as_f64().is_none());
    }
}
