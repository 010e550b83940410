use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// AttrValue – one entry of a node's attribute map
// ---------------------------------------------------------------------------

/// A dynamically-typed attribute value: scalar, string, or 1-D list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    StrList(Vec<String>),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Str(s) => write!(f, "{s}"),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::StrList(v) => write!(f, "{v:?}"),
            AttrValue::IntList(v) => write!(f, "{v:?}"),
            AttrValue::FloatList(v) => write!(f, "{v:?}"),
        }
    }
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(v: Vec<String>) -> Self {
        AttrValue::StrList(v)
    }
}

impl From<Vec<f64>> for AttrValue {
    fn from(v: Vec<f64>) -> Self {
        AttrValue::FloatList(v)
    }
}

/// Attribute map of a node. Ordered so listings are stable.
pub type Attrs = BTreeMap<String, AttrValue>;

// ---------------------------------------------------------------------------
// Array – the payload of a dataset
// ---------------------------------------------------------------------------

/// A dense row-major `f64` array with an explicit shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Array {
    /// Build an array, checking that `shape` covers exactly `data.len()` elements.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::Shape {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Array { shape, data })
    }

    /// A 1-D array over `data`.
    pub fn from_vec(data: Vec<f64>) -> Self {
        Array {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element-wise map preserving the shape.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Array {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// The shape as an attribute value.
    pub fn shape_attr(&self) -> AttrValue {
        AttrValue::IntList(self.shape.iter().map(|&d| d as i64).collect())
    }
}

impl From<Vec<f64>> for Array {
    fn from(data: Vec<f64>) -> Self {
        Array::from_vec(data)
    }
}

// ---------------------------------------------------------------------------
// Node tree
// ---------------------------------------------------------------------------

/// A dataset: array payload plus attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub array: Array,
    pub attrs: Attrs,
}

/// A group: named, ordered children plus attributes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Group {
    pub children: BTreeMap<String, Node>,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Group(Group),
    Dataset(Dataset),
}

impl Node {
    pub fn attrs(&self) -> &Attrs {
        match self {
            Node::Group(g) => &g.attrs,
            Node::Dataset(d) => &d.attrs,
        }
    }

    pub fn attrs_mut(&mut self) -> &mut Attrs {
        match self {
            Node::Group(g) => &mut g.attrs,
            Node::Dataset(d) => &mut d.attrs,
        }
    }

    pub fn is_dataset(&self) -> bool {
        matches!(self, Node::Dataset(_))
    }
}

/// Split a store path into its components, rejecting empty segments.
///
/// Leading and trailing `/` are ignored, so `/datasets/a` and `datasets/a`
/// name the same node.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = trimmed.split('/').collect();
    if parts.iter().any(|p| p.is_empty() || *p == "." || *p == "..") {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "empty or relative segment".into(),
        });
    }
    Ok(parts)
}

/// Canonical form of a path: no leading or trailing separator.
pub fn normalize_path(path: &str) -> Result<String> {
    Ok(split_path(path)?.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_rejects_mismatched_shape() {
        let err = Array::new(vec![2, 2], vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, Error::Shape { expected: 4, actual: 3, .. }));
        assert!(Array::new(vec![3, 1], vec![1.0, 2.0, 3.0]).is_ok());
    }

    #[test]
    fn paths_normalize_and_reject_empty_segments() {
        assert_eq!(normalize_path("/datasets/a/").unwrap(), "datasets/a");
        assert_eq!(split_path("").unwrap(), Vec::<&str>::new());
        assert!(split_path("datasets//a").is_err());
        assert!(split_path("datasets/../a").is_err());
    }
}
