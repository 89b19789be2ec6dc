//! Field values and measurements.
//!
//! A measurement is one logical input document: a time, an optional metadata
//! value and a set of named field values. Values carry their own type tag so
//! the catalog can detect conflicting types for the same field name across
//! measurements in a bucket.

use crate::Timestamp;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Type tag for a [`FieldValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Null,
    Bool,
    I64,
    F64,
    String,
    Timestamp,
    Array,
    Object,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::I64 => "i64",
            Self::F64 => "f64",
            Self::String => "string",
            Self::Timestamp => "timestamp",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(s)
    }
}

/// A single field value within a measurement or metadata document.
///
/// Objects use a `BTreeMap` so that two metadata documents with the same
/// fields in different order compare, and hash, identically.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Timestamp(Timestamp),
    Array(Vec<FieldValue>),
    Object(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Null => FieldType::Null,
            Self::Bool(_) => FieldType::Bool,
            Self::I64(_) => FieldType::I64,
            Self::F64(_) => FieldType::F64,
            Self::String(_) => FieldType::String,
            Self::Timestamp(_) => FieldType::Timestamp,
            Self::Array(_) => FieldType::Array,
            Self::Object(_) => FieldType::Object,
        }
    }

    /// Rough serialized size of this value, in bytes. The catalog only needs
    /// a stable estimate for capacity decisions, not an exact wire size.
    pub fn size_estimate(&self) -> usize {
        match self {
            Self::Null => 1,
            Self::Bool(_) => 2,
            Self::I64(_) | Self::F64(_) | Self::Timestamp(_) => 9,
            Self::String(s) => 6 + s.len(),
            Self::Array(values) => {
                5 + values.iter().map(|v| 3 + v.size_estimate()).sum::<usize>()
            }
            Self::Object(fields) => {
                5 + fields
                    .iter()
                    .map(|(name, v)| name.len() + 2 + v.size_estimate())
                    .sum::<usize>()
            }
        }
    }

    /// Total order across all field values: by type rank first, then by value
    /// within the type. Used for the per-field min/max control summary.
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::I64(a), Self::I64(b)) => a.cmp(b),
            (Self::F64(a), Self::F64(b)) => a.total_cmp(b),
            // Mixed numerics compare by value so a bucket with both widths
            // still gets meaningful extrema.
            (Self::I64(a), Self::F64(b)) => (*a as f64).total_cmp(b),
            (Self::F64(a), Self::I64(b)) => a.total_cmp(&(*b as f64)),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                a.len().cmp(&b.len())
            }
            (Self::Object(a), Self::Object(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    match ka.cmp(kb).then_with(|| va.compare(vb)) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::I64(_) | Self::F64(_) => 1,
            Self::String(_) => 2,
            Self::Object(_) => 3,
            Self::Array(_) => 4,
            Self::Bool(_) => 5,
            Self::Timestamp(_) => 6,
        }
    }

    /// Render the value for the persisted bucket document.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::from(*b),
            Self::I64(v) => serde_json::Value::from(*v),
            Self::F64(v) => serde_json::Value::from(*v),
            Self::String(s) => serde_json::Value::from(s.as_str()),
            Self::Timestamp(t) => serde_json::json!({ "$date": t.get() }),
            Self::Array(values) => {
                serde_json::Value::Array(values.iter().map(Self::to_json).collect())
            }
            Self::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(name, v)| (name.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            // Bit equality so that NaN metadata still lands in one bucket.
            (Self::F64(a), Self::F64(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl Hash for FieldValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::I64(v) => v.hash(state),
            Self::F64(v) => v.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::Timestamp(t) => t.hash(state),
            Self::Array(values) => {
                for v in values {
                    v.hash(state);
                }
            }
            Self::Object(fields) => {
                for (name, v) in fields {
                    name.hash(state);
                    v.hash(state);
                }
            }
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Timestamp> for FieldValue {
    fn from(v: Timestamp) -> Self {
        Self::Timestamp(v)
    }
}

/// One logical input document to be absorbed into a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Measurement {
    fields: BTreeMap<String, FieldValue>,
}

impl Measurement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, v)| (name.as_str(), v))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn size_estimate(&self) -> usize {
        5 + self
            .fields
            .iter()
            .map(|(name, v)| name.len() + 2 + v.size_estimate())
            .sum::<usize>()
    }
}
