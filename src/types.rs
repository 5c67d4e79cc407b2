use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A single field value inside a document.
///
/// Objects use a `BTreeMap` so iteration order is deterministic, which the
/// positional update resolver relies on when it scans criteria entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

// Deterministic ordering across types so mixed-type sort keys stay stable.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) => 2,
        Value::Float(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let self_rank = type_rank(self);
        let other_rank = type_rank(other);

        if self_rank != other_rank {
            return self_rank.cmp(&other_rank);
        }

        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (Value::Object(a), Value::Object(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Array(arr) => {
                let items: Vec<String> = arr.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Object(obj) => {
                let items: Vec<String> = obj
                    .iter()
                    .map(|(k, v)| format!("\"{}\": {}", k, v))
                    .collect();
                write!(f, "{{{}}}", items.join(", "))
            }
            Value::Null => write!(f, "null"),
        }
    }
}

impl Value {
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Resolves a dotted path against this value. Numeric segments index into
    /// arrays, string segments into objects.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        let mut current = self;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => {
                    let index: usize = segment.parse().ok()?;
                    items.get(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Sets a value at a dotted path, creating intermediate objects as
    /// needed. Non-object intermediates are replaced, numeric segments index
    /// into existing arrays.
    pub fn set_path(&mut self, path: &str, value: Value) {
        if path.is_empty() {
            *self = value;
            return;
        }
        let (parent_path, key) = match path.rsplit_once('.') {
            Some((parent, key)) => (parent, key),
            None => ("", path),
        };
        let mut current = self;
        if !parent_path.is_empty() {
            for segment in parent_path.split('.') {
                current = match (current, segment.parse::<usize>()) {
                    (Value::Array(items), Ok(index)) => match items.get_mut(index) {
                        Some(item) => item,
                        None => return,
                    },
                    (other, _) => {
                        if !other.is_object() {
                            *other = Value::Object(BTreeMap::new());
                        }
                        let Value::Object(map) = other else {
                            unreachable!()
                        };
                        map.entry(segment.to_string())
                            .or_insert_with(|| Value::Object(BTreeMap::new()))
                    }
                };
            }
        }
        match (current, key.parse::<usize>()) {
            (Value::Array(items), Ok(index)) => {
                if index < items.len() {
                    items[index] = value;
                }
            }
            (other, _) => {
                if !other.is_object() {
                    *other = Value::Object(BTreeMap::new());
                }
                let Value::Object(map) = other else {
                    unreachable!()
                };
                map.insert(key.to_string(), value);
            }
        }
    }

    /// Removes the value at a dotted path, returning it if it existed.
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        let (parent_path, key) = match path.rsplit_once('.') {
            Some((parent, key)) => (parent, key),
            None => ("", path),
        };
        let parent = if parent_path.is_empty() {
            self
        } else {
            self.get_path_mut(parent_path)?
        };
        match parent {
            Value::Object(map) => map.remove(key),
            Value::Array(items) => {
                let index: usize = key.parse().ok()?;
                if index < items.len() {
                    Some(items.remove(index))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn get_path_mut(&mut self, path: &str) -> Option<&mut Value> {
        if path.is_empty() {
            return Some(self);
        }
        let mut current = self;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get_mut(segment)?,
                Value::Array(items) => {
                    let index: usize = segment.parse().ok()?;
                    items.get_mut(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Object(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Value::from(f),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

/// Engine managed document timestamps, milliseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub created_at: i64,
    pub updated_at: i64,
}

impl Meta {
    pub fn now() -> Self {
        let ts = Utc::now().timestamp_millis();
        Self {
            created_at: ts,
            updated_at: ts,
        }
    }

    pub fn touched(&self) -> Self {
        Self {
            created_at: self.created_at,
            updated_at: Utc::now().timestamp_millis(),
        }
    }
}

/// A stored record. The `id` is immutable once assigned and unique within a
/// collection; `meta` is maintained by the storage engine.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: BTreeMap<String, Value>,
    pub meta: Meta,
}

impl Document {
    /// Resolves a dotted path within the document data.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, rest),
            None => (path, ""),
        };
        let value = self.data.get(head)?;
        value.get_path(rest)
    }

    pub fn set(&mut self, path: &str, value: Value) {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, rest),
            None => (path, ""),
        };
        if rest.is_empty() {
            self.data.insert(head.to_string(), value);
        } else {
            self.data
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(BTreeMap::new()))
                .set_path(rest, value);
        }
    }

    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, rest),
            None => (path, ""),
        };
        if rest.is_empty() {
            self.data.remove(head)
        } else {
            self.data.get_mut(head)?.remove_path(rest)
        }
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, rest),
            None => (path, ""),
        };
        self.data.get_mut(head)?.get_path_mut(rest)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ \"id\": \"{}\"", self.id)?;
        for (key, value) in &self.data {
            write!(f, ", \"{}\": {}", key, value)?;
        }
        write!(f, " }}")
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An insertion payload: document fields without engine managed `meta`, with
/// an optional caller supplied id.
#[derive(Debug, Clone, Default)]
pub struct PartialDocument {
    pub id: Option<String>,
    pub data: BTreeMap<String, Value>,
}

impl PartialDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Builds a payload from an object value. A string `id` field, if
    /// present, becomes the caller supplied id.
    pub fn from_value(value: impl Into<Value>) -> crate::error::Result<Self> {
        let value = value.into();
        let Value::Object(mut map) = value else {
            return Err(crate::error::RippleError::InvalidCriteria(
                "insert payload must be an object".to_string(),
            ));
        };
        let id = match map.remove("id") {
            Some(Value::String(id)) => Some(id),
            Some(other) => {
                map.insert("id".to_string(), other);
                None
            }
            None => None,
        };
        Ok(Self { id, data: map })
    }

    pub(crate) fn into_document(self, generated_id: impl FnOnce() -> String) -> Document {
        Document {
            id: self.id.unwrap_or_else(generated_id),
            data: self.data,
            meta: Meta::now(),
        }
    }
}

pub(crate) fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Sort direction for a cursor sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Cursor options applied to query results: filter, then sort, then skip,
/// then limit.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Vec<(String, SortOrder)>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sort.is_empty() && self.skip.is_none() && self.limit.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_path_access() {
        let value = Value::from(json!({"a": {"b": [1, 2, {"c": 3}]}}));

        assert_eq!(value.get_path("a.b.0"), Some(&Value::Int(1)));
        assert_eq!(value.get_path("a.b.2.c"), Some(&Value::Int(3)));
        assert_eq!(value.get_path("a.missing"), None);
    }

    #[test]
    fn test_value_set_path_creates_intermediates() {
        let mut value = Value::Object(BTreeMap::new());
        value.set_path("a.b.c", Value::Int(1));
        assert_eq!(value.get_path("a.b.c"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_value_set_path_through_arrays() {
        let mut value = Value::from(json!({"grades": [{"std": 5}, {"std": 6}]}));
        value.set_path("grades.1.grade", Value::Int(100));
        assert_eq!(value.get_path("grades.1.grade"), Some(&Value::Int(100)));
        assert_eq!(value.get_path("grades.0.grade"), None);

        value.set_path("grades.0", Value::Int(7));
        assert_eq!(value.get_path("grades.0"), Some(&Value::Int(7)));

        // Writes past the end of an array are dropped.
        value.set_path("grades.9.grade", Value::Int(1));
        assert_eq!(value.get_path("grades").unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_value_set_path_replaces_scalar_intermediate() {
        let mut value = Value::from(json!({"a": 1}));
        value.set_path("a.b", Value::Int(2));
        assert_eq!(value.get_path("a.b"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_value_remove_path() {
        let mut value = Value::from(json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(value.remove_path("a.b"), Some(Value::Int(1)));
        assert_eq!(value.get_path("a.b"), None);
        assert_eq!(value.get_path("a.c"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_float_equality_by_bits() {
        assert_eq!(Value::Float(1.5), Value::Float(1.5));
        assert_ne!(Value::Float(1.5), Value::Int(1));
    }

    #[test]
    fn test_partial_document_from_value() {
        let partial =
            PartialDocument::from_value(json!({"id": "user-1", "name": "Alice"})).unwrap();
        assert_eq!(partial.id.as_deref(), Some("user-1"));
        assert_eq!(partial.data.get("name"), Some(&Value::from("Alice")));

        assert!(PartialDocument::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn test_document_dotted_set_get() {
        let mut doc = PartialDocument::new()
            .with("name", "Alice")
            .into_document(generate_id);
        doc.set("address.city", Value::from("Oslo"));
        assert_eq!(doc.get("address.city"), Some(&Value::from("Oslo")));
        assert_eq!(doc.remove("address.city"), Some(Value::from("Oslo")));
        assert_eq!(doc.get("address.city"), None);
    }
}
