//! Update operator evaluation.
//!
//! Operators run against a clone of the target document in a fixed order:
//! `$set`, `$unset`, `$push`, `$pull`, `$inc`. Each reports whether it
//! changed anything by deep comparison of before/after values, so a `$set`
//! of an identical value is not a modification.

pub mod positional;

use crate::error::{Result, RippleError};
use crate::query::Criteria;
use crate::types::{Document, Value};
use positional::ElementFilter;

/// Parsed `{$set, $unset, $push, $pull, $inc}` operator payload. Builder
/// calls keep their call order; payloads parsed from a JSON object arrive
/// in the object's key order.
#[derive(Debug, Clone, Default)]
pub struct UpdateOperators {
    set: Vec<(String, Value)>,
    unset: Vec<String>,
    push: Vec<(String, Value)>,
    pull: Vec<(String, Value)>,
    inc: Vec<(String, Value)>,
}

impl UpdateOperators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((path.into(), value.into()));
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.push(path.into());
        self
    }

    pub fn push(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push.push((path.into(), value.into()));
        self
    }

    pub fn pull(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.pull.push((path.into(), value.into()));
        self
    }

    pub fn inc(mut self, path: impl Into<String>, delta: impl Into<Value>) -> Self {
        self.inc.push((path.into(), delta.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.unset.is_empty()
            && self.push.is_empty()
            && self.pull.is_empty()
            && self.inc.is_empty()
    }

    /// Parses a MongoDB style operator object such as
    /// `{"$set": {"a": 1}, "$inc": {"n": 2}}`.
    pub fn parse(operators: impl Into<Value>) -> Result<Self> {
        let value = operators.into();
        let Value::Object(map) = value else {
            return Err(RippleError::InvalidOperators(
                "update operators must be an object".to_string(),
            ));
        };
        let mut parsed = Self::new();
        for (operator, payload) in map {
            let Value::Object(entries) = payload else {
                return Err(RippleError::InvalidOperators(format!(
                    "{operator} requires an object payload"
                )));
            };
            match operator.as_str() {
                "$set" => parsed.set.extend(entries),
                "$unset" => parsed.unset.extend(entries.into_keys()),
                "$push" => parsed.push.extend(entries),
                "$pull" => parsed.pull.extend(entries),
                "$inc" => {
                    for (path, delta) in entries {
                        if !delta.is_numeric() {
                            return Err(RippleError::InvalidOperators(format!(
                                "$inc delta for '{path}' must be numeric"
                            )));
                        }
                        parsed.inc.push((path, delta));
                    }
                }
                _ => {
                    return Err(RippleError::InvalidOperators(format!(
                        "unsupported operator '{operator}'"
                    )));
                }
            }
        }
        Ok(parsed)
    }
}

/// Result of applying update operators to a document.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub modified: bool,
    pub document: Document,
}

/// Applies the operators to a clone of `document`. The criteria is consulted
/// only for positional `$` paths. The original document is never mutated.
pub fn apply(
    document: &Document,
    criteria: &Criteria,
    operators: &UpdateOperators,
) -> Result<UpdateOutcome> {
    let mut updated = document.clone();

    let set_modified = apply_set(&mut updated, criteria, &operators.set)?;
    let unset_modified = apply_unset(&mut updated, criteria, &operators.unset)?;
    let push_modified = apply_push(&mut updated, &operators.push)?;
    let pull_modified = apply_pull(&mut updated, &operators.pull)?;
    let inc_modified = apply_inc(&mut updated, criteria, &operators.inc)?;

    Ok(UpdateOutcome {
        modified: set_modified || unset_modified || push_modified || pull_modified || inc_modified,
        document: updated,
    })
}

fn apply_set(document: &mut Document, criteria: &Criteria, set: &[(String, Value)]) -> Result<bool> {
    let mut modified = false;
    for (key, value) in set {
        if key.contains('$') {
            modified |= set_positional(document, criteria, key, value)?;
        } else {
            let before = document.get(key).cloned();
            document.set(key, value.clone());
            modified |= before.as_ref() != Some(value);
        }
    }
    Ok(modified)
}

fn set_positional(
    document: &mut Document,
    criteria: &Criteria,
    key: &str,
    value: &Value,
) -> Result<bool> {
    let (position, filter) = positional::derive_filter(criteria, key)?;
    let items = array_at(document, &position.array_path)?;
    let mut updated = items.clone();

    if let Some(index) = positional::resolve_index(&items, &filter) {
        if position.sub_path.is_empty() {
            updated[index] = value.clone();
        } else if updated[index].is_object() {
            updated[index].set_path(&position.sub_path, value.clone());
        }
    }

    // Modification is detected over the whole array, not just the touched
    // element; downstream change notifications depend on this.
    let modified = items != updated;
    document.set(&position.array_path, Value::Array(updated));
    Ok(modified)
}

fn apply_unset(document: &mut Document, criteria: &Criteria, unset: &[String]) -> Result<bool> {
    let mut modified = false;
    for key in unset {
        if key.contains('$') {
            modified |= unset_positional(document, criteria, key)?;
        } else {
            modified |= document.remove(key).is_some();
        }
    }
    Ok(modified)
}

fn unset_positional(document: &mut Document, criteria: &Criteria, key: &str) -> Result<bool> {
    let (position, filter) = positional::derive_filter(criteria, key)?;
    if position.sub_path.is_empty() {
        // No sub-target: the whole array field goes away.
        return Ok(document.remove(&position.array_path).is_some());
    }
    let items = array_at(document, &position.array_path)?;
    let mut updated = items.clone();
    if let Some(index) = positional::resolve_index(&items, &filter) {
        updated[index].remove_path(&position.sub_path);
    }
    let modified = items != updated;
    document.set(&position.array_path, Value::Array(updated));
    Ok(modified)
}

fn apply_push(document: &mut Document, push: &[(String, Value)]) -> Result<bool> {
    let mut modified = false;
    for (key, value) in push {
        match document.get_mut(key) {
            Some(Value::Array(items)) => {
                items.push(value.clone());
                modified = true;
            }
            Some(_) => return Err(RippleError::NotArray(key.clone())),
            None => {
                document.set(key, Value::Array(vec![value.clone()]));
                modified = true;
            }
        }
    }
    Ok(modified)
}

fn apply_pull(document: &mut Document, pull: &[(String, Value)]) -> Result<bool> {
    let mut modified = false;
    for (key, value) in pull {
        let filter = match value {
            Value::Object(_) => ElementFilter::Match(Criteria::parse(value.clone())?),
            _ => ElementFilter::Value(value.clone()),
        };
        match document.get_mut(key) {
            Some(Value::Array(items)) => {
                if let Some(index) = positional::resolve_index(items, &filter) {
                    items.remove(index);
                    modified = true;
                }
            }
            Some(_) => return Err(RippleError::NotArray(key.clone())),
            None => {}
        }
    }
    Ok(modified)
}

fn apply_inc(document: &mut Document, criteria: &Criteria, inc: &[(String, Value)]) -> Result<bool> {
    let mut modified = false;
    for (key, delta) in inc {
        if key.contains('$') {
            modified |= inc_positional(document, criteria, key, delta)?;
        } else {
            match document.get(key).cloned() {
                None => {
                    document.set(key, delta.clone());
                    modified = true;
                }
                Some(current) => {
                    let next = add(&current, delta, key)?;
                    modified |= next != current;
                    document.set(key, next);
                }
            }
        }
    }
    Ok(modified)
}

fn inc_positional(
    document: &mut Document,
    criteria: &Criteria,
    key: &str,
    delta: &Value,
) -> Result<bool> {
    let (position, filter) = positional::derive_filter(criteria, key)?;
    let items = array_at(document, &position.array_path)?;
    let mut updated = items.clone();

    if let Some(index) = positional::resolve_index(&items, &filter) {
        let current = if position.sub_path.is_empty() {
            Some(updated[index].clone())
        } else {
            updated[index].get_path(&position.sub_path).cloned()
        };
        let next = match current {
            Some(value) => add(&value, delta, key)?,
            None => delta.clone(),
        };
        if position.sub_path.is_empty() {
            updated[index] = next;
        } else if updated[index].is_object() {
            updated[index].set_path(&position.sub_path, next);
        }
    }

    let modified = items != updated;
    document.set(&position.array_path, Value::Array(updated));
    Ok(modified)
}

fn add(current: &Value, delta: &Value, key: &str) -> Result<Value> {
    match (current, delta) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        _ => Err(RippleError::NotNumeric(key.to_string())),
    }
}

fn array_at(document: &Document, path: &str) -> Result<Vec<Value>> {
    match document.get(path) {
        Some(Value::Array(items)) => Ok(items.clone()),
        _ => Err(RippleError::NotArray(path.to_string())),
    }
}
