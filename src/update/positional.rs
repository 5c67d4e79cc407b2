//! Positional `$` path resolution for update operators.
//!
//! An update path such as `grades.$.std` targets a single array element: the
//! first element matched by a filter derived from the criteria that located
//! the host document. This module is pure: it splits the path, derives the
//! element filter and resolves the target index, and leaves document
//! mutation to the operator implementations.

use crate::error::Result;
use crate::query::Criteria;
use crate::types::Value;
use std::collections::BTreeMap;

/// An update path split at its `$` segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionalPath {
    /// Path to the array field on the host document. Eg. `grades`.
    pub array_path: String,
    /// Path inside the targeted element, empty when the element itself is
    /// the target. Eg. `std`.
    pub sub_path: String,
}

/// The rule identifying which array element a positional path targets.
#[derive(Debug, Clone)]
pub enum ElementFilter {
    /// Object filter: the first element satisfying the criteria.
    Match(Criteria),
    /// Scalar filter: the first element strictly equal to the value.
    Value(Value),
    /// The criteria holds no entry for the array field; no element matches.
    None,
}

pub fn split_path(key: &str) -> PositionalPath {
    let (left, right) = key.split_once('$').unwrap_or((key, ""));
    PositionalPath {
        array_path: trim_separators(left),
        sub_path: trim_separators(right),
    }
}

fn trim_separators(value: &str) -> String {
    value.trim_matches('.').to_string()
}

/// Derives the element filter for a positional update path from the query
/// criteria.
///
/// A criteria condition on the array field (or a sub-path of it) becomes a
/// match filter; failing that, a scalar criteria entry on the array field
/// itself becomes a strict-equality value filter.
pub fn derive_filter(criteria: &Criteria, key: &str) -> Result<(PositionalPath, ElementFilter)> {
    let position = split_path(key);
    let Value::Object(entries) = criteria.raw() else {
        return Ok((position, ElementFilter::None));
    };

    for (entry_key, entry_value) in entries {
        if let Some(filter) = entry_filter(entry_key, entry_value, &position)? {
            return Ok((position, filter));
        }
    }

    let filter = match entries.get(&position.array_path) {
        Some(value) => ElementFilter::Value(value.clone()),
        None => ElementFilter::None,
    };
    Ok((position, filter))
}

fn entry_filter(
    entry_key: &str,
    entry_value: &Value,
    position: &PositionalPath,
) -> Result<Option<ElementFilter>> {
    if !entry_key.contains(position.array_path.as_str()) {
        return Ok(None);
    }
    if !entry_key.contains('.') && !entry_value.is_object() {
        return Ok(None);
    }

    let sub_key = trim_separators(&entry_key.replacen(position.array_path.as_str(), "", 1));
    if sub_key.is_empty() {
        // Condition sits directly on the array field.
        let Value::Object(object) = entry_value else {
            return Ok(None);
        };
        let body = match object.get("$elemMatch") {
            Some(inner) => inner.clone(),
            None => entry_value.clone(),
        };
        return Ok(Some(ElementFilter::Match(Criteria::parse(body)?)));
    }

    // Sub-field condition, eg. `grades.grade: 85` becomes `{grade: 85}`.
    let mut body = BTreeMap::new();
    body.insert(sub_key, entry_value.clone());
    Ok(Some(ElementFilter::Match(Criteria::parse(Value::Object(
        body,
    ))?)))
}

/// Index of the first array element the filter accepts.
pub fn resolve_index(items: &[Value], filter: &ElementFilter) -> Option<usize> {
    match filter {
        ElementFilter::Match(criteria) => {
            items.iter().position(|item| criteria.matches_value(item))
        }
        ElementFilter::Value(value) => items.iter().position(|item| item == value),
        ElementFilter::None => None,
    }
}
