//! Criteria matching. A criteria is a declarative filter mapping dotted
//! field paths to conditions, parsed from MongoDB style operator objects
//! into a closed set of condition variants.

use crate::error::{Result, RippleError};
use crate::types::{Document, FindOptions, SortOrder, Value};
use std::cmp::Ordering;

/// A single matchable condition against a field path.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    ElemMatch(Criteria),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub path: String,
    pub condition: Condition,
}

/// A compiled filter expression. An empty criteria matches every document.
///
/// The raw criteria value is retained because positional `$` update paths
/// derive their element filter from the original criteria entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    raw: Value,
    clauses: Vec<Clause>,
}

impl Default for Criteria {
    fn default() -> Self {
        Self::empty()
    }
}

impl Criteria {
    pub fn empty() -> Self {
        Self {
            raw: Value::Object(Default::default()),
            clauses: Vec::new(),
        }
    }

    /// Compiles a MongoDB style criteria object. Malformed expressions fail
    /// with [`RippleError::InvalidCriteria`]; they are never silently
    /// ignored.
    pub fn parse(criteria: impl Into<Value>) -> Result<Self> {
        let raw = criteria.into();
        let Value::Object(map) = &raw else {
            return Err(RippleError::InvalidCriteria(
                "criteria must be an object".to_string(),
            ));
        };
        let mut clauses = Vec::new();
        for (path, entry) in map {
            if path.starts_with('$') {
                // Bare operator at the root, eg. an `$elemMatch` body of
                // `{"$gt": 90}` tested against scalar elements.
                clauses.push(Clause {
                    path: String::new(),
                    condition: parse_operator("", path, entry)?,
                });
            } else {
                parse_entry(path, entry, &mut clauses)?;
            }
        }
        Ok(Self { raw, clauses })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Tests a document against the criteria.
    pub fn matches(&self, document: &Document) -> bool {
        self.clauses.iter().all(|clause| {
            let found = document_candidates(document, &clause.path);
            eval(&clause.condition, &found)
        })
    }

    /// Tests a standalone value, used for `$elemMatch` elements and
    /// positional array filters.
    pub fn matches_value(&self, value: &Value) -> bool {
        self.clauses.iter().all(|clause| {
            let mut found = Vec::new();
            collect_candidates(value, &clause.path, &mut found);
            let found: Vec<Value> = found.into_iter().cloned().collect();
            eval(&clause.condition, &found)
        })
    }
}

fn parse_entry(path: &str, entry: &Value, out: &mut Vec<Clause>) -> Result<()> {
    if let Value::Object(ops) = entry {
        let dollar_keys = ops.keys().filter(|k| k.starts_with('$')).count();
        if dollar_keys > 0 {
            if dollar_keys != ops.len() {
                return Err(RippleError::InvalidCriteria(format!(
                    "'{path}' mixes operators with plain fields"
                )));
            }
            for (op, operand) in ops {
                out.push(Clause {
                    path: path.to_string(),
                    condition: parse_operator(path, op, operand)?,
                });
            }
            return Ok(());
        }
    }
    out.push(Clause {
        path: path.to_string(),
        condition: Condition::Eq(entry.clone()),
    });
    Ok(())
}

fn parse_operator(path: &str, op: &str, operand: &Value) -> Result<Condition> {
    let condition = match op {
        "$eq" => Condition::Eq(operand.clone()),
        "$ne" => Condition::Ne(operand.clone()),
        "$gt" => Condition::Gt(operand.clone()),
        "$gte" => Condition::Gte(operand.clone()),
        "$lt" => Condition::Lt(operand.clone()),
        "$lte" => Condition::Lte(operand.clone()),
        "$in" => Condition::In(operand_list(path, op, operand)?),
        "$nin" => Condition::Nin(operand_list(path, op, operand)?),
        "$exists" => match operand {
            Value::Bool(b) => Condition::Exists(*b),
            _ => {
                return Err(RippleError::InvalidCriteria(format!(
                    "'{path}': $exists requires a boolean"
                )));
            }
        },
        "$elemMatch" => match operand {
            Value::Object(_) => Condition::ElemMatch(Criteria::parse(operand.clone())?),
            _ => {
                return Err(RippleError::InvalidCriteria(format!(
                    "'{path}': $elemMatch requires an object"
                )));
            }
        },
        _ => {
            return Err(RippleError::InvalidCriteria(format!(
                "'{path}': unsupported operator '{op}'"
            )));
        }
    };
    Ok(condition)
}

fn operand_list(path: &str, op: &str, operand: &Value) -> Result<Vec<Value>> {
    match operand {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(RippleError::InvalidCriteria(format!(
            "'{path}': {op} requires an array"
        ))),
    }
}

/// Resolves every value a dotted path can reach within a value tree. Array
/// segments either index by number or fan out over the elements.
fn collect_candidates<'a>(value: &'a Value, path: &str, out: &mut Vec<&'a Value>) {
    if path.is_empty() {
        out.push(value);
        return;
    }
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, rest),
        None => (path, ""),
    };
    match value {
        Value::Object(map) => {
            if let Some(next) = map.get(head) {
                collect_candidates(next, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = items.get(index) {
                    collect_candidates(next, rest, out);
                }
            } else {
                for item in items {
                    collect_candidates(item, path, out);
                }
            }
        }
        _ => {}
    }
}

/// Resolves candidates for a document path. `id` and `meta.*` live outside
/// the data map and are materialized on the fly.
fn document_candidates(document: &Document, path: &str) -> Vec<Value> {
    if path == "id" {
        return vec![Value::String(document.id.clone())];
    }
    if path == "meta.createdAt" {
        return vec![Value::Int(document.meta.created_at)];
    }
    if path == "meta.updatedAt" {
        return vec![Value::Int(document.meta.updated_at)];
    }
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, rest),
        None => (path, ""),
    };
    let mut found = Vec::new();
    if let Some(value) = document.data.get(head) {
        collect_candidates(value, rest, &mut found);
    }
    found.into_iter().cloned().collect()
}

fn eval(condition: &Condition, found: &[Value]) -> bool {
    match condition {
        Condition::Eq(target) => found.iter().any(|v| equals(v, target)),
        Condition::Ne(target) => !found.iter().any(|v| equals(v, target)),
        Condition::Gt(target) => compare_any(found, target, |o| o == Ordering::Greater),
        Condition::Gte(target) => compare_any(found, target, |o| o != Ordering::Less),
        Condition::Lt(target) => compare_any(found, target, |o| o == Ordering::Less),
        Condition::Lte(target) => compare_any(found, target, |o| o != Ordering::Greater),
        Condition::In(list) => found
            .iter()
            .any(|v| list.iter().any(|target| equals(v, target))),
        Condition::Nin(list) => !found
            .iter()
            .any(|v| list.iter().any(|target| equals(v, target))),
        Condition::Exists(expected) => !found.is_empty() == *expected,
        Condition::ElemMatch(sub) => found.iter().any(|v| match v {
            Value::Array(items) => items.iter().any(|item| sub.matches_value(item)),
            _ => false,
        }),
    }
}

/// Equality with implicit array containment: a field holding an array
/// matches a scalar target when any element equals it.
fn equals(value: &Value, target: &Value) -> bool {
    if value == target {
        return true;
    }
    match value {
        Value::Array(items) => items.iter().any(|item| item == target),
        _ => false,
    }
}

fn compare_any(found: &[Value], target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    found.iter().any(|v| {
        if comparable(v, target) && accept(compare(v, target)) {
            return true;
        }
        match v {
            Value::Array(items) => items
                .iter()
                .any(|item| comparable(item, target) && accept(compare(item, target))),
            _ => false,
        }
    })
}

/// Ordering for range conditions and sort keys. Mixed Int/Float pairs
/// compare by numeric value; the type-rank order alone would put every
/// float above every int.
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(l), Value::Float(r)) => compare_f64(*l as f64, *r),
        (Value::Float(l), Value::Int(r)) => compare_f64(*l, *r as f64),
        _ => a.cmp(b),
    }
}

fn compare_f64(l: f64, r: f64) -> Ordering {
    l.partial_cmp(&r).unwrap_or(Ordering::Equal)
}

// Range comparisons only apply within a comparable type family; a string is
// never greater than an int the way the total type-rank order would claim.
fn comparable(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
    )
}

/// Filters, sorts, skips and limits documents, in that order. Sort is stable
/// so ties keep their natural (insertion) order.
pub fn find_all<'a>(
    documents: impl Iterator<Item = &'a Document>,
    criteria: &Criteria,
    options: &FindOptions,
) -> Vec<Document> {
    let matched: Vec<Document> = documents
        .filter(|doc| criteria.matches(doc))
        .cloned()
        .collect();
    apply_options(matched, options)
}

/// Applies cursor options (sort, skip, limit) to an already filtered set.
pub fn apply_options(mut documents: Vec<Document>, options: &FindOptions) -> Vec<Document> {
    if !options.sort.is_empty() {
        documents.sort_by(|a, b| {
            for (path, order) in &options.sort {
                let left = sort_key(a, path);
                let right = sort_key(b, path);
                let ordering = match (left, right) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (Some(l), Some(r)) => compare(&l, &r),
                };
                let ordering = match order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }
    if let Some(skip) = options.skip {
        documents = documents.into_iter().skip(skip).collect();
    }
    if let Some(limit) = options.limit {
        documents.truncate(limit);
    }
    documents
}

fn sort_key(document: &Document, path: &str) -> Option<Value> {
    document_candidates(document, path).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PartialDocument;
    use serde_json::json;

    fn doc(id: &str, data: serde_json::Value) -> Document {
        PartialDocument::from_value(data)
            .unwrap()
            .with_id(id)
            .into_document(crate::types::generate_id)
    }

    #[test]
    fn test_equality_match() {
        let criteria = Criteria::parse(json!({"name": "Alice"})).unwrap();
        assert!(criteria.matches(&doc("1", json!({"name": "Alice"}))));
        assert!(!criteria.matches(&doc("2", json!({"name": "Bob"}))));
        assert!(!criteria.matches(&doc("3", json!({}))));
    }

    #[test]
    fn test_id_match() {
        let criteria = Criteria::parse(json!({"id": "user-1"})).unwrap();
        assert!(criteria.matches(&doc("user-1", json!({}))));
        assert!(!criteria.matches(&doc("user-2", json!({}))));
    }

    #[test]
    fn test_comparison_operators() {
        let criteria = Criteria::parse(json!({"age": {"$gte": 18, "$lt": 65}})).unwrap();
        assert!(criteria.matches(&doc("1", json!({"age": 18}))));
        assert!(criteria.matches(&doc("2", json!({"age": 40}))));
        assert!(!criteria.matches(&doc("3", json!({"age": 65}))));
        assert!(!criteria.matches(&doc("4", json!({"age": "old"}))));
    }

    #[test]
    fn test_mixed_numeric_comparisons() {
        let criteria = Criteria::parse(json!({"price": {"$lt": 5}})).unwrap();
        assert!(criteria.matches(&doc("1", json!({"price": 4.5}))));
        assert!(!criteria.matches(&doc("2", json!({"price": 5.5}))));

        let criteria = Criteria::parse(json!({"price": {"$gt": 100}})).unwrap();
        assert!(!criteria.matches(&doc("3", json!({"price": 4.5}))));
        assert!(criteria.matches(&doc("4", json!({"price": 100.5}))));

        let criteria = Criteria::parse(json!({"price": {"$gte": 5.0}})).unwrap();
        assert!(criteria.matches(&doc("5", json!({"price": 5}))));
    }

    #[test]
    fn test_sort_over_mixed_numeric_column() {
        let docs = vec![
            doc("1", json!({"price": 4.5})),
            doc("2", json!({"price": 2})),
            doc("3", json!({"price": 3.1})),
        ];
        let sorted = find_all(
            docs.iter(),
            &Criteria::empty(),
            &FindOptions::new().sort("price", SortOrder::Asc),
        );
        let ids: Vec<&str> = sorted.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
    }

    #[test]
    fn test_in_nin_exists() {
        let criteria = Criteria::parse(json!({"status": {"$in": ["open", "held"]}})).unwrap();
        assert!(criteria.matches(&doc("1", json!({"status": "open"}))));
        assert!(!criteria.matches(&doc("2", json!({"status": "closed"}))));

        let criteria = Criteria::parse(json!({"email": {"$exists": true}})).unwrap();
        assert!(criteria.matches(&doc("3", json!({"email": "a@b.c"}))));
        assert!(!criteria.matches(&doc("4", json!({}))));
    }

    #[test]
    fn test_dotted_path_through_arrays() {
        let criteria = Criteria::parse(json!({"grades.grade": 85})).unwrap();
        let document = doc(
            "1",
            json!({"grades": [{"grade": 80, "std": 8}, {"grade": 85, "std": 5}]}),
        );
        assert!(criteria.matches(&document));

        let criteria = Criteria::parse(json!({"grades.grade": 90})).unwrap();
        assert!(!criteria.matches(&document));
    }

    #[test]
    fn test_array_contains_scalar() {
        let criteria = Criteria::parse(json!({"tags": "rust"})).unwrap();
        assert!(criteria.matches(&doc("1", json!({"tags": ["db", "rust"]}))));
        assert!(!criteria.matches(&doc("2", json!({"tags": ["db"]}))));
    }

    #[test]
    fn test_elem_match() {
        let criteria =
            Criteria::parse(json!({"grades": {"$elemMatch": {"grade": {"$gt": 80}, "std": 5}}}))
                .unwrap();
        let matching = doc("1", json!({"grades": [{"grade": 85, "std": 5}]}));
        let failing = doc("2", json!({"grades": [{"grade": 85, "std": 8}]}));
        assert!(criteria.matches(&matching));
        assert!(!criteria.matches(&failing));
    }

    #[test]
    fn test_elem_match_operator_body() {
        let criteria = Criteria::parse(json!({"scores": {"$elemMatch": {"$gt": 90}}})).unwrap();
        assert!(criteria.matches(&doc("1", json!({"scores": [70, 95]}))));
        assert!(!criteria.matches(&doc("2", json!({"scores": [70, 80]}))));
    }

    #[test]
    fn test_malformed_criteria_rejected() {
        assert!(matches!(
            Criteria::parse(json!({"a": {"$regex": "x"}})),
            Err(RippleError::InvalidCriteria(_))
        ));
        assert!(matches!(
            Criteria::parse(json!({"a": {"$in": 5}})),
            Err(RippleError::InvalidCriteria(_))
        ));
        assert!(matches!(
            Criteria::parse(json!({"a": {"$gt": 1, "b": 2}})),
            Err(RippleError::InvalidCriteria(_))
        ));
        assert!(matches!(
            Criteria::parse(json!(42)),
            Err(RippleError::InvalidCriteria(_))
        ));
    }

    #[test]
    fn test_find_all_sort_skip_limit() {
        let docs = vec![
            doc("1", json!({"age": 30, "name": "a"})),
            doc("2", json!({"age": 20, "name": "b"})),
            doc("3", json!({"age": 40, "name": "c"})),
            doc("4", json!({"age": 20, "name": "d"})),
        ];
        let criteria = Criteria::empty();
        let options = FindOptions::new().sort("age", SortOrder::Asc);
        let sorted = find_all(docs.iter(), &criteria, &options);
        let ids: Vec<&str> = sorted.iter().map(|d| d.id.as_str()).collect();
        // Ties keep natural order: doc 2 precedes doc 4.
        assert_eq!(ids, vec!["2", "4", "1", "3"]);

        let options = FindOptions::new()
            .sort("age", SortOrder::Desc)
            .skip(1)
            .limit(2);
        let page = find_all(docs.iter(), &criteria, &options);
        let ids: Vec<&str> = page.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_missing_sort_key_sorts_first() {
        let docs = vec![
            doc("1", json!({"rank": 2})),
            doc("2", json!({})),
            doc("3", json!({"rank": 1})),
        ];
        let sorted = find_all(
            docs.iter(),
            &Criteria::empty(),
            &FindOptions::new().sort("rank", SortOrder::Asc),
        );
        let ids: Vec<&str> = sorted.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
    }
}
