use crate::events::Change;
use crate::query::Criteria;
use crate::types::Document;
use indexmap::IndexMap;

/// The locally materialized result set of a live query.
///
/// Keyed by document id and kept in first-seen order so requeries without an
/// explicit sort preserve natural order. `apply` reports whether an incoming
/// change was relevant; only then does the observer requery and re-emit.
pub struct QueryState {
    criteria: Criteria,
    documents: IndexMap<String, Document>,
}

impl QueryState {
    pub fn new(criteria: Criteria) -> Self {
        Self {
            criteria,
            documents: IndexMap::new(),
        }
    }

    /// Replaces the materialized set with a fresh query result.
    pub fn seed(&mut self, documents: Vec<Document>) {
        self.documents.clear();
        for document in documents {
            self.documents.insert(document.id.clone(), document);
        }
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }

    pub fn documents(&self) -> Vec<Document> {
        self.documents.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Folds a change into the set. Returns true when the result set
    /// changed: a matching document appeared or was modified, or a member
    /// was removed or updated out of the criteria.
    pub fn apply(&mut self, change: &Change) -> bool {
        match change {
            Change::InsertOne(_)
            | Change::InsertMany(_)
            | Change::UpdateOne(_)
            | Change::UpdateMany(_) => {
                let mut changed = false;
                for document in change.documents() {
                    changed |= self.upsert(document);
                }
                changed
            }
            Change::Remove(removed) => {
                let mut changed = false;
                for document in removed {
                    changed |= self.documents.shift_remove(&document.id).is_some();
                }
                changed
            }
            Change::Flush => {
                let changed = !self.documents.is_empty();
                self.documents.clear();
                changed
            }
        }
    }

    fn upsert(&mut self, document: &Document) -> bool {
        let matches = self.criteria.matches(document);
        let present = self.documents.contains_key(&document.id);
        match (present, matches) {
            (true, true) => {
                let previous = self
                    .documents
                    .insert(document.id.clone(), document.clone());
                previous.as_ref() != Some(document)
            }
            (true, false) => {
                self.documents.shift_remove(&document.id);
                true
            }
            (false, true) => {
                self.documents.insert(document.id.clone(), document.clone());
                true
            }
            (false, false) => false,
        }
    }
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

    fn open_state() -> QueryState {
        QueryState::new(Criteria::parse(json!({"status": "open"})).unwrap())
    }

    #[test]
    fn test_insert_relevance() {
        let mut state = open_state();
        assert!(state.apply(&Change::InsertOne(doc("1", json!({"status": "open"})))));
        assert!(!state.apply(&Change::InsertOne(doc("2", json!({"status": "closed"})))));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_update_out_of_criteria_removes() {
        let mut state = open_state();
        state.apply(&Change::InsertOne(doc("1", json!({"status": "open"}))));

        assert!(state.apply(&Change::UpdateOne(doc("1", json!({"status": "closed"})))));
        assert!(state.is_empty());
    }

    #[test]
    fn test_unrelated_update_is_not_relevant() {
        let mut state = open_state();
        state.apply(&Change::InsertOne(doc("1", json!({"status": "open"}))));

        // A non-matching document changing stays irrelevant.
        assert!(!state.apply(&Change::UpdateOne(doc("2", json!({"status": "closed", "n": 1})))));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_identical_member_update_is_not_relevant() {
        let mut state = open_state();
        let member = doc("1", json!({"status": "open"}));
        state.apply(&Change::InsertOne(member.clone()));
        assert!(!state.apply(&Change::UpdateOne(member)));
    }

    #[test]
    fn test_remove_member() {
        let mut state = open_state();
        let member = doc("1", json!({"status": "open"}));
        state.apply(&Change::InsertOne(member.clone()));

        assert!(state.apply(&Change::Remove(vec![member])));
        assert!(!state.apply(&Change::Remove(vec![doc("2", json!({}))])));
    }
}
