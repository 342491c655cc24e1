use std::collections::{BTreeSet, HashMap};

use archivist_core::Record;
use serde_json::json;

use crate::aggregator::{Aggregator, AggregatorKind, Snapshot};
use crate::error::AggregateError;

/// In-memory inverted index from lowercased terms to record ids.
#[derive(Default)]
pub struct SearchAggregator {
    index: HashMap<String, BTreeSet<String>>,
    documents: u64,
}

impl SearchAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of records containing `term`, in id order.
    pub fn lookup(&self, term: &str) -> Vec<&str> {
        self.index
            .get(&term.to_lowercase())
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn documents(&self) -> u64 {
        self.documents
    }
}

impl Aggregator for SearchAggregator {
    fn kind(&self) -> AggregatorKind {
        AggregatorKind::Search
    }

    fn collect(&mut self, record: &Record) -> Result<(), AggregateError> {
        // Records without an id cannot be referenced from the index.
        let Some(id) = record.id() else { return Ok(()) };
        self.documents += 1;

        for token in record.text().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            self.index
                .entry(token.to_lowercase())
                .or_default()
                .insert(id.to_string());
        }
        Ok(())
    }

    fn generate(&mut self) -> Result<Snapshot, AggregateError> {
        Ok(Snapshot::Value(json!({
            "documents": self.documents,
            "terms": self.index.len(),
        })))
    }
}
