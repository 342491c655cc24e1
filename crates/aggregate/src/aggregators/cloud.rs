use std::collections::{HashMap, HashSet};

use archivist_core::{Archive, Record};
use serde_json::json;

use super::top_counts;
use crate::aggregator::{Aggregator, AggregatorKind, Snapshot};
use crate::error::AggregateError;

const CLOUD_SIZE: usize = 100;
const MIN_WORD_LEN: usize = 3;

const STOPWORDS: &[&str] = &[
    "about", "after", "all", "also", "and", "any", "are", "because", "been", "but", "can",
    "could", "did", "does", "for", "from", "get", "got", "had", "has", "have", "her", "here",
    "him", "his", "how", "into", "its", "just", "like", "more", "not", "now", "off", "one",
    "only", "our", "out", "over", "she", "should", "some", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "too", "was", "were", "what", "when",
    "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

/// Word frequencies across record text, excluding the archive's own terms.
pub struct CloudAggregator {
    counts: HashMap<String, u64>,
    ignored: HashSet<String>,
}

impl CloudAggregator {
    pub fn new(archive: &Archive) -> Self {
        let ignored = STOPWORDS
            .iter()
            .map(|w| w.to_string())
            .chain(archive.terms().iter().flat_map(|t| tokenize(t)))
            .collect();
        Self {
            counts: HashMap::new(),
            ignored,
        }
    }

    pub fn count(&self, word: &str) -> u64 {
        self.counts.get(word).copied().unwrap_or(0)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|w| !w.starts_with("http://") && !w.starts_with("https://"))
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '#' && c != '@')
                .to_lowercase()
        })
        .filter(|w| w.chars().count() >= MIN_WORD_LEN)
        .collect()
}

impl Aggregator for CloudAggregator {
    fn kind(&self) -> AggregatorKind {
        AggregatorKind::Cloud
    }

    fn collect(&mut self, record: &Record) -> Result<(), AggregateError> {
        for word in tokenize(record.text()) {
            if !self.ignored.contains(&word) {
                *self.counts.entry(word).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    fn generate(&mut self) -> Result<Snapshot, AggregateError> {
        Ok(Snapshot::Value(json!({
            "words": top_counts(&self.counts, CLOUD_SIZE, "word"),
            "distinct": self.counts.len(),
        })))
    }
}
