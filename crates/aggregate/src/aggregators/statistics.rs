use std::collections::{BTreeMap, HashMap};

use archivist_core::Record;
use serde_json::json;

use super::top_counts;
use crate::aggregator::{Aggregator, AggregatorKind, Snapshot};
use crate::error::AggregateError;

const TOP_SIZE: usize = 20;

/// Running counts over every collected record. `total` is the archive's
/// authoritative record count.
#[derive(Default)]
pub struct StatisticsAggregator {
    total: u64,
    reshares: u64,
    geotagged: u64,
    /// `YYYY-MM-DDTHH:00:00Z` -> count
    per_hour: BTreeMap<String, u64>,
    languages: HashMap<String, u64>,
    authors: HashMap<String, u64>,
    hashtags: HashMap<String, u64>,
    first_seen: Option<String>,
    last_seen: Option<String>,
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// `created_at` of the most recently collected record, as delivered.
    pub fn last_seen(&self) -> Option<&str> {
        self.last_seen.as_deref()
    }
}

fn bump(map: &mut HashMap<String, u64>, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}

impl Aggregator for StatisticsAggregator {
    fn kind(&self) -> AggregatorKind {
        AggregatorKind::Statistics
    }

    fn collect(&mut self, record: &Record) -> Result<(), AggregateError> {
        self.total += 1;

        if record.is_reshare() {
            self.reshares += 1;
        }
        if record.coordinates().is_some() {
            self.geotagged += 1;
        }
        if let Some(created) = record.created_at() {
            let bucket = created.format("%Y-%m-%dT%H:00:00Z").to_string();
            *self.per_hour.entry(bucket).or_insert(0) += 1;
        }
        if let Some(raw) = record.created_at_raw() {
            if self.first_seen.is_none() {
                self.first_seen = Some(raw.to_string());
            }
            self.last_seen = Some(raw.to_string());
        }
        if let Some(lang) = record.language() {
            bump(&mut self.languages, lang);
        }
        if let Some(author) = record.author() {
            bump(&mut self.authors, author);
        }
        for tag in record.hashtags() {
            bump(&mut self.hashtags, &tag.to_lowercase());
        }
        Ok(())
    }

    fn generate(&mut self) -> Result<Snapshot, AggregateError> {
        Ok(Snapshot::Value(json!({
            "total": self.total,
            "reshares": self.reshares,
            "geotagged": self.geotagged,
            "first_seen": self.first_seen,
            "last_seen": self.last_seen,
            "per_hour": self.per_hour,
            "languages": top_counts(&self.languages, TOP_SIZE, "language"),
            "authors": top_counts(&self.authors, TOP_SIZE, "author"),
            "hashtags": top_counts(&self.hashtags, TOP_SIZE, "hashtag"),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn test_counts_and_buckets() {
        let mut stats = StatisticsAggregator::new();
        stats
            .collect(&record(json!({
                "text": "one #Rust",
                "lang": "en",
                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                "user": { "screen_name": "ferris" },
                "entities": { "hashtags": [{ "text": "Rust" }] }
            })))
            .unwrap();
        stats
            .collect(&record(json!({
                "text": "RT two",
                "lang": "en",
                "created_at": "Wed Oct 10 20:45:00 +0000 2018",
                "retweeted_status": { "text": "two" },
                "user": { "screen_name": "ferris" }
            })))
            .unwrap();
        stats.collect(&record(json!({ "text": "bare" }))).unwrap();

        assert_eq!(stats.total(), 3);
        assert_eq!(stats.last_seen(), Some("Wed Oct 10 20:45:00 +0000 2018"));

        let value = stats.generate().unwrap().into_value().unwrap();
        assert_eq!(value["total"], 3);
        assert_eq!(value["reshares"], 1);
        assert_eq!(value["per_hour"]["2018-10-10T20:00:00Z"], 2);
        assert_eq!(value["languages"][0]["language"], "en");
        assert_eq!(value["languages"][0]["count"], 2);
        assert_eq!(value["authors"][0]["author"], "ferris");
        assert_eq!(value["hashtags"][0]["hashtag"], "rust");
    }

    #[test]
    fn test_generate_keeps_state() {
        let mut stats = StatisticsAggregator::new();
        stats.collect(&record(json!({ "text": "a" }))).unwrap();
        stats.generate().unwrap();
        stats.collect(&record(json!({ "text": "b" }))).unwrap();
        assert_eq!(stats.total(), 2);
    }
}
