use std::collections::HashMap;

use archivist_core::Record;
use serde_json::json;

use super::top_counts;
use crate::aggregator::{Aggregator, AggregatorKind, Snapshot};
use crate::error::AggregateError;

const IMAGES_SIZE: usize = 50;

/// Most shared media URLs.
#[derive(Default)]
pub struct ImagesAggregator {
    counts: HashMap<String, u64>,
}

impl ImagesAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregator for ImagesAggregator {
    fn kind(&self) -> AggregatorKind {
        AggregatorKind::Images
    }

    fn collect(&mut self, record: &Record) -> Result<(), AggregateError> {
        for url in record.media_urls() {
            *self.counts.entry(url.to_string()).or_insert(0) += 1;
        }
        Ok(())
    }

    fn generate(&mut self) -> Result<Snapshot, AggregateError> {
        Ok(Snapshot::Value(json!({
            "images": top_counts(&self.counts, IMAGES_SIZE, "url"),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_media_urls() {
        let mut images = ImagesAggregator::new();
        let with_media = Record::from_value(json!({
            "text": "look",
            "entities": { "media": [{ "media_url_https": "https://img/a.jpg" }] }
        }))
        .unwrap();
        let without = Record::from_value(json!({ "text": "nothing" })).unwrap();

        images.collect(&with_media).unwrap();
        images.collect(&with_media).unwrap();
        images.collect(&without).unwrap();

        let value = images.generate().unwrap().into_value().unwrap();
        assert_eq!(value["images"][0]["url"], "https://img/a.jpg");
        assert_eq!(value["images"][0]["count"], 2);
        assert_eq!(value["images"].as_array().unwrap().len(), 1);
    }
}
