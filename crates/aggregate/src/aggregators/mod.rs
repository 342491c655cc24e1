mod cloud;
mod images;
mod map;
mod raw;
mod search;
mod statistics;

pub use cloud::CloudAggregator;
pub use images::ImagesAggregator;
pub use map::MapAggregator;
pub use raw::RawAggregator;
pub use search::SearchAggregator;
pub use statistics::StatisticsAggregator;

use serde_json::{json, Value};

/// Sort `(key, count)` pairs by count descending then key, keep the first `limit`.
pub(crate) fn top_counts<'a, I>(counts: I, limit: usize, key_name: &str) -> Value
where
    I: IntoIterator<Item = (&'a String, &'a u64)>,
{
    let mut ranked: Vec<(&String, &u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    Value::Array(
        ranked
            .into_iter()
            .take(limit)
            .map(|(key, count)| json!({ key_name: key, "count": count }))
            .collect(),
    )
}
