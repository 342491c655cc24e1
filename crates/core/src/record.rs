//! Ingested records.
//!
//! A [`Record`] is one JSON object delivered by the upstream provider. The
//! provider's schema is not owned by this crate, so accessors are lenient and
//! return `None`/empty when a field is absent or has an unexpected shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecordError;

/// Timestamp format used by the upstream provider (`Wed Oct 10 20:19:24 +0000 2018`).
const PROVIDER_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// One parsed upstream record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Value);

impl Record {
    /// Parse a serialized record. Anything other than a JSON object is malformed.
    pub fn parse(raw: &str) -> Result<Self, RecordError> {
        let value: Value = serde_json::from_str(raw.trim())?;
        Self::from_value(value)
    }

    /// Parse a record straight from log bytes. Bytes that are not valid UTF-8
    /// make the record malformed, like any other JSON error.
    pub fn from_slice(raw: &[u8]) -> Result<Self, RecordError> {
        let value: Value = serde_json::from_slice(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(RecordError::NotAnObject)
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Provider-assigned identifier.
    pub fn id(&self) -> Option<&str> {
        self.0.get("id_str").and_then(Value::as_str)
    }

    /// Body text. Extended payloads carry the untruncated text separately.
    pub fn text(&self) -> &str {
        self.0
            .pointer("/extended_tweet/full_text")
            .or_else(|| self.0.get("full_text"))
            .or_else(|| self.0.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Raw `created_at` string as delivered.
    pub fn created_at_raw(&self) -> Option<&str> {
        self.0.get("created_at").and_then(Value::as_str)
    }

    /// `created_at` parsed as a UTC timestamp (provider format or RFC 3339).
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.created_at_raw()?;
        DateTime::parse_from_str(raw, PROVIDER_TIME_FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn language(&self) -> Option<&str> {
        self.0.get("lang").and_then(Value::as_str)
    }

    pub fn author(&self) -> Option<&str> {
        self.0.pointer("/user/screen_name").and_then(Value::as_str)
    }

    /// Whether this record re-shares another record.
    pub fn is_reshare(&self) -> bool {
        self.0.get("retweeted_status").is_some_and(Value::is_object)
    }

    /// Hashtags without the leading `#`.
    pub fn hashtags(&self) -> Vec<&str> {
        self.entity_field("hashtags", "text")
    }

    /// Media URLs attached to the record.
    pub fn media_urls(&self) -> Vec<&str> {
        self.entity_field("media", "media_url_https")
    }

    /// `(longitude, latitude)` when the record is geotagged.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let pair = self.0.pointer("/coordinates/coordinates")?.as_array()?;
        match pair.as_slice() {
            [lon, lat] => Some((lon.as_f64()?, lat.as_f64()?)),
            _ => None,
        }
    }

    fn entity_field(&self, entity: &str, field: &str) -> Vec<&str> {
        let extended = self
            .0
            .pointer(&format!("/extended_entities/{entity}"))
            .and_then(Value::as_array);
        let basic = self
            .0
            .pointer(&format!("/entities/{entity}"))
            .and_then(Value::as_array);

        extended
            .or(basic)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(field).and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }
}
