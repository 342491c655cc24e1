//! Parse queue message bodies into [`Record`]s.

use archivist_core::Record;

use crate::consumer::QueueMessage;
use crate::error::QueueError;

/// Parse a single queue message body into a [`Record`].
///
/// Only rejects bodies that are not valid JSON or not a JSON object.
pub fn parse_message(msg: &QueueMessage) -> Result<Record, QueueError> {
    Record::parse(&msg.body)
        .map_err(|e| QueueError::Parse(format!("message {}: {}", msg.id, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_msg(id: &str, body: &str) -> QueueMessage {
        QueueMessage {
            id: id.to_string(),
            body: body.to_string(),
            receipt_handle: "handle-test".to_string(),
            timestamp: Utc::now(),
            attempt_count: 1,
        }
    }

    #[test]
    fn test_parse_record() {
        let msg = make_msg("msg-1", r#"{"id_str":"9","text":"hello #rust","lang":"en"}"#);
        let record = parse_message(&msg).unwrap();
        assert_eq!(record.id(), Some("9"));
        assert_eq!(record.language(), Some("en"));
    }

    #[test]
    fn test_parse_invalid_json() {
        let msg = make_msg("msg-bad-json", "not json at all");
        let err = parse_message(&msg).unwrap_err();

        assert!(matches!(err, QueueError::Parse(_)));
        assert!(err.to_string().contains("msg-bad-json"));
    }

    #[test]
    fn test_parse_non_object() {
        let msg = make_msg("msg-array", "[1, 2]");
        assert!(matches!(parse_message(&msg), Err(QueueError::Parse(_))));
    }
}
