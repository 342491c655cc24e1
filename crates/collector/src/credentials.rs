//! Per-owner upstream credentials.

use std::collections::BTreeMap;
use std::path::PathBuf;

use archivist_core::OwnerId;
use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Access token pair an owner granted the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerCredentials {
    pub access_token: String,
    pub access_secret: String,
}

pub trait CredentialSource: Send + Sync {
    fn credentials(&self, owner: &OwnerId) -> Result<OwnerCredentials, StreamError>;
}

/// Reads `{DATA_DIR}/credentials.json` (`{"owner": {"access_token": .., "access_secret": ..}}`).
///
/// The file is re-read on every lookup so rotated tokens apply on the next reconnect.
pub struct JsonFileCredentials {
    path: PathBuf,
}

impl JsonFileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialSource for JsonFileCredentials {
    fn credentials(&self, owner: &OwnerId) -> Result<OwnerCredentials, StreamError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StreamError::MissingCredentials(owner.clone()))
            }
            Err(e) => {
                return Err(StreamError::Credentials(format!(
                    "{}: {e}",
                    self.path.display()
                )))
            }
        };
        let mut all: BTreeMap<String, OwnerCredentials> = serde_json::from_str(&raw)
            .map_err(|e| StreamError::Credentials(format!("{}: {e}", self.path.display())))?;
        all.remove(owner.as_str())
            .ok_or_else(|| StreamError::MissingCredentials(owner.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(
            &path,
            r#"{"alice": {"access_token": "t-1", "access_secret": "s-1"}}"#,
        )
        .unwrap();

        let source = JsonFileCredentials::new(&path);
        let creds = source.credentials(&OwnerId::new("alice")).unwrap();
        assert_eq!(creds.access_token, "t-1");

        let missing = source.credentials(&OwnerId::new("bob")).unwrap_err();
        assert!(matches!(missing, StreamError::MissingCredentials(_)));
    }

    #[test]
    fn test_missing_file_is_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonFileCredentials::new(dir.path().join("nope.json"));
        assert!(matches!(
            source.credentials(&OwnerId::new("alice")),
            Err(StreamError::MissingCredentials(_))
        ));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonFileCredentials::new(&path).credentials(&OwnerId::new("alice")),
            Err(StreamError::Credentials(_))
        ));
    }
}
