//! Credential store implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::credentials::Credentials;

/// Errors from a credential store.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Failed to read credentials file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse credentials file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Source of per-user OAuth credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the current credentials for a user, or `None` if there is no
    /// record.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError` if the backend could not be read.
    async fn credentials_for(&self, user: &str) -> Result<Option<Credentials>, CredentialError>;
}

/// In-memory store, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: RwLock<HashMap<String, Credentials>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for a user.
    pub async fn insert(&self, user: impl Into<String>, credentials: Credentials) {
        self.records.write().await.insert(user.into(), credentials);
    }

    /// Remove the record for a user.
    pub async fn remove(&self, user: &str) -> Option<Credentials> {
        self.records.write().await.remove(user)
    }
}

impl<S: Into<String>> FromIterator<(S, Credentials)> for MemoryCredentialStore {
    fn from_iter<I: IntoIterator<Item = (S, Credentials)>>(iter: I) -> Self {
        Self {
            records: RwLock::new(iter.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn credentials_for(&self, user: &str) -> Result<Option<Credentials>, CredentialError> {
        Ok(self.records.read().await.get(user).cloned())
    }
}

/// On-disk layout of [`FileCredentialStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CredentialFile {
    #[serde(default)]
    pub users: HashMap<String, Credentials>,
}

/// TOML file with one `[users.<id>]` table per user.
///
/// The file is re-read on every lookup so tokens refreshed by another process
/// are picked up on the next worker start.
///
/// ```toml
/// [users.alice]
/// access_token = "ya29..."
/// refresh_token = "1//0g..."
/// expires_at = "2026-01-01T00:00:00Z"
/// ```
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<CredentialFile, CredentialError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No credentials file");
                return Ok(CredentialFile::default());
            }
            Err(e) => {
                return Err(CredentialError::ReadError {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        toml::from_str(&content).map_err(|e| CredentialError::ParseError {
            path: self.path.clone(),
            source: e,
        })
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn credentials_for(&self, user: &str) -> Result<Option<Credentials>, CredentialError> {
        let mut file = self.load().await?;
        Ok(file.users.remove(user))
    }
}
