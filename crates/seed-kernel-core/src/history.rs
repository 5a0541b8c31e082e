//! Version-history seam used by recovery.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("version history unavailable: {0}")]
    Unavailable(String),
    #[error("revision {0} not found")]
    NotFound(String),
    #[error("version history timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid revision id `{0}`")]
    InvalidRevision(String),
    #[error("version history backend failed: {0}")]
    Backend(String),
    #[error("version history I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub message: String,
}

/// Narrow view of a version-control or snapshot backend.
pub trait VersionHistory: Send + Sync {
    /// Revisions touching `path`, newest first, at most `limit`.
    ///
    /// # Errors
    /// Returns an error when the backend cannot be queried.
    fn list_revisions(&self, path: &Path, limit: usize) -> Result<Vec<Revision>, HistoryError>;

    /// # Errors
    /// Returns an error when the revision or the file in it cannot be read.
    fn read_revision_content(&self, path: &Path, id: &str) -> Result<String, HistoryError>;

    /// Record the current content of `path`, returning the new revision id.
    ///
    /// # Errors
    /// Returns an error when the backend rejects the commit.
    fn commit(&self, path: &Path, message: &str) -> Result<String, HistoryError>;

    /// Human-readable change of `path` introduced by revision `id`.
    ///
    /// # Errors
    /// Returns [`HistoryError::Unavailable`] for backends without patches, or
    /// an error when the revision cannot be read.
    fn revision_patch(&self, path: &Path, id: &str) -> Result<String, HistoryError> {
        let _ = (path, id);
        Err(HistoryError::Unavailable(
            "revision patches are not supported by this backend".to_string(),
        ))
    }
}

#[derive(Debug, Clone)]
struct StoredRevision {
    revision: Revision,
    content: String,
}

/// History kept in process memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    revisions: Mutex<BTreeMap<PathBuf, Vec<StoredRevision>>>,
}

impl InMemoryHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `content` as the newest revision of `path` without touching disk.
    pub fn record(&self, path: &Path, content: &str, message: &str) -> String {
        let id = Ulid::new().to_string();
        let stored = StoredRevision {
            revision: Revision {
                id: id.clone(),
                timestamp: OffsetDateTime::now_utc(),
                message: message.to_string(),
            },
            content: content.to_string(),
        };
        self.revisions
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .push(stored);
        id
    }

    #[must_use]
    pub fn revision_count(&self, path: &Path) -> usize {
        self.revisions.lock().get(path).map_or(0, Vec::len)
    }
}

impl VersionHistory for InMemoryHistory {
    fn list_revisions(&self, path: &Path, limit: usize) -> Result<Vec<Revision>, HistoryError> {
        let revisions = self.revisions.lock();
        Ok(revisions
            .get(path)
            .map(|stored| {
                stored
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|entry| entry.revision.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn read_revision_content(&self, path: &Path, id: &str) -> Result<String, HistoryError> {
        self.revisions
            .lock()
            .get(path)
            .and_then(|stored| stored.iter().find(|entry| entry.revision.id == id))
            .map(|entry| entry.content.clone())
            .ok_or_else(|| HistoryError::NotFound(id.to_string()))
    }

    fn commit(&self, path: &Path, message: &str) -> Result<String, HistoryError> {
        let content = std::fs::read_to_string(path)?;
        Ok(self.record(path, &content, message))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::*;

    // Test IDs: THIS-001
    #[test]
    fn revisions_are_listed_newest_first_and_limited() -> Result<()> {
        let history = InMemoryHistory::new();
        let path = Path::new("SEED.md");
        let first = history.record(path, "one", "first");
        let second = history.record(path, "two", "second");
        let third = history.record(path, "three", "third");

        let listed = history.list_revisions(path, 2)?;
        let ids = listed.iter().map(|revision| revision.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids, vec![third, second]);
        assert_eq!(history.read_revision_content(path, &first)?, "one");
        assert!(history.list_revisions(Path::new("other.md"), 5)?.is_empty());
        Ok(())
    }

    // Test IDs: THIS-002
    #[test]
    fn commit_reads_current_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("SEED.md");
        std::fs::write(&path, "live")?;
        let history = InMemoryHistory::new();
        let id = history.commit(&path, "snapshot")?;
        assert_eq!(history.read_revision_content(&path, &id)?, "live");
        assert!(matches!(
            history.read_revision_content(&path, "missing"),
            Err(HistoryError::NotFound(_))
        ));
        assert!(matches!(
            history.revision_patch(&path, &id),
            Err(HistoryError::Unavailable(_))
        ));
        Ok(())
    }
}
