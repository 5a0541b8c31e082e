//! File persistence helpers shared by the migrator, the recovery controller
//! and state files.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Replace `path` with `contents` via a synced sibling temp file and rename,
/// so readers see either the old or the new file and never a partial one.
///
/// # Errors
/// Returns an error when the temp file cannot be created, written, synced or
/// renamed over `path`. `path` is untouched in that case.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|err| StoreError::io(parent, err))?;
    temp.write_all(contents)
        .map_err(|err| StoreError::io(temp.path(), err))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| StoreError::io(path, err))?;
    temp.persist(path)
        .map_err(|err| StoreError::io(path, err.error))?;
    Ok(())
}

/// `sha256:<hex>` digest of `contents`.
#[must_use]
pub fn sha256_digest(contents: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(contents)))
}

/// Load a JSON state file, `None` when it does not exist yet.
///
/// # Errors
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::io(path, err)),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// # Errors
/// Returns an error when serialization or the atomic write fails.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut encoded = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    encoded.push(b'\n');
    write_atomic(path, &encoded)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::*;

    // Test IDs: TSTO-001
    #[test]
    fn write_atomic_replaces_content_and_creates_parents() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("SEED.md");
        write_atomic(&path, b"first")?;
        write_atomic(&path, b"second")?;
        assert_eq!(std::fs::read_to_string(&path)?, "second");

        let leftovers = std::fs::read_dir(dir.path().join("nested"))?.count();
        assert_eq!(leftovers, 1);
        Ok(())
    }

    // Test IDs: TSTO-002
    #[test]
    fn json_state_round_trip_and_missing_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("state.json");
        assert_eq!(load_json::<Vec<u32>>(&path)?, None);

        save_json(&path, &vec![1_u32, 2, 3])?;
        assert_eq!(load_json::<Vec<u32>>(&path)?, Some(vec![1, 2, 3]));

        std::fs::write(&path, "[1,")?;
        assert!(matches!(load_json::<Vec<u32>>(&path), Err(StoreError::Json { .. })));
        Ok(())
    }

    // Test IDs: TSTO-003
    #[test]
    fn digest_is_prefixed_hex() {
        assert_eq!(
            sha256_digest(b"abc"),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
