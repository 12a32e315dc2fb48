//! Filesystem map storage
//!
//! One file per entry, named by the BLAKE3 hash of the encoded key so that arbitrary
//! keys map to safe, fixed-length file names. Each file holds the encoded key and value
//! so the table can be rebuilt from a directory listing. Writes go to a temporary file
//! first and are renamed into place, so a crash never leaves a half-written entry.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use strand_core::effects::MapStorageEffects;
use strand_core::serialization::{decode, encode};
use strand_core::{Result, StrandError};
use tracing::{info, warn};

const ENTRY_EXTENSION: &str = "dat";
const TEMP_EXTENSION: &str = "tmp";

/// Map storage rooted at one directory
#[derive(Debug, Clone)]
pub struct FilesystemMapStorage {
    base_path: PathBuf,
}

impl FilesystemMapStorage {
    /// Open storage in `base_path`, creating the directory if needed
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).map_err(|e| {
            StrandError::storage(format!(
                "Failed to create storage directory {}: {e}",
                base_path.display()
            ))
        })?;
        info!(path = %base_path.display(), "Opened map storage");
        Ok(Self { base_path })
    }

    /// Directory holding the entries
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_to_path(&self, key: &[u8]) -> PathBuf {
        let hash = blake3::hash(key);
        self.base_path.join(format!("{}.{ENTRY_EXTENSION}", hash.to_hex()))
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = path.with_extension(TEMP_EXTENSION);
        fs::write(&temp_path, data)
            .map_err(|e| StrandError::storage(format!("Failed to write temp file: {e}")))?;
        fs::rename(&temp_path, path)
            .map_err(|e| StrandError::storage(format!("Failed to rename temp file: {e}")))
    }
}

impl MapStorageEffects for FilesystemMapStorage {
    fn load(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let dir = fs::read_dir(&self.base_path)
            .map_err(|e| StrandError::storage(format!("Failed to list storage directory: {e}")))?;

        let mut entries = Vec::new();
        for item in dir {
            let path = item
                .map_err(|e| StrandError::storage(format!("Failed to list storage directory: {e}")))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let bytes = fs::read(&path)
                .map_err(|e| StrandError::storage(format!("Failed to read {}: {e}", path.display())))?;
            match decode::<(Vec<u8>, Vec<u8>)>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable map entry");
                }
            }
        }
        Ok(entries)
    }

    fn store(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let data = encode(&(key, value))?;
        self.write_atomic(&self.key_to_path(key), &data)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        match fs::remove_file(self.key_to_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StrandError::storage(format!("Failed to delete entry: {err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_entries_survive_reopening() {
        let dir = TempDir::new().unwrap();
        let storage = FilesystemMapStorage::new(dir.path()).unwrap();
        storage.store(b"alpha", b"1").unwrap();
        storage.store(b"beta", b"2").unwrap();
        storage.store(b"alpha", b"3").unwrap();
        storage.delete(b"beta").unwrap();

        let reopened = FilesystemMapStorage::new(dir.path()).unwrap();
        assert_eq!(reopened.load().unwrap(), vec![(b"alpha".to_vec(), b"3".to_vec())]);
    }

    #[test]
    fn test_deleting_missing_entry_succeeds() {
        let dir = TempDir::new().unwrap();
        let storage = FilesystemMapStorage::new(dir.path()).unwrap();
        storage.delete(b"never-stored").unwrap();
    }

    #[test]
    fn test_stray_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let storage = FilesystemMapStorage::new(dir.path()).unwrap();
        storage.store(b"key", b"value").unwrap();
        fs::write(dir.path().join("leftover.tmp"), b"partial").unwrap();
        fs::write(dir.path().join("corrupt.dat"), b"\x01").unwrap();

        assert_eq!(storage.load().unwrap(), vec![(b"key".to_vec(), b"value".to_vec())]);
    }
}
