use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uisync_core::atomic_write;

use crate::error::{Result, StorageError};

pub const CONFLICT_FILE_SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct PersistedRef<'a, T> {
    schema_version: u32,
    conflicts: &'a [T],
}

#[derive(Deserialize)]
struct Persisted<T> {
    schema_version: u32,
    conflicts: Vec<T>,
}

/// `<storage_root>/conflicts.json`: the unresolved conflict records, rewritten atomically on
/// every change.
///
/// A missing file reads as "no conflicts"; a file that exists but cannot be decoded is an error
/// so that unresolved conflicts are never silently forgotten.
#[derive(Debug, Clone)]
pub struct ConflictFile {
    path: PathBuf,
}

impl ConflictFile {
    pub fn new(storage_root: impl AsRef<Path>) -> Self {
        Self {
            path: storage_root.as_ref().join("conflicts.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let persisted: Persisted<T> =
            serde_json::from_slice(&bytes).map_err(|err| StorageError::Json {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        if persisted.schema_version != CONFLICT_FILE_SCHEMA_VERSION {
            return Err(StorageError::WrongSchema {
                expected: CONFLICT_FILE_SCHEMA_VERSION,
                found: persisted.schema_version,
            });
        }
        Ok(persisted.conflicts)
    }

    pub fn save<T: Serialize>(&self, conflicts: &[T]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&PersistedRef {
            schema_version: CONFLICT_FILE_SCHEMA_VERSION,
            conflicts,
        })
        .map_err(|err| StorageError::Json {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        atomic_write(&self.path, &bytes)?;
        Ok(())
    }
}
