use std::fs::Metadata;
use std::path::Path;
use std::sync::OnceLock;
use std::time::UNIX_EPOCH;

use crate::error::CacheError;

/// Cheap proxy for file contents: modification time plus byte size.
///
/// Two reads of a file that was rewritten with identical size inside the filesystem's mtime
/// resolution produce the same fingerprint. Callers that need exact content identity should
/// hash the bytes instead (see [`uisync_core::content_hash`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub mtime_nanos: u128,
    pub size: u64,
}

impl Fingerprint {
    pub fn new(mtime_nanos: u128, size: u64) -> Self {
        Self { mtime_nanos, size }
    }

    pub fn from_metadata(path: &Path, meta: &Metadata) -> Self {
        let mtime_nanos = match meta.modified() {
            Ok(time) => match time.duration_since(UNIX_EPOCH) {
                Ok(dur) => dur.as_nanos(),
                Err(err) => {
                    static REPORTED_MTIME_BEFORE_EPOCH: OnceLock<()> = OnceLock::new();
                    if REPORTED_MTIME_BEFORE_EPOCH.set(()).is_ok() {
                        tracing::debug!(
                            target = "uisync.cache",
                            path = %path.display(),
                            error = ?err,
                            "file mtime is before UNIX_EPOCH; using 0 for fingerprint"
                        );
                    }
                    0
                }
            },
            Err(err) => {
                static REPORTED_MTIME_ERROR: OnceLock<()> = OnceLock::new();
                if REPORTED_MTIME_ERROR.set(()).is_ok() {
                    tracing::debug!(
                        target = "uisync.cache",
                        path = %path.display(),
                        error = %err,
                        "failed to read file mtime; using 0 for fingerprint"
                    );
                }
                0
            }
        };

        Self {
            mtime_nanos,
            size: meta.len(),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path)?;
        Ok(Self::from_metadata(path, &meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_change_changes_fingerprint() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("Button.tsx");
        std::fs::write(&path, "a").unwrap();
        let first = Fingerprint::from_path(&path).unwrap();
        std::fs::write(&path, "abc").unwrap();
        let second = Fingerprint::from_path(&path).unwrap();
        assert_eq!(first.size, 1);
        assert_eq!(second.size, 3);
        assert_ne!(first, second);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Fingerprint::from_path(tmp.path().join("missing")).unwrap_err();
        assert!(matches!(err, CacheError::Io(_)));
    }
}
