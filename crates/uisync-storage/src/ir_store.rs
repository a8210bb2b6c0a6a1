use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uisync_core::{atomic_write, now_millis, ArtifactId, ComponentIr, Side};

use crate::error::{Result, StorageError};

/// One immutable IR snapshot in an artifact's version log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrVersion {
    pub artifact_id: ArtifactId,
    /// Starts at 1 and increases by exactly one per append.
    pub version: u32,
    pub ir: ComponentIr,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    /// [`ComponentIr::checksum`] of `ir`.
    pub checksum: String,
    /// Side whose edit produced this version.
    pub origin: Side,
}

#[derive(Debug, Default)]
struct ArtifactLog {
    versions: BTreeSet<u32>,
    latest: Option<Arc<IrVersion>>,
}

/// Durable, append-only IR version log, one directory per artifact:
/// `<root>/ir/<artifact-id>/v<N>.json`.
///
/// Appends for different artifacts run concurrently; appends for one artifact are serialized by
/// a per-artifact lock, so version numbers never repeat or skip.
#[derive(Debug)]
pub struct IrStore {
    ir_dir: PathBuf,
    logs: Mutex<HashMap<ArtifactId, Arc<Mutex<ArtifactLog>>>>,
}

impl IrStore {
    /// Opens (creating if needed) the store under `storage_root` and indexes existing versions.
    pub fn open(storage_root: impl AsRef<Path>) -> Result<Self> {
        let ir_dir = storage_root.as_ref().join("ir");
        fs::create_dir_all(&ir_dir)?;

        let mut logs = HashMap::new();
        for entry in fs::read_dir(&ir_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().and_then(ArtifactId::new) else {
                tracing::debug!(
                    target = "uisync.storage",
                    path = %entry.path().display(),
                    "skipping non-artifact directory in IR store"
                );
                continue;
            };
            let versions = scan_versions(&entry.path())?;
            if versions.is_empty() {
                continue;
            }
            logs.insert(
                id,
                Arc::new(Mutex::new(ArtifactLog {
                    versions,
                    latest: None,
                })),
            );
        }

        tracing::debug!(
            target = "uisync.storage",
            dir = %ir_dir.display(),
            artifacts = logs.len(),
            "opened IR store"
        );

        Ok(Self {
            ir_dir,
            logs: Mutex::new(logs),
        })
    }

    fn log(&self, id: &ArtifactId) -> Arc<Mutex<ArtifactLog>> {
        self.logs.lock().entry(id.clone()).or_default().clone()
    }

    fn artifact_dir(&self, id: &ArtifactId) -> PathBuf {
        self.ir_dir.join(id.as_str())
    }

    fn version_path(&self, id: &ArtifactId, version: u32) -> PathBuf {
        self.artifact_dir(id).join(format!("v{version}.json"))
    }

    /// Appends `ir` as the next version of `id`, unconditionally.
    pub fn append(&self, id: &ArtifactId, ir: &ComponentIr, origin: Side) -> Result<IrVersion> {
        let log = self.log(id);
        let mut log = log.lock();
        self.append_locked(id, &mut log, ir, origin)
    }

    /// Appends `ir` only when it differs structurally from the latest stored version. The check
    /// and the append happen under the artifact's lock.
    pub fn append_if_changed(
        &self,
        id: &ArtifactId,
        ir: &ComponentIr,
        origin: Side,
    ) -> Result<Option<IrVersion>> {
        let log = self.log(id);
        let mut log = log.lock();
        let checksum = ir.checksum();
        if let Some(latest) = self.latest_locked(id, &mut log)? {
            if latest.checksum == checksum {
                return Ok(None);
            }
        }
        self.append_locked(id, &mut log, ir, origin).map(Some)
    }

    fn append_locked(
        &self,
        id: &ArtifactId,
        log: &mut ArtifactLog,
        ir: &ComponentIr,
        origin: Side,
    ) -> Result<IrVersion> {
        let version = log.versions.last().copied().unwrap_or(0) + 1;
        let record = IrVersion {
            artifact_id: id.clone(),
            version,
            ir: ir.clone(),
            timestamp: now_millis(),
            checksum: ir.checksum(),
            origin,
        };

        let path = self.version_path(id, version);
        let bytes = serde_json::to_vec_pretty(&record).map_err(|err| StorageError::Json {
            path: path.clone(),
            message: err.to_string(),
        })?;
        atomic_write(&path, &bytes)?;

        log.versions.insert(version);
        log.latest = Some(Arc::new(record.clone()));

        tracing::debug!(
            target = "uisync.storage",
            artifact = %id,
            version,
            checksum = %record.checksum,
            "appended IR version"
        );
        Ok(record)
    }

    fn latest_locked(
        &self,
        id: &ArtifactId,
        log: &mut ArtifactLog,
    ) -> Result<Option<Arc<IrVersion>>> {
        if log.latest.is_none() {
            if let Some(&version) = log.versions.last() {
                log.latest = Some(Arc::new(self.read_version(id, version)?));
            }
        }
        Ok(log.latest.clone())
    }

    fn read_version(&self, id: &ArtifactId, version: u32) -> Result<IrVersion> {
        let path = self.version_path(id, version);
        let bytes = fs::read(&path)?;
        let record: IrVersion =
            serde_json::from_slice(&bytes).map_err(|err| StorageError::Json {
                path: path.clone(),
                message: err.to_string(),
            })?;

        if record.version != version || &record.artifact_id != id {
            return Err(StorageError::Corrupt {
                path,
                message: format!(
                    "record claims {}@v{}",
                    record.artifact_id, record.version
                ),
            });
        }
        if record.ir.checksum() != record.checksum {
            return Err(StorageError::Corrupt {
                path,
                message: "checksum mismatch".to_owned(),
            });
        }
        Ok(record)
    }

    /// Returns `version` of `id`, or the latest version when `version` is `None`.
    pub fn retrieve(&self, id: &ArtifactId, version: Option<u32>) -> Result<Option<IrVersion>> {
        let log = self.log(id);
        let mut log = log.lock();
        match version {
            None => Ok(self.latest_locked(id, &mut log)?.map(|v| (*v).clone())),
            Some(version) if log.versions.contains(&version) => {
                self.read_version(id, version).map(Some)
            }
            Some(_) => Ok(None),
        }
    }

    pub fn latest_version(&self, id: &ArtifactId) -> Option<u32> {
        let log = self.log(id);
        let log = log.lock();
        log.versions.last().copied()
    }

    /// Every stored version of `id`, newest first.
    pub fn get_history(&self, id: &ArtifactId) -> Result<Vec<IrVersion>> {
        let log = self.log(id);
        let log = log.lock();
        log.versions
            .iter()
            .rev()
            .map(|&version| self.read_version(id, version))
            .collect()
    }

    /// Whether `ir` differs structurally from the latest stored version (always `true` when
    /// nothing is stored yet).
    pub fn has_changed(&self, id: &ArtifactId, ir: &ComponentIr) -> Result<bool> {
        let log = self.log(id);
        let mut log = log.lock();
        Ok(match self.latest_locked(id, &mut log)? {
            Some(latest) => latest.checksum != ir.checksum(),
            None => true,
        })
    }

    /// Removes the whole history of `id`. Returns whether anything was stored.
    pub fn delete(&self, id: &ArtifactId) -> Result<bool> {
        let log = self.log(id);
        let mut log = log.lock();
        let existed = !log.versions.is_empty();

        match fs::remove_dir_all(self.artifact_dir(id)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        log.versions.clear();
        log.latest = None;

        if existed {
            tracing::debug!(target = "uisync.storage", artifact = %id, "deleted IR history");
        }
        Ok(existed)
    }

    /// All artifacts with at least one stored version, sorted.
    pub fn list(&self) -> Vec<ArtifactId> {
        let logs: Vec<_> = self
            .logs
            .lock()
            .iter()
            .map(|(id, log)| (id.clone(), log.clone()))
            .collect();
        let mut ids: Vec<_> = logs
            .into_iter()
            .filter(|(_, log)| !log.lock().versions.is_empty())
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids
    }
}

fn scan_versions(dir: &Path) -> Result<BTreeSet<u32>> {
    let mut versions = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(version) = name
            .to_str()
            .and_then(|name| name.strip_prefix('v'))
            .and_then(|name| name.strip_suffix(".json"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        if version > 0 {
            versions.insert(version);
        }
    }
    Ok(versions)
}
