use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uisync_core::{now_millis, ArtifactId, Side};
use uisync_storage::{ConflictFile, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Keep side A and overwrite side B.
    UseA,
    /// Keep side B and overwrite side A.
    UseB,
    /// Clear the record without touching either side.
    Skip,
}

impl Resolution {
    pub fn winner(self) -> Option<Side> {
        match self {
            Resolution::UseA => Some(Side::A),
            Resolution::UseB => Some(Side::B),
            Resolution::Skip => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictReason {
    /// Both sides changed within the conflict window.
    ConcurrentEdits,
    /// Both sides produced IR versions that never reached the other side.
    DivergedVersions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub artifact_id: ArtifactId,
    pub side_a_timestamp: u64,
    pub side_b_timestamp: u64,
    pub window_ms: u64,
    pub detected_at: u64,
    pub reason: ConflictReason,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Default)]
struct ArtifactSeen {
    /// Last unsynced change timestamp per side, indexed by [`side_index`].
    last_change: [Option<u64>; 2],
    /// Whether the side has stored a version the other side has not received.
    unpropagated: [bool; 2],
}

fn side_index(side: Side) -> usize {
    match side {
        Side::A => 0,
        Side::B => 1,
    }
}

/// Flags artifacts that were edited independently on both sides.
///
/// Unresolved records are persisted to `conflicts.json` on every change. The detector is inert
/// while disabled (single-authority modes): it neither tracks timestamps nor raises records.
#[derive(Debug)]
pub struct ConflictDetector {
    window_ms: u64,
    enabled: bool,
    file: ConflictFile,
    seen: HashMap<ArtifactId, ArtifactSeen>,
    unresolved: IndexMap<ArtifactId, ConflictRecord>,
    archived: Vec<ConflictRecord>,
}

impl ConflictDetector {
    /// Loads previously unresolved records from `file`. A corrupt file is an error.
    pub fn open(file: ConflictFile, window_ms: u64, enabled: bool) -> Result<Self, StorageError> {
        let records: Vec<ConflictRecord> = file.load()?;
        let unresolved: IndexMap<_, _> = records
            .into_iter()
            .filter(|record| !record.resolved)
            .map(|record| (record.artifact_id.clone(), record))
            .collect();
        if !unresolved.is_empty() {
            tracing::info!(
                target = "uisync.sync",
                count = unresolved.len(),
                path = %file.path().display(),
                "loaded unresolved conflicts"
            );
        }
        Ok(Self {
            window_ms,
            enabled,
            file,
            seen: HashMap::new(),
            unresolved,
            archived: Vec::new(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Records a change on `side` at `timestamp` (ms) and returns a new record if it conflicts
    /// with an unsynced change on the other side.
    pub fn record_change(
        &mut self,
        id: &ArtifactId,
        side: Side,
        timestamp: u64,
    ) -> Option<ConflictRecord> {
        if !self.enabled {
            return None;
        }
        let seen = self.seen.entry(id.clone()).or_default();
        seen.last_change[side_index(side)] = Some(timestamp);
        let other = seen.last_change[side_index(side.opposite())]?;
        if timestamp.abs_diff(other) > self.window_ms {
            return None;
        }

        let (a, b) = match side {
            Side::A => (timestamp, other),
            Side::B => (other, timestamp),
        };
        self.raise(id, a, b, ConflictReason::ConcurrentEdits)
    }

    /// Notes that `side`'s latest change for `id` reached the other side.
    pub fn mark_synced(&mut self, id: &ArtifactId, side: Side) {
        if let Some(seen) = self.seen.get_mut(id) {
            seen.last_change[side_index(side)] = None;
        }
    }

    /// Records that `side` stored `id`'s IR as a new version. When the version was not
    /// propagated and the other side also holds an unpropagated version, the two have
    /// diverged.
    pub fn record_version(
        &mut self,
        id: &ArtifactId,
        side: Side,
        propagated: bool,
    ) -> Option<ConflictRecord> {
        if !self.enabled {
            return None;
        }
        let seen = self.seen.entry(id.clone()).or_default();
        if propagated {
            seen.unpropagated = [false, false];
            return None;
        }
        seen.unpropagated[side_index(side)] = true;
        if !seen.unpropagated.iter().all(|flag| *flag) {
            return None;
        }
        let a = seen.last_change[0].unwrap_or(0);
        let b = seen.last_change[1].unwrap_or(0);
        self.raise(id, a, b, ConflictReason::DivergedVersions)
    }

    /// Raises a [`ConflictReason::DivergedVersions`] record for an artifact whose two sides
    /// already disagree before either has been synced.
    pub fn flag_divergence(
        &mut self,
        id: &ArtifactId,
        side_a_timestamp: u64,
        side_b_timestamp: u64,
    ) -> Option<ConflictRecord> {
        if !self.enabled {
            return None;
        }
        self.raise(
            id,
            side_a_timestamp,
            side_b_timestamp,
            ConflictReason::DivergedVersions,
        )
    }

    fn raise(
        &mut self,
        id: &ArtifactId,
        side_a_timestamp: u64,
        side_b_timestamp: u64,
        reason: ConflictReason,
    ) -> Option<ConflictRecord> {
        if let Some(existing) = self.unresolved.get_mut(id) {
            existing.side_a_timestamp = side_a_timestamp;
            existing.side_b_timestamp = side_b_timestamp;
            self.persist();
            return None;
        }

        let record = ConflictRecord {
            artifact_id: id.clone(),
            side_a_timestamp,
            side_b_timestamp,
            window_ms: self.window_ms,
            detected_at: now_millis(),
            reason,
            resolved: false,
            resolution: None,
        };
        tracing::info!(
            target = "uisync.sync",
            artifact = %id,
            reason = ?reason,
            side_a_timestamp,
            side_b_timestamp,
            window_ms = self.window_ms,
            "conflict detected"
        );
        self.unresolved.insert(id.clone(), record.clone());
        self.persist();
        Some(record)
    }

    pub fn is_conflicted(&self, id: &ArtifactId) -> bool {
        self.unresolved.contains_key(id)
    }

    pub fn get_conflicts(&self) -> Vec<ConflictRecord> {
        self.unresolved.values().cloned().collect()
    }

    pub fn resolved(&self) -> &[ConflictRecord] {
        &self.archived
    }

    /// Marks `id`'s conflict resolved, archives it and forgets the tracked timestamps.
    pub fn resolve(&mut self, id: &ArtifactId, resolution: Resolution) -> Option<ConflictRecord> {
        let mut record = self.unresolved.shift_remove(id)?;
        record.resolved = true;
        record.resolution = Some(resolution);
        self.seen.remove(id);
        self.persist();
        self.archived.push(record.clone());
        tracing::info!(
            target = "uisync.sync",
            artifact = %id,
            resolution = ?resolution,
            "conflict resolved"
        );
        Some(record)
    }

    fn persist(&self) {
        let records: Vec<&ConflictRecord> = self.unresolved.values().collect();
        if let Err(err) = self.file.save(&records) {
            tracing::error!(
                target = "uisync.sync",
                path = %self.file.path().display(),
                error = %err,
                "failed to persist conflicts"
            );
        }
    }
}
