use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use uisync_config::QueueConfig;
use uisync_core::ChangeEvent;
use uisync_vfs::{FileClass, SideFilter};

/// Processing order inside a released batch: `High` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl From<FileClass> for Priority {
    fn from(class: FileClass) -> Self {
        match class {
            FileClass::Source => Priority::High,
            FileClass::Test => Priority::Normal,
            FileClass::Other => Priority::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedChange {
    pub event: ChangeEvent,
    pub priority: Priority,
}

impl QueuedChange {
    pub fn new(event: ChangeEvent, priority: Priority) -> Self {
        Self { event, priority }
    }
}

#[derive(Debug)]
struct Slot {
    change: QueuedChange,
    /// When the path first entered the pending batch; later events for it do not reset this.
    first_seen: Instant,
}

/// Buffers stabilized change events and releases them in prioritized batches.
///
/// Events are deduplicated by path (the most recent event wins). A batch is released once
/// `batch_size` paths are pending or `max_delay` has passed since the oldest pending path
/// arrived. Past `max_queue_size` the oldest entry of the lowest priority present is dropped.
#[derive(Debug)]
pub struct ChangeQueue {
    batch_size: usize,
    max_delay: Duration,
    max_queue_size: usize,
    filter: Arc<SideFilter>,
    pending: IndexMap<PathBuf, Slot>,
    dropped: u64,
}

impl ChangeQueue {
    pub fn new(config: &QueueConfig, filter: Arc<SideFilter>) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            batch_size,
            max_delay: config.max_delay(),
            max_queue_size: config.max_queue_size.max(batch_size),
            filter,
            pending: IndexMap::new(),
            dropped: 0,
        }
    }

    pub fn priority_of(&self, event: &ChangeEvent) -> Priority {
        self.filter.classify(event.side, &event.path).into()
    }

    pub fn enqueue(&mut self, event: ChangeEvent) -> Priority {
        self.enqueue_at(event, Instant::now())
    }

    pub fn enqueue_at(&mut self, event: ChangeEvent, now: Instant) -> Priority {
        let priority = self.priority_of(&event);
        let change = QueuedChange::new(event, priority);
        match self.pending.get_mut(&change.event.path) {
            Some(slot) => slot.change = change,
            None => {
                self.pending.insert(
                    change.event.path.clone(),
                    Slot {
                        change,
                        first_seen: now,
                    },
                );
                self.enforce_bound();
            }
        }
        priority
    }

    fn enforce_bound(&mut self) {
        while self.pending.len() > self.max_queue_size {
            let Some(lowest) = self.pending.values().map(|slot| slot.change.priority).max() else {
                return;
            };
            let Some(idx) = self
                .pending
                .values()
                .position(|slot| slot.change.priority == lowest)
            else {
                return;
            };
            if let Some((path, slot)) = self.pending.shift_remove_index(idx) {
                self.dropped += 1;
                tracing::warn!(
                    target = "uisync.sync",
                    path = %path.display(),
                    priority = ?slot.change.priority,
                    max_queue_size = self.max_queue_size,
                    "change queue full; dropping oldest lowest-priority change"
                );
            }
        }
    }

    /// Releases the next batch if one is due at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<Vec<QueuedChange>> {
        if self.pending.len() >= self.batch_size {
            return Some(self.take(self.batch_size));
        }
        let deadline = self.next_deadline()?;
        if now >= deadline {
            return Some(self.take(self.pending.len()));
        }
        None
    }

    /// When the pending batch becomes due by delay.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .first()
            .map(|(_, slot)| slot.first_seen + self.max_delay)
    }

    /// Releases everything pending, regardless of size or delay.
    pub fn flush(&mut self) -> Vec<QueuedChange> {
        self.take(self.pending.len())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total entries dropped by the size bound.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn take(&mut self, count: usize) -> Vec<QueuedChange> {
        let count = count.min(self.pending.len());
        let mut batch: Vec<QueuedChange> = self
            .pending
            .drain(..count)
            .map(|(_, slot)| slot.change)
            .collect();
        // Stable: insertion order is kept within a priority.
        batch.sort_by_key(|change| change.priority);
        batch
    }
}
