use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use uisync_core::{ChangeEvent, ChangeKind, Side};

#[derive(Debug, Clone)]
struct Pending {
    side: Side,
    kind: ChangeKind,
    last_event_at: Instant,
    timestamp: u64,
}

/// Per-path write stabilization.
///
/// Every raw event resets the path's timer; the path is released as one [`ChangeEvent`] once
/// `window` passes without another event. Kinds folded into one release follow
/// [`ChangeKind::merge`] and the timestamp is the last raw event's.
#[derive(Debug)]
pub struct Stabilizer {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl Stabilizer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn record(&mut self, path: &Path, side: Side, kind: ChangeKind, now: Instant, timestamp: u64) {
        match self.pending.get_mut(path) {
            Some(pending) => {
                pending.kind = pending.kind.merge(kind);
                pending.side = side;
                pending.last_event_at = now;
                pending.timestamp = timestamp;
            }
            None => {
                self.pending.insert(
                    path.to_path_buf(),
                    Pending {
                        side,
                        kind,
                        last_event_at: now,
                        timestamp,
                    },
                );
            }
        }
    }

    /// When the earliest pending path becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|pending| pending.last_event_at + self.window)
            .min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Releases every path whose quiet period has elapsed at `now`, oldest first.
    pub fn drain_due(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let window = self.window;
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.last_event_at) >= window)
            .map(|(path, _)| path.clone())
            .collect();

        let mut out: Vec<(Instant, ChangeEvent)> = due
            .into_iter()
            .filter_map(|path| {
                let pending = self.pending.remove(&path)?;
                Some((
                    pending.last_event_at,
                    ChangeEvent::new(path, pending.side, pending.kind, pending.timestamp),
                ))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.path.cmp(&b.1.path)));
        out.into_iter().map(|(_, event)| event).collect()
    }

    /// Releases everything regardless of timers (used on shutdown).
    pub fn drain_all(&mut self) -> Vec<ChangeEvent> {
        let mut out: Vec<(Instant, ChangeEvent)> = self
            .pending
            .drain()
            .map(|(path, pending)| {
                (
                    pending.last_event_at,
                    ChangeEvent::new(path, pending.side, pending.kind, pending.timestamp),
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.path.cmp(&b.1.path)));
        out.into_iter().map(|(_, event)| event).collect()
    }
}
