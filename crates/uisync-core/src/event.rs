use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One of the two UI-framework representations participating in synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    A,
    B,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::A, Side::B];

    pub fn opposite(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::A => "a",
            Side::B => "b",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Change,
    Remove,
}

impl ChangeKind {
    /// Collapses two successive kinds for the same path into the kind that describes the final
    /// on-disk state.
    ///
    /// - `add` then `change` is still an `add` (the file is new to consumers)
    /// - `remove` then `add` is a `change` (atomic-save style replace)
    /// - anything else resolves to the latest kind
    pub fn merge(self, next: ChangeKind) -> ChangeKind {
        match (self, next) {
            (ChangeKind::Add, ChangeKind::Change) => ChangeKind::Add,
            (ChangeKind::Remove, ChangeKind::Add) => ChangeKind::Change,
            (_, next) => next,
        }
    }
}

/// Raw, stabilized signal emitted by the watcher for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub side: Side,
    pub kind: ChangeKind,
    /// Milliseconds since the UNIX epoch of the last raw event folded into this one.
    pub timestamp: u64,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, side: Side, kind: ChangeKind, timestamp: u64) -> Self {
        Self {
            path: path.into(),
            side,
            kind,
            timestamp,
        }
    }
}
