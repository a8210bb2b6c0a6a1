use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a logical UI unit, independent of either side's file naming.
///
/// Ids are made of lowercase kebab-case segments joined by `.` (for example
/// `forms.login-button`). This keeps them usable as a single directory name in the IR store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Wraps an id, returning `None` when it contains characters outside `[a-z0-9-.]` or empty
    /// segments.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.is_empty() {
            return None;
        }
        let valid_segments = id.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        });
        valid_segments.then_some(Self(id))
    }

    /// Builds an id from already kebab-cased segments.
    pub fn from_segments<'a>(segments: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let joined = segments.into_iter().collect::<Vec<_>>().join(".");
        Self::new(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for ArtifactId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
