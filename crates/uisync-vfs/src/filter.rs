use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use uisync_config::{SideConfig, SyncConfig};
use uisync_core::{normalize_local_path, Side, TMP_MARKER};

use crate::error::WatchError;

/// How a watched path participates in synchronization; drives queue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileClass {
    /// A primary component source file.
    Source,
    /// A file matching the side's test patterns.
    Test,
    /// Anything else under a side root that still passed the include filter.
    Other,
}

#[derive(Debug)]
struct SideRules {
    root: PathBuf,
    extension: String,
    include: GlobSet,
    exclude: GlobSet,
    tests: GlobSet,
}

impl SideRules {
    fn new(side: Side, config: &SideConfig) -> Result<Self, WatchError> {
        Ok(Self {
            root: normalize_local_path(&config.root),
            extension: config.extension.trim_start_matches('.').to_owned(),
            include: build_globset(side, &config.effective_include())?,
            exclude: build_globset(side, &config.exclude)?,
            tests: build_globset(side, &config.test_patterns)?,
        })
    }

    fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }
}

fn build_globset(side: Side, patterns: &[String]) -> Result<GlobSet, WatchError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|err| WatchError::InvalidGlob {
                side,
                pattern: pattern.clone(),
                message: err.to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|err| WatchError::InvalidGlob {
        side,
        pattern: patterns.join(", "),
        message: err.to_string(),
    })
}

/// Maps paths to sides and applies each side's include/exclude globs.
///
/// Globs are matched against the path relative to the side root, with `*` not crossing
/// directory separators. Temporary files from in-flight atomic writes never match.
#[derive(Debug)]
pub struct SideFilter {
    side_a: SideRules,
    side_b: SideRules,
}

impl SideFilter {
    pub fn new(config: &SyncConfig) -> Result<Self, WatchError> {
        Ok(Self {
            side_a: SideRules::new(Side::A, &config.side_a)?,
            side_b: SideRules::new(Side::B, &config.side_b)?,
        })
    }

    fn rules(&self, side: Side) -> &SideRules {
        match side {
            Side::A => &self.side_a,
            Side::B => &self.side_b,
        }
    }

    pub fn root(&self, side: Side) -> &Path {
        &self.rules(side).root
    }

    /// The side whose root contains `path`. The longer root wins if both match.
    pub fn side_of(&self, path: &Path) -> Option<Side> {
        let path = normalize_local_path(path);
        Side::ALL
            .into_iter()
            .filter(|side| path.starts_with(&self.rules(*side).root))
            .max_by_key(|side| self.rules(*side).root.components().count())
    }

    /// Whether `path` is tracked on `side` (under its root, included, not excluded).
    pub fn matches(&self, side: Side, path: &Path) -> bool {
        if is_temp_file(path) {
            return false;
        }
        let rules = self.rules(side);
        let Some(relative) = rules.relative(path) else {
            return false;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }
        rules.include.is_match(relative) && !rules.exclude.is_match(relative)
    }

    /// Whether any path below directory `dir` could ever match (used to skip excluded trees).
    fn descend_into(&self, side: Side, dir: &Path) -> bool {
        let rules = self.rules(side);
        match rules.relative(dir) {
            Some(relative) if relative.as_os_str().is_empty() => true,
            Some(relative) => !rules.exclude.is_match(relative.join("_")),
            None => false,
        }
    }

    /// Resolves `path` to its side if it is tracked.
    pub fn accept(&self, path: &Path) -> Option<Side> {
        let path = normalize_local_path(path);
        let side = self.side_of(&path)?;
        self.matches(side, &path).then_some(side)
    }

    pub fn classify(&self, side: Side, path: &Path) -> FileClass {
        let rules = self.rules(side);
        let Some(relative) = rules.relative(path) else {
            return FileClass::Other;
        };
        if rules.tests.is_match(relative) {
            return FileClass::Test;
        }
        let has_source_extension = relative
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == rules.extension);
        if has_source_extension {
            FileClass::Source
        } else {
            FileClass::Other
        }
    }

    /// Every tracked file currently under `side`'s root, sorted.
    pub fn scan(&self, side: Side) -> Vec<PathBuf> {
        let root = self.root(side);
        let mut out = Vec::new();
        let walker = walkdir::WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !entry.file_type().is_dir() || self.descend_into(side, entry.path()));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(
                        target = "uisync.vfs",
                        side = %side,
                        error = %err,
                        "skipping unreadable entry during scan"
                    );
                    continue;
                }
            };
            if entry.file_type().is_file() && self.matches(side, entry.path()) {
                out.push(entry.into_path());
            }
        }
        out.sort();
        out
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains(TMP_MARKER))
}
