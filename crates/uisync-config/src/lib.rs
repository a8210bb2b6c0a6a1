//! Configuration for the uisync synchronization core.
//!
//! Configuration is consumed, never produced, by the core. It is normally loaded from a TOML
//! file (`uisync.toml`); every key is optional and falls back to a documented default.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use uisync_core::{CaseNamingConvention, FileCase, Side, SideLayout};

mod logging;
mod schema;
mod validation;

pub use logging::{init_tracing, LoggingConfig};
pub use schema::json_schema;
pub use validation::ConfigIssue;

/// Which side (if any) is the sole source of truth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorityMode {
    /// Only side A edits are synchronized; side B edits are logged and ignored.
    AAuthoritative,
    /// Only side B edits are synchronized; side A edits are logged and ignored.
    BAuthoritative,
    /// Both sides are editable; conflict detection is active.
    #[default]
    Bidirectional,
}

impl AuthorityMode {
    /// The authoritative side, or `None` in bidirectional mode.
    pub fn authority(self) -> Option<Side> {
        match self {
            AuthorityMode::AAuthoritative => Some(Side::A),
            AuthorityMode::BAuthoritative => Some(Side::B),
            AuthorityMode::Bidirectional => None,
        }
    }

    /// Whether edits on `side` flow through the pipeline in this mode.
    pub fn accepts(self, side: Side) -> bool {
        self.authority().map_or(true, |authority| authority == side)
    }

    pub fn is_bidirectional(self) -> bool {
        self == AuthorityMode::Bidirectional
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SideConfig {
    /// Root directory of this side's component tree (relative to the config file unless absolute).
    #[schemars(with = "String")]
    pub root: PathBuf,

    /// Source file extension, without the leading dot.
    pub extension: String,

    /// Naming case of files and directories on this side.
    #[schemars(with = "String")]
    pub file_case: FileCase,

    /// Glob patterns (relative to `root`) a path must match to be watched. Empty means
    /// `**/*.<extension>`.
    #[serde(default)]
    pub include: Vec<String>,

    /// Glob patterns (relative to `root`) that are never watched.
    #[serde(default = "SideConfig::default_exclude")]
    pub exclude: Vec<String>,

    /// Glob patterns (relative to `root`) identifying test files; these sync with lower priority.
    #[serde(default = "SideConfig::default_test_patterns")]
    pub test_patterns: Vec<String>,
}

impl SideConfig {
    fn default_exclude() -> Vec<String> {
        vec![
            "**/node_modules/**".to_owned(),
            "**/.git/**".to_owned(),
            "**/build/**".to_owned(),
        ]
    }

    fn default_test_patterns() -> Vec<String> {
        vec![
            "**/*.test.*".to_owned(),
            "**/*.spec.*".to_owned(),
            "**/*_test.*".to_owned(),
            "**/test/**".to_owned(),
            "**/tests/**".to_owned(),
            "**/__tests__/**".to_owned(),
        ]
    }

    fn default_a() -> Self {
        Self::new("side-a", "tsx", FileCase::Pascal)
    }

    fn default_b() -> Self {
        Self::new("side-b", "dart", FileCase::Snake)
    }

    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>, file_case: FileCase) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            file_case,
            include: Vec::new(),
            exclude: Self::default_exclude(),
            test_patterns: Self::default_test_patterns(),
        }
    }

    /// Include patterns with the `**/*.<extension>` default applied.
    pub fn effective_include(&self) -> Vec<String> {
        if self.include.is_empty() {
            vec![format!("**/*.{}", self.extension.trim_start_matches('.'))]
        } else {
            self.include.clone()
        }
    }

    pub fn layout(&self) -> SideLayout {
        SideLayout::new(self.root.clone(), self.extension.clone(), self.file_case)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WatcherConfig {
    /// Quiet period after the last raw event for a path before it is emitted.
    #[serde(default = "WatcherConfig::default_stabilization_ms")]
    pub stabilization_ms: u64,

    /// Create missing side roots at startup instead of failing to watch them.
    #[serde(default = "WatcherConfig::default_create_missing_roots")]
    pub create_missing_roots: bool,
}

impl WatcherConfig {
    fn default_stabilization_ms() -> u64 {
        75
    }

    fn default_create_missing_roots() -> bool {
        true
    }

    pub fn stabilization(&self) -> Duration {
        Duration::from_millis(self.stabilization_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            stabilization_ms: Self::default_stabilization_ms(),
            create_missing_roots: Self::default_create_missing_roots(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Release a batch as soon as this many distinct paths are pending.
    #[serde(default = "QueueConfig::default_batch_size")]
    pub batch_size: usize,

    /// Release a batch once the oldest pending change has waited this long.
    #[serde(default = "QueueConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound on pending changes; past it the oldest lowest-priority entries are dropped.
    #[serde(default = "QueueConfig::default_max_queue_size")]
    pub max_queue_size: usize,
}

impl QueueConfig {
    fn default_batch_size() -> usize {
        20
    }

    fn default_max_delay_ms() -> u64 {
        250
    }

    fn default_max_queue_size() -> usize {
        1_000
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: Self::default_batch_size(),
            max_delay_ms: Self::default_max_delay_ms(),
            max_queue_size: Self::default_max_queue_size(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ConflictConfig {
    /// Edits to both sides of one artifact within this span are a conflict.
    #[serde(default = "ConflictConfig::default_window_ms")]
    pub window_ms: u64,
}

impl ConflictConfig {
    fn default_window_ms() -> u64 {
        5_000
    }
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            window_ms: Self::default_window_ms(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Set to `false` to bypass the AST/IR cache entirely.
    #[serde(default = "CacheConfig::default_enabled")]
    pub enabled: bool,

    #[serde(default = "CacheConfig::default_max_entries")]
    pub max_entries: usize,

    /// Budget for cached payloads, estimated from their serialized size.
    #[serde(default = "CacheConfig::default_max_memory_bytes")]
    pub max_memory_bytes: usize,

    #[serde(default = "CacheConfig::default_ttl_ms")]
    pub ttl_ms: u64,
}

impl CacheConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_max_entries() -> usize {
        1_000
    }

    fn default_max_memory_bytes() -> usize {
        64 * 1024 * 1024
    }

    fn default_ttl_ms() -> u64 {
        30 * 60 * 1_000
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            max_entries: Self::default_max_entries(),
            max_memory_bytes: Self::default_max_memory_bytes(),
            ttl_ms: Self::default_ttl_ms(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Worker pool size. Defaults to the available parallelism minus one (at least one).
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// `ParallelProcessor::process_many` batches smaller than this run one task at a time instead
    /// of fanning out. The sync engine submits single tasks per pipeline stage, which always go to
    /// the pool.
    #[serde(default = "ProcessorConfig::default_parallel_threshold")]
    pub parallel_threshold: usize,

    #[serde(default = "ProcessorConfig::default_task_timeout_ms")]
    pub task_timeout_ms: u64,
}

impl ProcessorConfig {
    fn default_parallel_threshold() -> usize {
        3
    }

    fn default_task_timeout_ms() -> u64 {
        30_000
    }

    pub fn effective_max_workers(&self) -> usize {
        match self.max_workers {
            Some(workers) => workers.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .saturating_sub(1)
                .max(1),
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            parallel_threshold: Self::default_parallel_threshold(),
            task_timeout_ms: Self::default_task_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProgressConfig {
    /// Batches with at least this many changes are reported through the progress tracker.
    #[serde(default = "ProgressConfig::default_batch_threshold")]
    pub batch_threshold: usize,
}

impl ProgressConfig {
    fn default_batch_threshold() -> usize {
        5
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            batch_threshold: Self::default_batch_threshold(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default)]
    pub mode: AuthorityMode,

    #[serde(default = "SideConfig::default_a")]
    pub side_a: SideConfig,

    #[serde(default = "SideConfig::default_b")]
    pub side_b: SideConfig,

    /// Directory holding the durable IR version log and conflict file.
    #[serde(default = "SyncConfig::default_storage_root")]
    #[schemars(with = "String")]
    pub storage_root: PathBuf,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub conflicts: ConflictConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub progress: ProgressConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: AuthorityMode::default(),
            side_a: SideConfig::default_a(),
            side_b: SideConfig::default_b(),
            storage_root: Self::default_storage_root(),
            watcher: WatcherConfig::default(),
            queue: QueueConfig::default(),
            conflicts: ConflictConfig::default(),
            cache: CacheConfig::default(),
            processor: ProcessorConfig::default(),
            progress: ProgressConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid config: {}", format_issues(.0))]
    Invalid(Vec<ConfigIssue>),
}

fn format_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(err.message().to_owned())
    }
}

impl SyncConfig {
    fn default_storage_root() -> PathBuf {
        PathBuf::from(".uisync")
    }

    /// Builds a config for two roots, keeping every other setting at its default.
    pub fn with_roots(side_a: impl Into<PathBuf>, side_b: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.side_a.root = side_a.into();
        config.side_b.root = side_b.into();
        config
    }

    /// Load and validate a TOML config file. Relative paths are resolved against the file's
    /// directory.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::load_from_str(&text, base)
    }

    /// Parse and validate TOML text, resolving relative paths against `base`.
    pub fn load_from_str(text: &str, base: &Path) -> Result<Self, ConfigError> {
        let mut config: SyncConfig = toml::from_str(text)?;
        config.resolve_relative_paths(base);

        let issues = config.validate();
        if !issues.is_empty() {
            return Err(ConfigError::Invalid(issues));
        }
        Ok(config)
    }

    pub fn resolve_relative_paths(&mut self, base: &Path) {
        for root in [
            &mut self.side_a.root,
            &mut self.side_b.root,
            &mut self.storage_root,
        ] {
            if root.is_relative() {
                *root = uisync_core::normalize_local_path(&base.join(&*root));
            }
        }
        if let Some(file) = self.logging.file.as_mut() {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
    }

    pub fn side(&self, side: Side) -> &SideConfig {
        match side {
            Side::A => &self.side_a,
            Side::B => &self.side_b,
        }
    }

    /// The reference naming convention implied by the two side configs.
    pub fn naming_convention(&self) -> CaseNamingConvention {
        CaseNamingConvention::new(self.side_a.layout(), self.side_b.layout())
    }

    pub fn conflict_window(&self) -> Duration {
        Duration::from_millis(self.conflicts.window_ms)
    }
}
