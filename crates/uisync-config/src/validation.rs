use std::fmt;

use globset::Glob;
use serde::Serialize;

use crate::{SideConfig, SyncConfig};

/// A single semantic problem in a [`SyncConfig`], addressed by its TOML key path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    pub toml_path: String,
    pub message: String,
}

impl ConfigIssue {
    fn new(toml_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            toml_path: toml_path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.toml_path, self.message)
    }
}

impl SyncConfig {
    /// Validate semantic invariants that serde cannot express.
    ///
    /// Reports every problem found in one pass; an empty vector means the config is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut out = Vec::new();

        validate_side("side_a", &self.side_a, &mut out);
        validate_side("side_b", &self.side_b, &mut out);
        validate_roots(self, &mut out);
        validate_limits(self, &mut out);

        out
    }
}

fn validate_side(key: &str, side: &SideConfig, out: &mut Vec<ConfigIssue>) {
    let extension = side.extension.trim_start_matches('.');
    if extension.is_empty() || extension.contains(['/', '\\', '*']) {
        out.push(ConfigIssue::new(
            format!("{key}.extension"),
            format!("invalid file extension {:?}", side.extension),
        ));
    }

    for (field, patterns) in [
        ("include", &side.include),
        ("exclude", &side.exclude),
        ("test_patterns", &side.test_patterns),
    ] {
        for (idx, pattern) in patterns.iter().enumerate() {
            if let Err(err) = Glob::new(pattern) {
                out.push(ConfigIssue::new(
                    format!("{key}.{field}[{idx}]"),
                    format!("invalid glob {pattern:?}: {err}"),
                ));
            }
        }
    }
}

fn validate_roots(config: &SyncConfig, out: &mut Vec<ConfigIssue>) {
    let a = &config.side_a.root;
    let b = &config.side_b.root;
    if a == b {
        out.push(ConfigIssue::new(
            "side_b.root",
            "side roots must be different directories",
        ));
    } else if a.starts_with(b) || b.starts_with(a) {
        out.push(ConfigIssue::new(
            "side_b.root",
            "side roots must not contain one another",
        ));
    }

    let ext_a = config.side_a.extension.trim_start_matches('.');
    let ext_b = config.side_b.extension.trim_start_matches('.');
    if !ext_a.is_empty() && ext_a.eq_ignore_ascii_case(ext_b) {
        out.push(ConfigIssue::new(
            "side_b.extension",
            format!("both sides use the extension {ext_a:?}"),
        ));
    }
}

fn validate_limits(config: &SyncConfig, out: &mut Vec<ConfigIssue>) {
    let mut positive = |toml_path: &str, value: u64| {
        if value == 0 {
            out.push(ConfigIssue::new(toml_path, "must be >= 1"));
        }
    };

    positive("queue.batch_size", config.queue.batch_size as u64);
    positive("queue.max_delay_ms", config.queue.max_delay_ms);
    positive("queue.max_queue_size", config.queue.max_queue_size as u64);
    positive("conflicts.window_ms", config.conflicts.window_ms);
    positive("processor.task_timeout_ms", config.processor.task_timeout_ms);
    positive(
        "processor.parallel_threshold",
        config.processor.parallel_threshold as u64,
    );
    positive("progress.batch_threshold", config.progress.batch_threshold as u64);
    if let Some(workers) = config.processor.max_workers {
        positive("processor.max_workers", workers as u64);
    }
    if config.cache.enabled {
        positive("cache.max_entries", config.cache.max_entries as u64);
        positive("cache.max_memory_bytes", config.cache.max_memory_bytes as u64);
        positive("cache.ttl_ms", config.cache.ttl_ms);
    }

    if config.queue.max_queue_size < config.queue.batch_size {
        out.push(ConfigIssue::new(
            "queue.max_queue_size",
            format!(
                "must be >= queue.batch_size ({})",
                config.queue.batch_size
            ),
        ));
    }
}
