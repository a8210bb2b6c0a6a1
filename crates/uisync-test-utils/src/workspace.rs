use std::path::{Path, PathBuf};

use uisync_config::SyncConfig;
use uisync_core::Side;

/// A throwaway two-sided workspace: `<tmp>/a`, `<tmp>/b` and storage under `<tmp>/.uisync`.
pub struct TestWorkspace {
    dir: tempfile::TempDir,
    pub config: SyncConfig,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = SyncConfig::with_roots(dir.path().join("a"), dir.path().join("b"));
        config.storage_root = dir.path().join(".uisync");
        for side in [&config.side_a.root, &config.side_b.root] {
            std::fs::create_dir_all(side).expect("failed to create side root");
        }
        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, side: Side, relative: &str) -> PathBuf {
        self.config.side(side).root.join(relative)
    }

    pub fn write(&self, side: Side, relative: &str, text: &str) -> PathBuf {
        let path = self.path(side, relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        std::fs::write(&path, text).expect("failed to write fixture file");
        path
    }

    pub fn read(&self, side: Side, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.path(side, relative)).ok()
    }

    pub fn remove(&self, side: Side, relative: &str) -> PathBuf {
        let path = self.path(side, relative);
        std::fs::remove_file(&path).expect("failed to remove fixture file");
        path
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
