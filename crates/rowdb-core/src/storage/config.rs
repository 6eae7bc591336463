//! Store configuration.

use std::path::{Path, PathBuf};

/// Configuration for the table store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory; each database is a subdirectory.
    pub root: PathBuf,

    /// Write indented JSON.
    pub pretty: bool,

    /// Refuse to commit when the unit on disk changed since it was loaded.
    ///
    /// Off by default: the last writer wins.
    pub detect_conflicts: bool,

    /// fsync each unit before it replaces the previous one.
    pub sync_writes: bool,
}

impl StoreConfig {
    /// Create a configuration rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            pretty: true,
            detect_conflicts: false,
            sync_writes: false,
        }
    }

    /// Set whether units are pretty-printed.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Set whether concurrent modification is detected on commit.
    pub fn detect_conflicts(mut self, detect: bool) -> Self {
        self.detect_conflicts = detect;
        self
    }

    /// Set whether writes are synced to disk.
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Directory holding a database's table units.
    pub fn database_dir(&self, database: &str) -> PathBuf {
        self.root.join(database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = StoreConfig::new("/tmp/rowdb")
            .pretty(false)
            .detect_conflicts(true)
            .sync_writes(true);

        assert!(!config.pretty);
        assert!(config.detect_conflicts);
        assert!(config.sync_writes);
        assert_eq!(config.database_dir("app"), PathBuf::from("/tmp/rowdb/app"));
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::new("data");
        assert!(config.pretty);
        assert!(!config.detect_conflicts);
        assert!(!config.sync_writes);
    }
}
