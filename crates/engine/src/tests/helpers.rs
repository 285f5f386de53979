use tempfile::TempDir;

use crate::{Config, MergeTree};

/// Foreground-only config: background merging off so tests control every
/// flush and merge themselves.
pub fn test_config() -> Config {
    Config {
        enable_background_merge: false,
        ..Config::default()
    }
}

pub fn open_tree(dir: &TempDir, config: Config) -> MergeTree {
    MergeTree::open(dir.path(), config).expect("engine should open")
}
