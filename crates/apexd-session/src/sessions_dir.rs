use std::path::PathBuf;

use apexd_core::SessionsDirConfig;

/// Picks the sessions root: the preferred directory when its partition is
/// present, the fallback directory otherwise.
pub fn select_sessions_dir(config: &SessionsDirConfig) -> PathBuf {
    if config.partition_root.exists() {
        config.preferred_dir.clone()
    } else {
        config.fallback_dir.clone()
    }
}
