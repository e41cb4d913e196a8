use std::path::Path;

use apexd_core::ApexdConfig;
use apexd_session::{select_sessions_dir, SessionManager};
use apexd_verity::HashtreeManager;

/// Process-wide state, built once at startup and passed by reference.
#[derive(Debug)]
pub(crate) struct ApexdContext {
    config: ApexdConfig,
    session_manager: SessionManager,
    hashtree_manager: HashtreeManager,
}

impl ApexdContext {
    pub(crate) fn new(config: ApexdConfig) -> Self {
        let sessions_dir = select_sessions_dir(&config.sessions);
        log::debug!("using sessions dir {}", sessions_dir.display());
        Self {
            session_manager: SessionManager::new(sessions_dir),
            hashtree_manager: HashtreeManager::from_config(&config),
            config,
        }
    }

    pub(crate) fn session_manager(&self) -> &SessionManager {
        &self.session_manager
    }

    pub(crate) fn hashtree_manager(&self) -> &HashtreeManager {
        &self.hashtree_manager
    }

    /// The sessions root that predates the selected one, if they differ.
    pub(crate) fn legacy_sessions_dir(&self) -> Option<&Path> {
        let fallback = self.config.sessions.fallback_dir.as_path();
        (fallback != self.session_manager.sessions_base_dir()).then_some(fallback)
    }
}
