use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::fs_utils::{move_dir_or_copy, remove_dir_if_exists};
use crate::{Session, SessionError, SessionState, STATE_FILE_NAME};

/// Owns one sessions root. Nothing under the root is read until queried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionManager {
    sessions_base_dir: PathBuf,
}

impl SessionManager {
    pub fn new(sessions_base_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_base_dir: sessions_base_dir.into(),
        }
    }

    pub fn sessions_base_dir(&self) -> &Path {
        &self.sessions_base_dir
    }

    pub fn session_dir(&self, session_id: i32) -> PathBuf {
        self.sessions_base_dir.join(session_id.to_string())
    }

    /// Allocates the directory of a new session. The session stays
    /// invisible to readers until its first commit.
    pub fn create_session(&self, session_id: i32) -> Result<Session> {
        let session_dir = self.session_dir(session_id);
        if session_dir.join(STATE_FILE_NAME).exists() {
            return Err(SessionError::AlreadyExists {
                id: session_id,
                dir: session_dir,
            }
            .into());
        }

        fs::create_dir_all(&session_dir).with_context(|| {
            format!("failed to create session dir: {}", session_dir.display())
        })?;
        Ok(Session::new(session_id, session_dir))
    }

    pub fn get_session(&self, session_id: i32) -> Result<Session> {
        Session::load(session_id, self.session_dir(session_id))
    }

    /// Every committed session, in no particular order.
    ///
    /// Uncommitted directories are skipped. Documents that fail to load are
    /// logged and skipped so one corrupt session cannot hide the others.
    pub fn get_sessions(&self) -> Result<Vec<Session>> {
        let entries = match fs::read_dir(&self.sessions_base_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "failed to read sessions dir: {}",
                        self.sessions_base_dir.display()
                    )
                });
            }
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| {
                format!(
                    "failed to read sessions dir entry: {}",
                    self.sessions_base_dir.display()
                )
            })?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(session_id) = parse_session_id(&entry.file_name()) else {
                log::debug!("ignoring non-session entry {}", entry.path().display());
                continue;
            };
            if !entry.path().join(STATE_FILE_NAME).exists() {
                continue;
            }

            match Session::load(session_id, entry.path()) {
                Ok(session) => sessions.push(session),
                Err(err) => log::error!("failed to load session {session_id}: {err:#}"),
            }
        }
        Ok(sessions)
    }

    pub fn get_sessions_in_state(&self, state: SessionState) -> Result<Vec<Session>> {
        let mut sessions = self.get_sessions()?;
        sessions.retain(|session| session.state() == state);
        Ok(sessions)
    }

    /// Deletes every session in a finalized state and returns their ids.
    ///
    /// Keeps sweeping past individual failures and reports them together.
    pub fn delete_finalized_sessions(&self) -> Result<Vec<i32>> {
        let mut deleted = Vec::new();
        let mut failures = Vec::new();
        for session in self.get_sessions()? {
            if !session.is_finalized() {
                continue;
            }
            match session.delete_session() {
                Ok(()) => deleted.push(session.id()),
                Err(err) => {
                    log::error!("failed to delete finalized session {session}: {err:#}");
                    failures.push(format!("{}: {err:#}", session.id()));
                }
            }
        }

        if !failures.is_empty() {
            return Err(anyhow!(
                "failed to delete {} finalized session(s): {}",
                failures.len(),
                failures.join("; ")
            ));
        }
        deleted.sort_unstable();
        Ok(deleted)
    }

    /// Moves every session from `old_sessions_base_dir` into this root.
    ///
    /// Safe to re-run after an interrupted run: sessions already committed
    /// here are kept as they are and their leftover source copies removed.
    pub fn migrate_from_old_sessions_dir(&self, old_sessions_base_dir: &Path) -> Result<()> {
        if same_dir(old_sessions_base_dir, &self.sessions_base_dir) {
            log::debug!(
                "sessions dir {} is already current, nothing to migrate",
                old_sessions_base_dir.display()
            );
            return Ok(());
        }

        let entries = match fs::read_dir(old_sessions_base_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "failed to read old sessions dir: {}",
                        old_sessions_base_dir.display()
                    )
                });
            }
        };
        fs::create_dir_all(&self.sessions_base_dir).with_context(|| {
            format!(
                "failed to create sessions dir: {}",
                self.sessions_base_dir.display()
            )
        })?;

        for entry in entries {
            let entry = entry.with_context(|| {
                format!(
                    "failed to read old sessions dir entry: {}",
                    old_sessions_base_dir.display()
                )
            })?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let source = entry.path();
            let destination = self.sessions_base_dir.join(entry.file_name());

            if destination.join(STATE_FILE_NAME).exists() {
                log::warn!(
                    "session {} already present in {}, dropping stale copy",
                    destination.display(),
                    self.sessions_base_dir.display()
                );
                remove_dir_if_exists(&source).with_context(|| {
                    format!("failed to remove migrated session: {}", source.display())
                })?;
                continue;
            }
            // An uncommitted leftover at the destination carries no state.
            remove_dir_if_exists(&destination).with_context(|| {
                format!(
                    "failed to clear uncommitted session dir: {}",
                    destination.display()
                )
            })?;

            move_dir_or_copy(&source, &destination).with_context(|| {
                format!(
                    "failed to migrate session {} to {}",
                    source.display(),
                    destination.display()
                )
            })?;
            log::info!(
                "migrated session {} to {}",
                source.display(),
                destination.display()
            );
        }
        Ok(())
    }
}

fn parse_session_id(name: &std::ffi::OsStr) -> Option<i32> {
    name.to_str()?.parse().ok()
}

fn same_dir(left: &Path, right: &Path) -> bool {
    if left == right {
        return true;
    }
    match (fs::canonicalize(left), fs::canonicalize(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}
