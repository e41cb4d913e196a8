use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use apexd_core::write_file_atomically;
use prost::Message;

use crate::fs_utils::remove_dir_if_exists;
use crate::state::SessionDocument;
use crate::{SessionError, SessionState};

pub const STATE_FILE_NAME: &str = "state";

/// In-memory handle of one session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    document: SessionDocument,
    session_dir: PathBuf,
}

impl Session {
    pub(crate) fn new(id: i32, session_dir: PathBuf) -> Self {
        Self {
            document: SessionDocument {
                id,
                ..SessionDocument::default()
            },
            session_dir,
        }
    }

    /// Reads the committed document of session `id` from `session_dir`.
    pub(crate) fn load(id: i32, session_dir: PathBuf) -> Result<Self> {
        let path = session_dir.join(STATE_FILE_NAME);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound {
                    id,
                    dir: session_dir,
                }
                .into());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read session state: {}", path.display()));
            }
        };

        let document = SessionDocument::decode(raw.as_slice())
            .map_err(|source| SessionError::Corrupt { path: path.clone(), source })?;
        if document.id != id {
            log::warn!(
                "session state {} records id {} but lives in the directory of session {}",
                path.display(),
                document.id,
                id
            );
        }

        Ok(Self {
            document,
            session_dir,
        })
    }

    pub fn id(&self) -> i32 {
        self.document.id
    }

    pub fn state(&self) -> SessionState {
        self.document.state()
    }

    pub fn child_session_ids(&self) -> &[i32] {
        &self.document.child_session_ids
    }

    pub fn package_names(&self) -> &[String] {
        &self.document.package_names
    }

    pub fn build_fingerprint(&self) -> &str {
        &self.document.build_fingerprint
    }

    pub fn crashing_native_process(&self) -> &str {
        &self.document.crashing_native_process
    }

    pub fn error_message(&self) -> &str {
        &self.document.error_message
    }

    pub fn is_finalized(&self) -> bool {
        self.document.state().is_finalized()
    }

    pub fn has_rollback_enabled(&self) -> bool {
        self.document.has_rollback_enabled
    }

    pub fn is_rollback(&self) -> bool {
        self.document.is_rollback
    }

    pub fn rollback_id(&self) -> i32 {
        self.document.rollback_id
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.session_dir.join(STATE_FILE_NAME)
    }

    pub fn set_child_session_ids(&mut self, child_session_ids: &[i32]) {
        self.document.child_session_ids = child_session_ids.to_vec();
    }

    pub fn set_build_fingerprint(&mut self, fingerprint: impl Into<String>) {
        self.document.build_fingerprint = fingerprint.into();
    }

    pub fn set_has_rollback_enabled(&mut self, enabled: bool) {
        self.document.has_rollback_enabled = enabled;
    }

    pub fn set_is_rollback(&mut self, is_rollback: bool) {
        self.document.is_rollback = is_rollback;
    }

    pub fn set_rollback_id(&mut self, rollback_id: i32) {
        self.document.rollback_id = rollback_id;
    }

    pub fn set_crashing_native_process(&mut self, crashing_process: impl Into<String>) {
        self.document.crashing_native_process = crashing_process.into();
    }

    pub fn set_error_message(&mut self, error_message: impl Into<String>) {
        self.document.error_message = error_message.into();
    }

    pub fn add_package_name(&mut self, package_name: impl Into<String>) {
        self.document.package_names.push(package_name.into());
    }

    /// Sets `state` and atomically persists the whole document.
    ///
    /// On failure the handle keeps its previous state.
    pub fn update_state_and_commit(&mut self, state: SessionState) -> Result<()> {
        let mut next = self.document.clone();
        next.set_state(state);

        fs::create_dir_all(&self.session_dir).with_context(|| {
            format!(
                "failed to create session dir: {}",
                self.session_dir.display()
            )
        })?;
        let payload = next.encode_to_vec();
        let path = self.state_file_path();
        write_file_atomically(&path, &payload)
            .with_context(|| format!("failed to commit session state: {}", path.display()))?;

        log::debug!(
            "committed session {} state {} -> {}",
            next.id,
            self.document.state(),
            state
        );
        self.document = next;
        Ok(())
    }

    /// Removes the session directory. Deleting an absent session succeeds.
    pub fn delete_session(&self) -> Result<()> {
        let removed = remove_dir_if_exists(&self.session_dir).with_context(|| {
            format!(
                "failed to delete session dir: {}",
                self.session_dir.display()
            )
        })?;
        if removed {
            log::info!("deleted session {}", self);
        }
        Ok(())
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[id = {}; state = {}]", self.id(), self.state())
    }
}
