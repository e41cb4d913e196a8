use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

/// Lifecycle state of a session.
///
/// Transition legality is enforced by the orchestration layer; the store
/// persists whatever it is given. The discriminants are the wire values of
/// the `state` document; values unknown to this build decode as
/// [`SessionState::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SessionState {
    Unknown = 0,
    Verified = 1,
    Staged = 2,
    Activated = 3,
    ActivationFailed = 4,
    Success = 5,
    RollbackInProgress = 6,
    Reverted = 7,
    RevertFailed = 8,
}

impl SessionState {
    pub const ALL: [SessionState; 9] = [
        Self::Unknown,
        Self::Verified,
        Self::Staged,
        Self::Activated,
        Self::ActivationFailed,
        Self::Success,
        Self::RollbackInProgress,
        Self::Reverted,
        Self::RevertFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Verified => "VERIFIED",
            Self::Staged => "STAGED",
            Self::Activated => "ACTIVATED",
            Self::ActivationFailed => "ACTIVATION_FAILED",
            Self::Success => "SUCCESS",
            Self::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            Self::Reverted => "REVERTED",
            Self::RevertFailed => "REVERT_FAILED",
        }
    }

    /// Terminal states; sessions in them are eligible for cleanup.
    pub fn is_finalized(self) -> bool {
        matches!(
            self,
            Self::Success | Self::ActivationFailed | Self::Reverted | Self::RevertFailed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace('-', "_");
        if normalized == "REVERT_IN_PROGRESS" {
            return Ok(Self::RollbackInProgress);
        }
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| anyhow!("invalid session state: {value}"))
    }
}

/// The persisted `state` document, protobuf encoded with the field numbers
/// of `apex.proto.SessionState` so documents written by the platform and by
/// this store are interchangeable. Unknown fields are skipped on decode.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub(crate) struct SessionDocument {
    #[prost(int32, tag = "1")]
    pub(crate) id: i32,
    #[prost(enumeration = "SessionState", tag = "2")]
    pub(crate) state: i32,
    #[prost(int32, repeated, tag = "3")]
    pub(crate) child_session_ids: Vec<i32>,
    #[prost(string, tag = "4")]
    pub(crate) build_fingerprint: String,
    #[prost(bool, tag = "5")]
    pub(crate) has_rollback_enabled: bool,
    #[prost(bool, tag = "6")]
    pub(crate) is_rollback: bool,
    #[prost(int32, tag = "7")]
    pub(crate) rollback_id: i32,
    #[prost(string, tag = "8")]
    pub(crate) crashing_native_process: String,
    #[prost(string, repeated, tag = "9")]
    pub(crate) package_names: Vec<String>,
    #[prost(string, tag = "10")]
    pub(crate) error_message: String,
}
