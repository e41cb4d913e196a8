use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {id} not found in {}", .dir.display())]
    NotFound { id: i32, dir: PathBuf },
    #[error("session {id} already exists in {}", .dir.display())]
    AlreadyExists { id: i32, dir: PathBuf },
    #[error("session state document is corrupt: {}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: prost::DecodeError,
    },
}
