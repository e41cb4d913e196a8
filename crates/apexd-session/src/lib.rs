//! Durable records of in-flight install and rollback sessions.
//!
//! Each session lives in `<sessions_base_dir>/<id>/` and is described by a
//! single `state` document. A session becomes visible to readers only once
//! that document has been committed by an atomic rename.

mod error;
mod fs_utils;
mod manager;
mod session;
mod sessions_dir;
mod state;

pub use error::SessionError;
pub use manager::SessionManager;
pub use session::{Session, STATE_FILE_NAME};
pub use sessions_dir::select_sessions_dir;
pub use state::SessionState;
