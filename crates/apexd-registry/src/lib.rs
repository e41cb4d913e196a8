//! In-memory registry of mounted apex packages and the block devices
//! backing them.
//!
//! The registry carries no lock of its own; callers that share it across
//! threads wrap the whole table in a mutex.

mod database;
mod mounted;

pub use database::{MountedApexDatabase, MountedApexView};
pub use mounted::MountedApexData;
