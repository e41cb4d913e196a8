//! dm-verity hashtree side files for package payloads.

mod error;
mod hashtree;
mod prepare;

pub use error::HashtreeError;
pub use hashtree::{Hashtree, HashtreeLayout};
pub use prepare::{prepare_hash_tree, HashtreeManager, PrepareHashTreeResult};

#[cfg(test)]
mod tests;
