mod apex_file;
mod config;
mod fs_utils;
mod manifest;
mod verity;

pub use apex_file::{
    ApexFile, ApexImage, MANIFEST_ENTRY, ORIGINAL_APEX_ENTRY, PAYLOAD_ENTRY, PUBKEY_ENTRY,
    VERITY_ENTRY,
};
pub use config::{ApexdConfig, SessionsDirConfig, DEFAULT_CONFIG_PATH};
pub use fs_utils::{unique_suffix, write_atomically, write_file_atomically};
pub use manifest::ApexManifest;
pub use verity::{
    validate_block_size, HashAlgorithm, VerityData, VerityDescriptor, DEFAULT_VERITY_BLOCK_SIZE,
};
