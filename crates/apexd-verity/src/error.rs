use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum HashtreeError {
    #[error("cannot prepare hashtree of compressed package: {}", .path.display())]
    CompressedImage { path: PathBuf },
    #[error(
        "regenerated hashtree of {} has root digest {actual}, expected {expected}",
        .path.display()
    )]
    RootDigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("cannot build a hashtree over an empty payload")]
    EmptyImage,
    #[error("invalid hashtree block size {block_size}: must be a power of two >= 512")]
    InvalidBlockSize { block_size: u32 },
}
