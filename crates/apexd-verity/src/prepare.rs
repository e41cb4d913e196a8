use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use apexd_core::{write_atomically, ApexImage, ApexdConfig, VerityData};
use apexd_security::salted_sha256;

use crate::{Hashtree, HashtreeError, HashtreeLayout};

/// How [`prepare_hash_tree`] satisfied the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareHashTreeResult {
    Reuse,
    Regenerate,
}

impl PrepareHashTreeResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reuse => "reuse",
            Self::Regenerate => "regenerate",
        }
    }
}

/// Makes `target_path` hold the hashtree of `image` described by
/// `verity_data`, reusing an existing side file when it already matches.
///
/// A regenerated tree is written to a sibling temp file and renamed into
/// place, so `target_path` never holds a partially written tree.
pub fn prepare_hash_tree(
    image: &dyn ApexImage,
    verity_data: &VerityData,
    target_path: &Path,
) -> Result<PrepareHashTreeResult> {
    if image.is_compressed() {
        return Err(HashtreeError::CompressedImage {
            path: image.path().to_path_buf(),
        }
        .into());
    }

    let payload_size = image.payload_size()?;
    let layout = HashtreeLayout::for_payload(payload_size, verity_data.block_size)
        .with_context(|| format!("cannot lay out hashtree of {}", image.path().display()))?;

    if existing_tree_matches(target_path, &layout, verity_data)? {
        log::info!(
            "reusing hashtree {} for {}",
            target_path.display(),
            image.manifest().name
        );
        return Ok(PrepareHashTreeResult::Reuse);
    }

    log::info!(
        "regenerating hashtree {} for {}",
        target_path.display(),
        image.manifest().name
    );
    let mut payload = image.open_payload()?;
    let tree = Hashtree::build(&mut *payload, verity_data.block_size, &verity_data.salt)
        .with_context(|| format!("failed to build hashtree of {}", image.path().display()))?;
    if tree.root_digest() != &verity_data.root_digest {
        return Err(HashtreeError::RootDigestMismatch {
            path: image.path().to_path_buf(),
            expected: verity_data.root_digest_hex(),
            actual: hex::encode(tree.root_digest()),
        }
        .into());
    }

    write_tree_atomically(&tree, target_path)?;
    Ok(PrepareHashTreeResult::Regenerate)
}

/// Compares only the length and the top block of an existing side file.
fn existing_tree_matches(
    target_path: &Path,
    layout: &HashtreeLayout,
    verity_data: &VerityData,
) -> Result<bool> {
    let mut file = match fs::File::open(target_path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to open hashtree: {}", target_path.display()));
        }
    };
    let metadata = file
        .metadata()
        .with_context(|| format!("failed to stat hashtree: {}", target_path.display()))?;
    if !metadata.is_file() || metadata.len() != layout.tree_size() {
        log::debug!(
            "hashtree {} has size {}, expected {}",
            target_path.display(),
            metadata.len(),
            layout.tree_size()
        );
        return Ok(false);
    }

    let mut top = vec![0_u8; layout.block_size() as usize];
    file.read_exact(&mut top)
        .with_context(|| format!("failed to read hashtree: {}", target_path.display()))?;
    Ok(salted_sha256(&verity_data.salt, &top) == verity_data.root_digest)
}

fn write_tree_atomically(tree: &Hashtree, target_path: &Path) -> Result<()> {
    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create hashtree dir: {}", parent.display()))?;
    }
    write_atomically(target_path, |writer| tree.write_to(writer))
        .with_context(|| format!("failed to write hashtree: {}", target_path.display()))?;
    log::debug!(
        "wrote {} hashtree level(s) covering {} payload bytes to {}",
        tree.layout().level_count(),
        tree.data_size(),
        target_path.display()
    );
    Ok(())
}

/// Owns the directory holding one hashtree side file per package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashtreeManager {
    hashtree_dir: PathBuf,
}

impl HashtreeManager {
    pub fn new(hashtree_dir: impl Into<PathBuf>) -> Self {
        Self {
            hashtree_dir: hashtree_dir.into(),
        }
    }

    pub fn from_config(config: &ApexdConfig) -> Self {
        Self::new(&config.hashtree_dir)
    }

    pub fn hashtree_dir(&self) -> &Path {
        &self.hashtree_dir
    }

    pub fn hashtree_path_for(&self, package_name: &str) -> PathBuf {
        self.hashtree_dir.join(package_name)
    }

    /// [`prepare_hash_tree`] against the side file of `image`'s package.
    pub fn prepare(
        &self,
        image: &dyn ApexImage,
        verity_data: &VerityData,
    ) -> Result<PrepareHashTreeResult> {
        let target = self.hashtree_path_for(&image.manifest().name);
        prepare_hash_tree(image, verity_data, &target)
    }

    /// Returns `true` when a side file was removed.
    pub fn remove_hash_tree(&self, package_name: &str) -> Result<bool> {
        let path = self.hashtree_path_for(package_name);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("removed hashtree {}", path.display());
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove hashtree: {}", path.display()))
            }
        }
    }
}
