use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::{ApexManifest, VerityData, VerityDescriptor};

pub const MANIFEST_ENTRY: &str = "apex_manifest.json";
pub const PUBKEY_ENTRY: &str = "apex_pubkey";
pub const VERITY_ENTRY: &str = "apex_verity.json";
pub const PAYLOAD_ENTRY: &str = "apex_payload.img";
pub const ORIGINAL_APEX_ENTRY: &str = "original_apex";

/// A package image whose container has already been opened.
///
/// This is the seam between container parsing and the activation core:
/// the core only consumes verified metadata and the raw payload stream.
pub trait ApexImage {
    fn path(&self) -> &Path;

    fn manifest(&self) -> &ApexManifest;

    /// Compressed packages carry the original container instead of a
    /// mountable payload, so their hashtree cannot be derived locally.
    fn is_compressed(&self) -> bool;

    fn payload_size(&self) -> Result<u64>;

    fn open_payload(&self) -> Result<Box<dyn Read + '_>>;

    fn bundled_public_key(&self) -> &[u8];

    fn verify_apex_verity(&self, public_key: &[u8]) -> Result<VerityData>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PayloadEntry {
    Image(PathBuf),
    Compressed(PathBuf),
}

/// An extracted package bundle directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApexFile {
    path: PathBuf,
    manifest: ApexManifest,
    public_key: Vec<u8>,
    payload: PayloadEntry,
}

impl ApexFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_dir() {
            return Err(anyhow!("apex bundle is not a directory: {}", path.display()));
        }

        let manifest_path = path.join(MANIFEST_ENTRY);
        let raw_manifest = fs::read_to_string(&manifest_path)
            .with_context(|| format!("failed to read apex manifest: {}", manifest_path.display()))?;
        let manifest = ApexManifest::from_json_str(&raw_manifest)
            .with_context(|| format!("failed to parse apex manifest: {}", manifest_path.display()))?;

        let pubkey_path = path.join(PUBKEY_ENTRY);
        let public_key = fs::read(&pubkey_path)
            .with_context(|| format!("failed to read apex public key: {}", pubkey_path.display()))?;

        let payload_path = path.join(PAYLOAD_ENTRY);
        let original_path = path.join(ORIGINAL_APEX_ENTRY);
        let payload = match (payload_path.is_file(), original_path.is_file()) {
            (true, false) => PayloadEntry::Image(payload_path),
            (false, true) => PayloadEntry::Compressed(original_path),
            (true, true) => {
                return Err(anyhow!(
                    "apex bundle {} has both {} and {}",
                    path.display(),
                    PAYLOAD_ENTRY,
                    ORIGINAL_APEX_ENTRY
                ));
            }
            (false, false) => {
                return Err(anyhow!(
                    "apex bundle {} has neither {} nor {}",
                    path.display(),
                    PAYLOAD_ENTRY,
                    ORIGINAL_APEX_ENTRY
                ));
            }
        };

        Ok(Self {
            path,
            manifest,
            public_key,
            payload,
        })
    }

    fn payload_path(&self) -> &Path {
        match &self.payload {
            PayloadEntry::Image(path) | PayloadEntry::Compressed(path) => path,
        }
    }
}

impl ApexImage for ApexFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn manifest(&self) -> &ApexManifest {
        &self.manifest
    }

    fn is_compressed(&self) -> bool {
        matches!(self.payload, PayloadEntry::Compressed(_))
    }

    fn payload_size(&self) -> Result<u64> {
        let path = self.payload_path();
        Ok(fs::metadata(path)
            .with_context(|| format!("failed to stat apex payload: {}", path.display()))?
            .len())
    }

    fn open_payload(&self) -> Result<Box<dyn Read + '_>> {
        let path = self.payload_path();
        let file = fs::File::open(path)
            .with_context(|| format!("failed to open apex payload: {}", path.display()))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn bundled_public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn verify_apex_verity(&self, public_key: &[u8]) -> Result<VerityData> {
        if self.is_compressed() {
            return Err(anyhow!(
                "cannot verify verity data of compressed package: {}",
                self.path.display()
            ));
        }
        if public_key != self.public_key.as_slice() {
            return Err(anyhow!(
                "public key does not match the key bundled in {}",
                self.path.display()
            ));
        }

        let descriptor_path = self.path.join(VERITY_ENTRY);
        let raw = fs::read_to_string(&descriptor_path).with_context(|| {
            format!(
                "failed to read verity descriptor: {}",
                descriptor_path.display()
            )
        })?;
        let descriptor = VerityDescriptor::from_json_str(&raw)?;
        descriptor
            .verify(public_key)
            .with_context(|| format!("failed to verify verity data of {}", self.path.display()))
    }
}
