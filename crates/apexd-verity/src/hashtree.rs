use std::io::{self, Read, Write};

use anyhow::{Context, Result};
use apexd_core::validate_block_size;
use apexd_security::{salted_sha256, Sha256Digest, SHA256_DIGEST_LEN};

use crate::HashtreeError;

/// Level sizes of the hashtree covering a payload of a given length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashtreeLayout {
    block_size: u32,
    /// Byte length of each level, bottom level first.
    level_sizes: Vec<u64>,
}

impl HashtreeLayout {
    pub fn for_payload(payload_size: u64, block_size: u32) -> Result<Self, HashtreeError> {
        check_block_size(block_size)?;
        if payload_size == 0 {
            return Err(HashtreeError::EmptyImage);
        }

        let block = u64::from(block_size);
        let mut blocks = payload_size.div_ceil(block);
        let mut level_sizes = Vec::new();
        loop {
            let level_size = (blocks * SHA256_DIGEST_LEN as u64).div_ceil(block) * block;
            level_sizes.push(level_size);
            if level_size <= block {
                break;
            }
            blocks = level_size / block;
        }

        Ok(Self {
            block_size,
            level_sizes,
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn level_count(&self) -> usize {
        self.level_sizes.len()
    }

    /// Size of the side file holding every level.
    pub fn tree_size(&self) -> u64 {
        self.level_sizes.iter().sum()
    }
}

/// A fully computed hashtree.
///
/// Data blocks are hashed as `SHA-256(salt || block)`, the last one zero
/// padded. Each level is zero padded to a whole block and hashed again
/// until a level fits in a single block; the root digest is the salted
/// hash of that top block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hashtree {
    layout: HashtreeLayout,
    /// Bottom level first.
    levels: Vec<Vec<u8>>,
    root_digest: Sha256Digest,
    data_size: u64,
}

impl Hashtree {
    /// Streams `payload` block by block and builds every level.
    pub fn build(payload: &mut dyn Read, block_size: u32, salt: &[u8]) -> Result<Self> {
        check_block_size(block_size)?;
        let block = block_size as usize;

        let mut data_size = 0_u64;
        let mut bottom = Vec::new();
        let mut buffer = vec![0_u8; block];
        loop {
            let filled = read_block(payload, &mut buffer).context("failed to read payload")?;
            if filled == 0 {
                break;
            }
            buffer[filled..].fill(0);
            bottom.extend_from_slice(&salted_sha256(salt, &buffer));
            data_size += filled as u64;
            if filled < block {
                break;
            }
        }

        let layout = HashtreeLayout::for_payload(data_size, block_size)?;
        pad_to_block(&mut bottom, block);
        let mut levels = vec![bottom];
        while let Some(level) = levels.last().filter(|level| level.len() > block) {
            let mut next: Vec<u8> = level
                .chunks(block)
                .flat_map(|chunk| salted_sha256(salt, chunk))
                .collect();
            pad_to_block(&mut next, block);
            levels.push(next);
        }

        let top = levels.last().map(Vec::as_slice).unwrap_or_default();
        let root_digest = salted_sha256(salt, top);
        Ok(Self {
            layout,
            levels,
            root_digest,
            data_size,
        })
    }

    pub fn root_digest(&self) -> &Sha256Digest {
        &self.root_digest
    }

    pub fn layout(&self) -> &HashtreeLayout {
        &self.layout
    }

    /// Number of payload bytes the tree covers.
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    /// Writes the levels top-down, the layout dm-verity expects.
    pub fn write_to(&self, writer: &mut dyn Write) -> io::Result<()> {
        for level in self.levels.iter().rev() {
            writer.write_all(level)?;
        }
        Ok(())
    }
}

fn check_block_size(block_size: u32) -> Result<(), HashtreeError> {
    validate_block_size(block_size).map_err(|_| HashtreeError::InvalidBlockSize { block_size })
}

fn pad_to_block(level: &mut Vec<u8>, block: usize) {
    let padded = level.len().div_ceil(block) * block;
    level.resize(padded, 0);
}

/// Fills `buffer` unless the stream ends first; returns the bytes read.
fn read_block(reader: &mut dyn Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
