use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};

/// Process-and-time suffix for temp and staged sibling names.
pub fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}-{}", std::process::id(), nanos)
}

/// Writes `contents` to a sibling temp file, syncs it and renames it over
/// `path`. Readers observe either the previous file or the new one.
pub fn write_file_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    write_atomically(path, |writer| writer.write_all(contents))
}

/// Streams into a sibling temp file through `fill`, then renames it over
/// `path`.
///
/// Once the rename has happened the new file is the committed one, so a
/// failure to sync the parent directory afterwards is only logged.
pub fn write_atomically<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path has no parent directory: {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .ok_or_else(|| anyhow!("path has no file name: {}", path.display()))?;
    let tmp_path = parent.join(format!(".{file_name}.tmp-{}", unique_suffix()));

    let result = write_and_sync(&tmp_path, fill).and_then(|_| {
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "failed to rename {} over {}",
                tmp_path.display(),
                path.display()
            )
        })
    });
    if let Err(err) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    if let Err(err) = sync_dir(parent) {
        log::warn!(
            "{} was replaced but its directory could not be synced: {err:#}",
            path.display()
        );
    }
    Ok(())
}

fn write_and_sync<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("failed to create temp file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    fill(&mut writer).with_context(|| format!("failed to write temp file: {}", path.display()))?;
    let file = writer
        .into_inner()
        .map_err(|err| err.into_error())
        .with_context(|| format!("failed to flush temp file: {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync temp file: {}", path.display()))
}

#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)
        .and_then(|handle| handle.sync_all())
        .with_context(|| format!("failed to sync directory: {}", dir.display()))
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
