use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use apexd_core::unique_suffix;

/// Returns `true` when something was removed.
pub(crate) fn remove_dir_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Moves `src` to `dst`, copying through a staged sibling when a plain
/// rename is not possible (e.g. across filesystems).
pub(crate) fn move_dir_or_copy(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    let staged = staged_sibling(dst)?;
    if let Err(err) = copy_dir_recursive(src, &staged).and_then(|_| {
        fs::rename(&staged, dst).with_context(|| {
            format!(
                "failed to move staged copy {} to {}",
                staged.display(),
                dst.display()
            )
        })
    }) {
        let _ = fs::remove_dir_all(&staged);
        return Err(err);
    }

    fs::remove_dir_all(src)
        .with_context(|| format!("failed to remove moved directory: {}", src.display()))
}

fn staged_sibling(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .ok_or_else(|| anyhow!("path has no file name: {}", path.display()))?;
    Ok(path.with_file_name(format!(".{file_name}.staged-{}", unique_suffix())))
}

pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("failed to read {}", src.display()))? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else if file_type.is_file() {
            fs::copy(&from, &to).with_context(|| {
                format!("failed to copy {} to {}", from.display(), to.display())
            })?;
        }
    }
    Ok(())
}
