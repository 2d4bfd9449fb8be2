//! Crash-safe file writes: write to a hidden temp sibling, fsync, rename.
//!
//! A reader either sees the previous file (or nothing) or the complete new
//! file, never a prefix. Each writer gets its own uniquely named temp file in
//! the destination directory, so concurrent writers never share a temp path
//! and the rename never crosses a filesystem boundary. The last rename wins.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use tempfile::{Builder, NamedTempFile};

/// Atomically replace `path` with `data`.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    copy_atomic(&mut io::Cursor::new(data), path).map(|_| ())
}

/// Stream `reader` into `path` atomically. Returns the number of bytes written.
///
/// On any failure the temp file is removed and `path` is left untouched.
pub fn copy_atomic(reader: &mut dyn Read, path: &Path) -> io::Result<u64> {
    let mut tmp = temp_file_for(path)?;
    let n = io::copy(reader, tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    // Dropping a NamedTempFile on any early return deletes it.
    tmp.persist(path).map_err(|e| e.error)?;
    sync_parent(path)?;
    Ok(n)
}

/// `.<name>.<random>.tmp` next to `path`.
fn temp_file_for(path: &Path) -> io::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => fs::File::open(dir)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    // Directory handles cannot be fsynced here; rename is still atomic.
    Ok(())
}

/// Leftover temp files for `path`; empty after every completed or failed write.
#[cfg(test)]
pub(crate) fn stray_temp_files(path: &Path) -> Vec<std::path::PathBuf> {
    let Some(dir) = path.parent() else { return Vec::new() };
    let prefix = format!(".{}.", path.file_name().unwrap_or_default().to_string_lossy());
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    let n = p.file_name().unwrap_or_default().to_string_lossy();
                    n.starts_with(&prefix) && n.ends_with(".tmp")
                })
                .collect()
        })
        .unwrap_or_default()
}
