//! Atomic file replacement for the runtime directory's state files.

use std::io::{self, Write};
use std::path::Path;

/// Replace `path` with `content` via a temp file in the same directory.
///
/// The temp file gets a random name and mode 0600, and `rename` swaps it in,
/// so readers see either the previous content or the new content in full.
/// An existing symlink at `path` is replaced, not followed.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .map(|name| format!(".{}.", name.to_string_lossy()))
        .unwrap_or_else(|| ".tmp.".to_string());

    let mut temp_file = tempfile::Builder::new()
        .prefix(&prefix)
        .tempfile_in(parent)?;
    temp_file.write_all(content)?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
