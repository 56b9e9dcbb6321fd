use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Last modification time in milliseconds since the epoch. This is the
/// value stored in the timestamp storage and compared on MAKE.
pub fn mtime_millis(path: &Path) -> std::io::Result<u64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0))
}

/// Canonical form of a path, falling back to the path itself for files
/// that do not exist yet (e.g. output paths before the first build).
pub fn canonical_or_self(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Stable string key for storage maps.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
