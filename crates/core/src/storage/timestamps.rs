use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::util::path_key;

/// Persistent map from `(builder, source file)` to the modification time
/// recorded at the file's last successful compilation.
///
/// The invariant driving MAKE: when the stored stamp equals the file's
/// current on-disk mtime, the file is up to date for that builder.
pub struct Timestamps {
    path: PathBuf,
    // builder name -> source path key -> mtime millis
    map: Mutex<HashMap<String, HashMap<String, u64>>>,
    modified: AtomicBool,
}

impl Timestamps {
    pub fn open(path: PathBuf) -> Self {
        let map = super::read_or_default(&path);
        Self {
            path,
            map: Mutex::new(map),
            modified: AtomicBool::new(false),
        }
    }

    pub fn stamp(&self, builder: &str, file: &Path) -> Option<u64> {
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(builder)?.get(&path_key(file)).copied()
    }

    pub fn save_stamp(&self, builder: &str, file: &Path, mtime: u64) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(builder.to_string())
            .or_default()
            .insert(path_key(file), mtime);
        self.modified.store(true, Ordering::Release);
    }

    pub fn remove_stamp(&self, builder: &str, file: &Path) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stamps) = map.get_mut(builder)
            && stamps.remove(&path_key(file)).is_some()
        {
            self.modified.store(true, Ordering::Release);
        }
    }

    /// Forgets a file for every builder, e.g. when the source is deleted.
    pub fn remove_file(&self, file: &Path) {
        let key = path_key(file);
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        for stamps in map.values_mut() {
            removed |= stamps.remove(&key).is_some();
        }
        if removed {
            self.modified.store(true, Ordering::Release);
        }
    }

    pub fn clean(&self) {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.modified.store(true, Ordering::Release);
    }

    pub fn flush(&self) -> Result<()> {
        if !self.modified.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let snapshot = self.map.lock().unwrap_or_else(PoisonError::into_inner).clone();
        super::write_atomic(&self.path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timestamps.bin");
        let file = Path::new("/p/src/A.java");

        let storage = Timestamps::open(path.clone());
        storage.save_stamp("java", file, 1234);
        storage.flush().unwrap();

        let reopened = Timestamps::open(path);
        assert_eq!(reopened.stamp("java", file), Some(1234));
        assert_eq!(reopened.stamp("other", file), None);
    }

    #[test]
    fn corrupt_storage_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timestamps.bin");
        std::fs::write(&path, b"not messagepack at all").unwrap();

        let storage = Timestamps::open(path);
        assert_eq!(storage.stamp("java", Path::new("/p/src/A.java")), None);
    }

    #[test]
    fn clean_forgets_everything() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Timestamps::open(dir.path().join("timestamps.bin"));
        let file = Path::new("/p/src/A.java");
        storage.save_stamp("java", file, 42);
        storage.clean();
        assert_eq!(storage.stamp("java", file), None);
    }
}
