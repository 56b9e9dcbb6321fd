use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::util::path_key;

/// Persistent record of which output files each source file produced, per
/// builder. Consulted to delete stale outputs when a source is deleted or
/// the scope is cleaned.
pub struct SourceOutputIndex {
    path: PathBuf,
    // builder name -> source path key -> output path keys
    map: Mutex<HashMap<String, HashMap<String, Vec<String>>>>,
    modified: AtomicBool,
}

impl SourceOutputIndex {
    pub fn open(path: PathBuf) -> Self {
        let map = super::read_or_default(&path);
        Self {
            path,
            map: Mutex::new(map),
            modified: AtomicBool::new(false),
        }
    }

    pub fn outputs(&self, builder: &str, source: &Path) -> Vec<PathBuf> {
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(builder)
            .and_then(|sources| sources.get(&path_key(source)))
            .map(|outputs| outputs.iter().map(PathBuf::from).collect())
            .unwrap_or_default()
    }

    /// Replaces the recorded outputs for a source file.
    pub fn set_outputs(&self, builder: &str, source: &Path, outputs: &[PathBuf]) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(builder.to_string())
            .or_default()
            .insert(path_key(source), outputs.iter().map(|p| path_key(p)).collect());
        self.modified.store(true, Ordering::Release);
    }

    /// Removes a source file's entries for every builder, returning all
    /// output paths that were recorded for it.
    pub fn remove_source(&self, source: &Path) -> Vec<PathBuf> {
        let key = path_key(source);
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = Vec::new();
        for sources in map.values_mut() {
            if let Some(outputs) = sources.remove(&key) {
                removed.extend(outputs.into_iter().map(PathBuf::from));
            }
        }
        if !removed.is_empty() {
            self.modified.store(true, Ordering::Release);
        }
        removed
    }

    /// Removes every entry whose source lives under one of the given roots,
    /// returning the recorded output paths. Used by CLEAN.
    pub fn take_outputs_under(&self, roots: &[PathBuf]) -> Vec<PathBuf> {
        let root_keys: Vec<String> = roots.iter().map(|r| path_key(r)).collect();
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        let mut taken = Vec::new();
        for sources in map.values_mut() {
            sources.retain(|source, outputs| {
                let under = root_keys
                    .iter()
                    .any(|root| source.starts_with(root.as_str()));
                if under {
                    taken.extend(outputs.iter().map(PathBuf::from));
                }
                !under
            });
        }
        if !taken.is_empty() {
            self.modified.store(true, Ordering::Release);
        }
        taken
    }

    /// Source paths recorded under the given roots (CLEAN uses this to drop
    /// the matching timestamp entries).
    pub fn sources_under(&self, roots: &[PathBuf]) -> Vec<PathBuf> {
        let root_keys: Vec<String> = roots.iter().map(|r| path_key(r)).collect();
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        let mut result = Vec::new();
        for sources in map.values() {
            for source in sources.keys() {
                if root_keys.iter().any(|root| source.starts_with(root.as_str())) {
                    result.push(PathBuf::from(source));
                }
            }
        }
        result.sort();
        result.dedup();
        result
    }

    pub fn clean(&self) {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.modified.store(true, Ordering::Release);
    }

    pub fn flush(&self) -> Result<()> {
        if !self.modified.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let snapshot = self
            .map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        super::write_atomic(&self.path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_roundtrip_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let index = SourceOutputIndex::open(dir.path().join("outputs.bin"));
        let source = Path::new("/p/src/A.java");
        let outputs = vec![PathBuf::from("/p/out/A.class")];

        index.set_outputs("java", source, &outputs);
        assert_eq!(index.outputs("java", source), outputs);

        let removed = index.remove_source(source);
        assert_eq!(removed, outputs);
        assert!(index.outputs("java", source).is_empty());
    }

    #[test]
    fn take_outputs_under_selects_by_root() {
        let dir = tempfile::tempdir().unwrap();
        let index = SourceOutputIndex::open(dir.path().join("outputs.bin"));
        index.set_outputs(
            "java",
            Path::new("/p/app/src/A.java"),
            &[PathBuf::from("/p/app/out/A.class")],
        );
        index.set_outputs(
            "java",
            Path::new("/p/util/src/B.java"),
            &[PathBuf::from("/p/util/out/B.class")],
        );

        let taken = index.take_outputs_under(&[PathBuf::from("/p/app/src")]);
        assert_eq!(taken, vec![PathBuf::from("/p/app/out/A.class")]);
        assert!(index.outputs("java", Path::new("/p/app/src/A.java")).is_empty());
        assert!(!index.outputs("java", Path::new("/p/util/src/B.java")).is_empty());
    }
}
