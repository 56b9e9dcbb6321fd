use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Per-project record of files known to have changed or disappeared since
/// the last successful build. Fed by file-watch notifications, consumed and
/// pruned by the orchestrator as files are successfully processed.
#[derive(Debug, Default)]
pub struct FsState {
    dirty: HashMap<String, HashSet<PathBuf>>,
    deleted: HashMap<String, HashSet<PathBuf>>,
}

impl FsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&mut self, module: &str, file: PathBuf) {
        if let Some(set) = self.deleted.get_mut(module) {
            set.remove(&file);
        }
        self.dirty.entry(module.to_string()).or_default().insert(file);
    }

    pub fn mark_deleted(&mut self, module: &str, file: PathBuf) {
        if let Some(set) = self.dirty.get_mut(module) {
            set.remove(&file);
        }
        self.deleted
            .entry(module.to_string())
            .or_default()
            .insert(file);
    }

    pub fn is_dirty(&self, module: &str, file: &Path) -> bool {
        self.dirty
            .get(module)
            .is_some_and(|set| set.contains(file))
    }

    /// Removes the dirty mark once a file has been successfully processed.
    pub fn clear_dirty(&mut self, module: &str, file: &Path) {
        if let Some(set) = self.dirty.get_mut(module) {
            set.remove(file);
        }
    }

    /// Takes and clears the deletion records for a module.
    pub fn take_deleted(&mut self, module: &str) -> Vec<PathBuf> {
        self.deleted
            .remove(module)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn clear_module(&mut self, module: &str) {
        self.dirty.remove(module);
        self.deleted.remove(module);
    }

    /// Everything is stale after a rebuild; the records have no meaning.
    pub fn on_rebuild(&mut self) {
        self.dirty.clear();
        self.deleted.clear();
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.values().map(HashSet::len).sum()
    }
}
