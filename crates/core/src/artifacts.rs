//! Artifact packaging instructions: which source roots get copied or
//! archived where. Registration is deduplicated so each produced archive
//! has exactly one authoritative set of contents per build, and a root is
//! never scheduled to be copied onto itself.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::util::canonical_or_self;

/// Which files under a root participate in packaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFilter {
    All,
    Extensions(Vec<String>),
}

impl SourceFilter {
    pub fn accepts(&self, path: &Path) -> bool {
        match self {
            Self::All => true,
            Self::Extensions(extensions) => path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| e == ext)),
        }
    }
}

/// One packaging input: a root (file or directory), a filter, and the
/// output target it belongs to.
#[derive(Debug, Clone)]
pub struct ArtifactRootDescriptor {
    pub root: PathBuf,
    pub filter: SourceFilter,
    pub index: u32,
    pub target: String,
    /// True when the root is a single file rather than a directory tree.
    pub file_based: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationInfo {
    pub output_path: PathBuf,
    /// True when the destination is a plain file copy target.
    pub file_based: bool,
}

/// Describes one archive to be produced: its name and which root indexes
/// feed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JarInfo {
    pub name: String,
    pub root_indexes: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct CopyInstruction {
    pub root: ArtifactRootDescriptor,
    pub destination: DestinationInfo,
}

/// Collects the packaging instructions for one build.
#[derive(Debug, Default)]
pub struct ArtifactInstructions {
    instructions: Vec<CopyInstruction>,
    seen: HashSet<(PathBuf, PathBuf)>,
    jars: HashMap<PathBuf, JarInfo>,
}

impl ArtifactInstructions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a (root → destination) instruction.
    ///
    /// Returns `false` and records nothing when the destination is
    /// file-based and its output path canonically equals the root's own
    /// path: copying a file onto itself is forbidden. Re-registering an
    /// identical (root, output path) pair is an accepted no-op.
    pub fn add_destination(
        &mut self,
        root: &ArtifactRootDescriptor,
        destination: DestinationInfo,
    ) -> bool {
        if destination.file_based && root.file_based {
            let root_path = canonical_or_self(&root.root);
            let output_path = canonical_or_self(&destination.output_path);
            if root_path == output_path {
                return false;
            }
        }

        let pair = (root.root.clone(), destination.output_path.clone());
        if !self.seen.insert(pair) {
            return true;
        }

        self.instructions.push(CopyInstruction {
            root: root.clone(),
            destination,
        });
        true
    }

    /// Registers the archive produced at `output_path`. The first
    /// registration wins; duplicates are dropped, not overwritten.
    pub fn register_jar_file(&mut self, jar: JarInfo, output_path: &Path) -> bool {
        match self.jars.entry(output_path.to_path_buf()) {
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(jar);
                true
            }
            std::collections::hash_map::Entry::Occupied(_) => false,
        }
    }

    pub fn jar(&self, output_path: &Path) -> Option<&JarInfo> {
        self.jars.get(output_path)
    }

    pub fn instructions(&self) -> &[CopyInstruction] {
        &self.instructions
    }

    pub fn jar_count(&self) -> usize {
        self.jars.len()
    }
}
