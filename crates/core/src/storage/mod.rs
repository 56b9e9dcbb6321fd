//! Persistent build bookkeeping: per-builder timestamps and the
//! source-to-output index. Both live in the per-project data directory and
//! are flushed after every build.

pub mod outputs;
pub mod timestamps;

use std::path::{Path, PathBuf};

use xxhash_rust::xxh3::xxh3_64;

pub use outputs::SourceOutputIndex;
pub use timestamps::Timestamps;

use crate::error::Result;
use crate::util::canonical_or_self;

/// Owns the storages of one project descriptor for its lifetime.
pub struct BuildDataManager {
    pub timestamps: Timestamps,
    pub outputs: SourceOutputIndex,
}

impl BuildDataManager {
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            timestamps: Timestamps::open(data_dir.join("timestamps.bin")),
            outputs: SourceOutputIndex::open(data_dir.join("outputs.bin")),
        })
    }

    /// Drops all recorded build state (rebuild / storage reset).
    pub fn clean(&self) {
        self.timestamps.clean();
        self.outputs.clean();
    }

    pub fn flush(&self) -> Result<()> {
        self.timestamps.flush()?;
        self.outputs.flush()
    }
}

/// Data directory for a project, keyed by the hash of its canonical path so
/// two checkouts of the same name do not collide.
pub fn project_data_dir(base: &Path, project_root: &Path) -> PathBuf {
    let canonical = canonical_or_self(project_root);
    let hash = xxh3_64(canonical.to_string_lossy().as_bytes());
    base.join(format!("{hash:016x}"))
}

/// Serializes a value as MessagePack and writes it atomically (write to
/// temp, then rename), the same way the index snapshots are stored.
pub(crate) fn write_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = rmp_serde::to_vec(value)
        .map_err(|err| crate::error::BuildError::Storage(err.to_string()))?;
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, bytes)?;
    std::fs::rename(temp_path, path)?;
    Ok(())
}

/// Loads a MessagePack file, treating a corrupt or missing file as absent.
/// Corrupt bookkeeping only costs a recompile, never a broken build.
pub(crate) fn read_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    match std::fs::read(path) {
        Ok(bytes) => match rmp_serde::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    "corrupt build data at {}: {err}; starting fresh",
                    path.display()
                );
                let _ = std::fs::remove_file(path);
                T::default()
            }
        },
        Err(err) => {
            tracing::warn!("cannot read {}: {err}; starting fresh", path.display());
            T::default()
        }
    }
}
