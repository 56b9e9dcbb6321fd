use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::artifacts::{
    ArtifactInstructions, ArtifactRootDescriptor, DestinationInfo, JarInfo, SourceFilter,
};
use crate::error::Result;
use crate::fs_state::FsState;
use crate::model::{GlobalConfig, ProjectModel, SourceRoot};
use crate::storage::{BuildDataManager, project_data_dir};

/// The server-side loaded representation of one project: its immutable
/// model snapshot plus the mutable build-tracking state it owns for its
/// lifetime in the cache.
pub struct ProjectDescriptor {
    pub name: String,
    pub root: PathBuf,
    pub model: ProjectModel,
    pub data: BuildDataManager,
    pub artifacts: Mutex<ArtifactInstructions>,
    fs_state: Mutex<FsState>,
    build_lock: tokio::sync::Mutex<()>,
}

impl ProjectDescriptor {
    /// Loads the project model and opens its build storages. Nothing is
    /// cached on failure: the caller gets an error and no descriptor.
    pub fn load(project_root: &Path, globals: &GlobalConfig, data_base: &Path) -> Result<Self> {
        let model = ProjectModel::load(project_root, globals)?;
        let data = BuildDataManager::open(&project_data_dir(data_base, project_root))?;
        let artifacts = build_artifact_registry(&model);

        tracing::info!(
            "loaded project '{}' with {} module(s) from {}",
            model.name,
            model.modules.len(),
            project_root.display()
        );

        Ok(Self {
            name: model.name.clone(),
            root: project_root.to_path_buf(),
            model,
            data,
            artifacts: Mutex::new(artifacts),
            fs_state: Mutex::new(FsState::new()),
            build_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn lock_fs_state(&self) -> MutexGuard<'_, FsState> {
        self.fs_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// At most one build runs against a descriptor at a time; concurrent
    /// requests for the same project queue here.
    pub async fn lock_build(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.build_lock.lock().await
    }

    /// The module and source root owning a file, if any.
    pub fn find_root(&self, file: &Path) -> Option<(&str, &SourceRoot)> {
        for module in &self.model.modules {
            for root in &module.source_roots {
                if file.starts_with(&root.path) {
                    return Some((module.name.as_str(), root));
                }
            }
        }
        None
    }

    /// Flushes the storages before the descriptor leaves the cache.
    pub fn close(&self) {
        if let Err(err) = self.data.flush() {
            tracing::warn!("failed to flush build data for '{}': {err}", self.name);
        }
        tracing::debug!("closed project descriptor '{}'", self.name);
    }
}

/// Registers packaging instructions for every module that declares a jar
/// artifact. Duplicate jar outputs keep the first registration; an output
/// root that is its own destination is skipped entirely.
fn build_artifact_registry(model: &ProjectModel) -> ArtifactInstructions {
    let mut artifacts = ArtifactInstructions::new();
    let mut index = 0u32;

    for module in &model.modules {
        let Some(jar_output) = &module.jar_output else {
            continue;
        };

        let mut root_indexes = Vec::new();
        for output in [&module.output, &module.test_output]
            .into_iter()
            .flatten()
        {
            let descriptor = ArtifactRootDescriptor {
                root: output.clone(),
                filter: SourceFilter::Extensions(vec!["class".to_string()]),
                index,
                target: module.name.clone(),
                file_based: false,
            };
            let accepted = artifacts.add_destination(
                &descriptor,
                DestinationInfo {
                    output_path: jar_output.clone(),
                    file_based: true,
                },
            );
            if accepted {
                root_indexes.push(index);
            }
            index += 1;
        }

        let registered = artifacts.register_jar_file(
            JarInfo {
                name: module.name.clone(),
                root_indexes,
            },
            jar_output,
        );
        if !registered {
            tracing::debug!(
                "jar output {} already registered; keeping the first owner",
                jar_output.display()
            );
        }
    }

    artifacts
}
