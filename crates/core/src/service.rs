use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use buildlink_proto::{BuildType, CompileMessage, ExitCode};
use tokio_util::sync::CancellationToken;

use crate::compiler::BatchCompiler;
use crate::descriptor::ProjectDescriptor;
use crate::error::{BuildError, Result};
use crate::incremental::java::JavaBuilder;
use crate::incremental::{BuilderRegistry, IncrementalBuilder};
use crate::model::GlobalConfig;
use crate::scope::CompileScope;
use crate::util::canonical_or_self;

/// Receives the structured messages a build produces. Implementations
/// forward them to whatever consumer asked for the build (a connection,
/// a log, a test).
pub trait MessageHandler: Send + Sync {
    fn compile_message(&self, message: CompileMessage);
    fn progress(&self, text: &str);
}

/// Cache entry for one project path. Insertion into the cache is
/// serialized by the configuration lock; the descriptor itself is loaded
/// lazily outside of it, so loading one project never blocks another.
struct ProjectSlot {
    root: PathBuf,
    cell: tokio::sync::OnceCell<Arc<ProjectDescriptor>>,
}

impl ProjectSlot {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            cell: tokio::sync::OnceCell::new(),
        }
    }
}

struct ServiceState {
    globals: GlobalConfig,
    projects: HashMap<PathBuf, Arc<ProjectSlot>>,
}

/// The process-wide build service: a table from project path to its loaded
/// descriptor, guarded by a single configuration lock. Constructed
/// explicitly and handed to its consumers; start/stop is the owner's call.
pub struct BuildService {
    data_root: PathBuf,
    compiler: Arc<dyn BatchCompiler>,
    registry: Arc<BuilderRegistry>,
    state: Mutex<ServiceState>,
}

impl BuildService {
    pub fn new(data_root: PathBuf, compiler: Arc<dyn BatchCompiler>) -> Self {
        let mut registry = BuilderRegistry::new();
        registry.register(100, Arc::new(JavaBuilder::new(Arc::clone(&compiler))));

        Self {
            data_root,
            compiler,
            registry: Arc::new(registry),
            state: Mutex::new(ServiceState {
                globals: GlobalConfig::default(),
                projects: HashMap::new(),
            }),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the global configuration. Classpath and path-variable
    /// changes invalidate every loaded project, so the whole cache is
    /// flushed and evicted; the next build of each project reloads it.
    pub fn set_globals(&self, globals: GlobalConfig) {
        let mut state = self.lock_state();
        for (_, slot) in state.projects.drain() {
            if let Some(descriptor) = slot.cell.get() {
                descriptor.close();
            }
        }
        state.globals = globals;
        tracing::info!("global configuration updated; project cache cleared");
    }

    /// Marks a file dirty in the owning project's FS state. A project that
    /// is not cached has nothing to invalidate: silent no-op.
    pub fn notify_file_changed(&self, project_root: &Path, file: &Path) {
        self.with_descriptor(project_root, |descriptor| {
            if let Some((module, _root)) = descriptor.find_root(file) {
                let module = module.to_string();
                descriptor
                    .lock_fs_state()
                    .mark_dirty(&module, file.to_path_buf());
            }
        });
    }

    pub fn notify_file_deleted(&self, project_root: &Path, file: &Path) {
        self.with_descriptor(project_root, |descriptor| {
            if let Some((module, _root)) = descriptor.find_root(file) {
                let module = module.to_string();
                descriptor
                    .lock_fs_state()
                    .mark_deleted(&module, file.to_path_buf());
            }
        });
    }

    /// Routes a raw file-watch event to whichever cached project owns the
    /// path. Files outside any cached project are ignored.
    pub fn route_file_event(&self, file: &Path, deleted: bool) {
        let descriptors = self.loaded_descriptors();
        for descriptor in descriptors {
            if let Some((module, _root)) = descriptor.find_root(file) {
                let module = module.to_string();
                let mut fs_state = descriptor.lock_fs_state();
                if deleted {
                    fs_state.mark_deleted(&module, file.to_path_buf());
                } else {
                    fs_state.mark_dirty(&module, file.to_path_buf());
                }
            }
        }
    }

    /// Runs one build request to completion and returns its exit code.
    ///
    /// The descriptor slot is fetched or created under the configuration
    /// lock; the (possibly slow) load from disk happens outside it. A load
    /// failure is returned to the caller and the slot is evicted so the
    /// broken state is never cached. Builds of the same project serialize
    /// on the descriptor's build lock; different projects run concurrently.
    pub async fn start_build(
        &self,
        project_root: &Path,
        modules: &[String],
        build_type: BuildType,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<ExitCode> {
        let key = canonical_or_self(project_root);
        let (slot, globals) = {
            let mut state = self.lock_state();
            let slot = state
                .projects
                .entry(key.clone())
                .or_insert_with(|| Arc::new(ProjectSlot::new(key.clone())))
                .clone();
            (slot, state.globals.clone())
        };

        let descriptor = {
            let data_root = self.data_root.clone();
            let root = slot.root.clone();
            let load = slot.cell.get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || {
                    ProjectDescriptor::load(&root, &globals, &data_root).map(Arc::new)
                })
                .await
                .map_err(|err| BuildError::Internal(err.to_string()))?
            });
            match load.await {
                Ok(descriptor) => Arc::clone(descriptor),
                Err(err) => {
                    self.evict_unloaded(&key);
                    return Err(err);
                }
            }
        };

        let _build_guard = descriptor.lock_build().await;
        let scope = CompileScope::resolve(&descriptor.model, modules)?;

        let result = {
            let descriptor = Arc::clone(&descriptor);
            let registry = Arc::clone(&self.registry);
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            let scope = scope.clone();
            tokio::task::spawn_blocking(move || {
                IncrementalBuilder::new(&descriptor, &registry, handler.as_ref(), &cancel)
                    .run(&scope, build_type)
            })
            .await
            .map_err(|err| BuildError::Internal(err.to_string()))
        };

        // Post-build cleanup runs no matter how the build ended.
        if let Err(err) = descriptor.data.flush() {
            tracing::warn!("failed to flush build data for '{}': {err}", descriptor.name);
        }
        self.compiler.cleanup();

        result
    }

    /// Evicts and closes the named projects, e.g. when the consuming
    /// application closes them.
    pub fn clear_project_cache(&self, project_roots: &[PathBuf]) {
        let mut state = self.lock_state();
        for root in project_roots {
            let key = canonical_or_self(root);
            if let Some(slot) = state.projects.remove(&key)
                && let Some(descriptor) = slot.cell.get()
            {
                descriptor.close();
            }
        }
    }

    pub fn cached_project_count(&self) -> usize {
        self.lock_state().projects.len()
    }

    /// The loaded descriptor for a project, if it is currently cached.
    pub fn cached_descriptor(&self, project_root: &Path) -> Option<Arc<ProjectDescriptor>> {
        let key = canonical_or_self(project_root);
        let state = self.lock_state();
        state
            .projects
            .get(&key)
            .and_then(|slot| slot.cell.get().cloned())
    }

    fn loaded_descriptors(&self) -> Vec<Arc<ProjectDescriptor>> {
        let state = self.lock_state();
        state
            .projects
            .values()
            .filter_map(|slot| slot.cell.get().cloned())
            .collect()
    }

    fn with_descriptor(&self, project_root: &Path, f: impl FnOnce(&ProjectDescriptor)) {
        let key = canonical_or_self(project_root);
        let descriptor = {
            let state = self.lock_state();
            state
                .projects
                .get(&key)
                .and_then(|slot| slot.cell.get().cloned())
        };
        if let Some(descriptor) = descriptor {
            f(&descriptor);
        }
    }

    /// Removes a slot whose load failed so the next request retries from
    /// scratch instead of hitting a cached failure.
    fn evict_unloaded(&self, key: &Path) {
        let mut state = self.lock_state();
        if let Some(slot) = state.projects.get(key)
            && slot.cell.get().is_none()
        {
            state.projects.remove(key);
        }
    }
}
