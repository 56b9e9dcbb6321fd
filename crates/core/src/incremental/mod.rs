//! The incremental build orchestrator: module chunking, the ordered
//! builder registry, and the per-build compile context.

pub mod java;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use buildlink_proto::{BuildType, CompileMessage, ExitCode, MessageKind};
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use tokio_util::sync::CancellationToken;

use crate::descriptor::ProjectDescriptor;
use crate::error::{BuildError, Result};
use crate::model::ProjectModel;
use crate::scope::CompileScope;
use crate::service::MessageHandler;

/// Interdependent modules are grouped into a chunk and compiled together so
/// references between them resolve.
#[derive(Debug, Clone)]
pub struct ModuleChunk {
    pub modules: Vec<String>,
}

impl ModuleChunk {
    pub fn name(&self) -> String {
        self.modules.join("+")
    }
}

/// Chunks in build order: dependencies come before their dependents.
pub fn module_chunks(model: &ProjectModel) -> Vec<ModuleChunk> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes = HashMap::new();
    for module in &model.modules {
        let index = graph.add_node(module.name.as_str());
        nodes.insert(module.name.as_str(), index);
    }
    for module in &model.modules {
        for dep in &module.dependencies {
            if let (Some(&from), Some(&to)) =
                (nodes.get(module.name.as_str()), nodes.get(dep.as_str()))
            {
                graph.add_edge(from, to, ());
            }
        }
    }

    // Tarjan yields components in reverse topological order, which for
    // dependent -> dependency edges means dependencies first.
    tarjan_scc(&graph)
        .into_iter()
        .map(|component| ModuleChunk {
            modules: component
                .into_iter()
                .map(|index| graph[index].to_string())
                .collect(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderExit {
    Ok,
    /// The builder wants the whole build stopped.
    Abort,
}

pub trait Builder: Send + Sync {
    fn name(&self) -> &'static str;
    fn build(&self, context: &CompileContext<'_>, chunk: &ModuleChunk) -> Result<BuilderExit>;
}

/// Builders with their explicit execution order, declared at registration
/// time.
#[derive(Default)]
pub struct BuilderRegistry {
    builders: Vec<(u32, Arc<dyn Builder>)>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, order: u32, builder: Arc<dyn Builder>) {
        self.builders.push((order, builder));
        self.builders.sort_by_key(|(order, _)| *order);
    }

    pub fn ordered(&self) -> impl Iterator<Item = &Arc<dyn Builder>> {
        self.builders.iter().map(|(_, builder)| builder)
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}

/// Everything a builder may consult while building one scope.
pub struct CompileContext<'a> {
    pub descriptor: &'a ProjectDescriptor,
    pub scope: &'a CompileScope,
    /// Ignore timestamps and recompile everything in scope.
    pub forced: bool,
    /// Incremental build: deletions are processed and dirty marks cleared.
    pub make: bool,
    handler: &'a dyn MessageHandler,
    cancel: &'a CancellationToken,
    errors: AtomicUsize,
    warnings: AtomicUsize,
}

impl<'a> CompileContext<'a> {
    pub fn message(&self, message: CompileMessage) {
        match message.kind {
            MessageKind::Error => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            MessageKind::Warning => {
                self.warnings.fetch_add(1, Ordering::Relaxed);
            }
            MessageKind::Info => {}
        }
        self.handler.compile_message(message);
    }

    pub fn progress(&self, text: impl Into<String>) {
        self.handler.progress(&text.into());
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn check_canceled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(BuildError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Runs the registered builders over the chunks a scope selects.
pub struct IncrementalBuilder<'a> {
    descriptor: &'a ProjectDescriptor,
    registry: &'a BuilderRegistry,
    handler: &'a dyn MessageHandler,
    cancel: &'a CancellationToken,
}

impl<'a> IncrementalBuilder<'a> {
    pub fn new(
        descriptor: &'a ProjectDescriptor,
        registry: &'a BuilderRegistry,
        handler: &'a dyn MessageHandler,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            descriptor,
            registry,
            handler,
            cancel,
        }
    }

    /// Drives one build request to a final status. Build problems never
    /// escape this boundary; they come back as the exit code.
    pub fn run(&self, scope: &CompileScope, build_type: BuildType) -> ExitCode {
        match self.try_run(scope, build_type) {
            Ok(code) => code,
            Err(BuildError::Canceled) => {
                self.handler.progress("The build has been canceled");
                ExitCode::Canceled
            }
            Err(err) => {
                self.handler
                    .compile_message(CompileMessage::error(err.to_string()));
                ExitCode::Errors
            }
        }
    }

    fn try_run(&self, scope: &CompileScope, build_type: BuildType) -> Result<ExitCode> {
        if build_type == BuildType::Clean {
            self.clean_scope(scope)?;
            return Ok(ExitCode::Ok);
        }

        let context = CompileContext {
            descriptor: self.descriptor,
            scope,
            forced: matches!(
                build_type,
                BuildType::Rebuild | BuildType::ForcedCompilation
            ),
            make: build_type == BuildType::Make,
            handler: self.handler,
            cancel: self.cancel,
            errors: AtomicUsize::new(0),
            warnings: AtomicUsize::new(0),
        };

        if build_type == BuildType::Rebuild {
            // Everything is rebuilt from scratch: drop recorded outputs and
            // reset the bookkeeping before the first builder runs.
            self.clean_scope(scope)?;
            self.descriptor.data.clean();
            self.descriptor.lock_fs_state().on_rebuild();
        }

        for chunk in module_chunks(&self.descriptor.model) {
            if !chunk.modules.iter().any(|m| scope.contains(m)) {
                continue;
            }
            context.check_canceled()?;

            if context.make {
                self.process_deletions(&chunk);
            }

            for builder in self.registry.ordered() {
                context.check_canceled()?;
                match builder.build(&context, &chunk) {
                    Ok(BuilderExit::Ok) => {}
                    Ok(BuilderExit::Abort) => {
                        return Err(BuildError::Abort(builder.name().to_string()));
                    }
                    Err(BuildError::Canceled) => return Err(BuildError::Canceled),
                    Err(err) => {
                        // Diagnostics already went out as messages; the
                        // summary closes out the failed invocation.
                        context.message(CompileMessage::error(err.to_string()));
                        return Ok(ExitCode::Errors);
                    }
                }
            }
        }

        Ok(if context.error_count() > 0 {
            ExitCode::Errors
        } else {
            ExitCode::Ok
        })
    }

    /// Deletes outputs recorded for sources that disappeared, and forgets
    /// their bookkeeping, before the chunk's builders run.
    fn process_deletions(&self, chunk: &ModuleChunk) {
        for module in &chunk.modules {
            let deleted = self.descriptor.lock_fs_state().take_deleted(module);
            for source in deleted {
                for output in self.descriptor.data.outputs.remove_source(&source) {
                    remove_output_file(&output);
                }
                self.descriptor.data.timestamps.remove_file(&source);
            }
        }
    }

    /// CLEAN: delete every recorded output under the scope's source roots
    /// and drop the matching bookkeeping. Output directories stay in place.
    fn clean_scope(&self, scope: &CompileScope) -> Result<()> {
        for module_name in scope.modules() {
            let Some(module) = self.descriptor.model.module(module_name) else {
                continue;
            };
            let roots: Vec<PathBuf> = module
                .source_roots
                .iter()
                .map(|root| root.path.clone())
                .collect();

            for source in self.descriptor.data.outputs.sources_under(&roots) {
                self.descriptor.data.timestamps.remove_file(&source);
            }
            let outputs = self.descriptor.data.outputs.take_outputs_under(&roots);
            for output in &outputs {
                remove_output_file(output);
            }
            self.descriptor.lock_fs_state().clear_module(module_name);

            self.handler.progress(&format!(
                "Cleaned {} output file(s) [{module_name}]",
                outputs.len()
            ));
        }
        Ok(())
    }
}

fn remove_output_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!("cannot delete output {}: {err}", path.display()),
    }
}
