//! The Java builder: filters the chunk's sources by extension and
//! staleness, drives the batch compiler, and keeps the timestamp and
//! source-to-output bookkeeping current.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use buildlink_proto::{CompileMessage, MessageKind};
use walkdir::WalkDir;

use crate::compiler::{BatchCompiler, CompileTask, Diagnostic, OutputGroup, Severity};
use crate::error::{BuildError, Result};
use crate::incremental::{Builder, BuilderExit, CompileContext, ModuleChunk};

pub const BUILDER_NAME: &str = "java";
const JAVA_EXTENSION: &str = "java";

pub struct JavaBuilder {
    compiler: Arc<dyn BatchCompiler>,
}

impl JavaBuilder {
    pub fn new(compiler: Arc<dyn BatchCompiler>) -> Self {
        Self { compiler }
    }
}

struct Candidate {
    module: String,
    output_dir: PathBuf,
    source: PathBuf,
    mtime: u64,
}

impl Builder for JavaBuilder {
    fn name(&self) -> &'static str {
        BUILDER_NAME
    }

    fn build(&self, context: &CompileContext<'_>, chunk: &ModuleChunk) -> Result<BuilderExit> {
        let candidates = self.collect_candidates(context, chunk)?;
        if candidates.is_empty() {
            return Ok(BuilderExit::Ok);
        }

        context.progress(format!(
            "Compiling {} source file(s) [{}]",
            candidates.len(),
            chunk.name()
        ));

        let task = build_task(context, chunk, &candidates);
        let mut error_count = 0usize;
        let mut warning_count = 0usize;
        let outcome = self.compiler.compile(&task, &mut |diagnostic| {
            match diagnostic.severity {
                Severity::Error => error_count += 1,
                Severity::Warning => warning_count += 1,
                Severity::Info => {}
            }
            context.message(to_message(diagnostic));
        })?;

        // Per-file progress is preserved no matter how the invocation as a
        // whole ended: successfully compiled files keep their new stamps so
        // the next incremental run skips them.
        let mtimes: HashMap<&PathBuf, u64> = candidates
            .iter()
            .map(|candidate| (&candidate.source, candidate.mtime))
            .collect();
        let modules: HashMap<&PathBuf, &str> = candidates
            .iter()
            .map(|candidate| (&candidate.source, candidate.module.as_str()))
            .collect();
        for compiled in &outcome.compiled {
            context
                .descriptor
                .data
                .outputs
                .set_outputs(BUILDER_NAME, &compiled.source, &compiled.outputs);
            if let Some(&mtime) = mtimes.get(&compiled.source) {
                context
                    .descriptor
                    .data
                    .timestamps
                    .save_stamp(BUILDER_NAME, &compiled.source, mtime);
            }
            if let Some(&module) = modules.get(&compiled.source) {
                context
                    .descriptor
                    .lock_fs_state()
                    .clear_dirty(module, &compiled.source);
            }
        }

        if !outcome.success || error_count > 0 {
            return Err(BuildError::CompilationFailed {
                errors: error_count,
                warnings: warning_count,
            });
        }
        Ok(BuilderExit::Ok)
    }
}

impl JavaBuilder {
    /// Walks the chunk's source roots and keeps the files this invocation
    /// must compile: everything when forced, otherwise the files whose
    /// stored stamp no longer matches the disk or that are marked dirty.
    fn collect_candidates(
        &self,
        context: &CompileContext<'_>,
        chunk: &ModuleChunk,
    ) -> Result<Vec<Candidate>> {
        let timestamps = &context.descriptor.data.timestamps;
        let mut candidates = Vec::new();

        for module_name in &chunk.modules {
            let Some(module) = context.descriptor.model.module(module_name) else {
                continue;
            };
            for root in &module.source_roots {
                if !root.path.is_dir() {
                    continue;
                }
                let output_dir = module.output_for(root.kind).cloned().ok_or_else(|| {
                    BuildError::Config(format!(
                        "module '{module_name}' has source root {} but no output path",
                        root.path.display()
                    ))
                })?;

                for entry in WalkDir::new(&root.path)
                    .into_iter()
                    .filter_map(|entry| entry.ok())
                {
                    let path = entry.path();
                    if !entry.file_type().is_file()
                        || path.extension().and_then(|e| e.to_str()) != Some(JAVA_EXTENSION)
                    {
                        continue;
                    }
                    let Ok(mtime) = crate::util::mtime_millis(path) else {
                        // The file vanished between the walk and the stat.
                        continue;
                    };

                    let up_to_date = !context.forced
                        && timestamps.stamp(BUILDER_NAME, path) == Some(mtime)
                        && !context
                            .descriptor
                            .lock_fs_state()
                            .is_dirty(module_name, path);
                    if up_to_date {
                        continue;
                    }

                    candidates.push(Candidate {
                        module: module_name.clone(),
                        output_dir: output_dir.clone(),
                        source: path.to_path_buf(),
                        mtime,
                    });
                }
            }
        }

        Ok(candidates)
    }
}

fn build_task(
    context: &CompileContext<'_>,
    chunk: &ModuleChunk,
    candidates: &[Candidate],
) -> CompileTask {
    let mut groups: Vec<OutputGroup> = Vec::new();
    for candidate in candidates {
        match groups.iter_mut().find(|group| {
            group.module == candidate.module && group.output_dir == candidate.output_dir
        }) {
            Some(group) => group.sources.push(candidate.source.clone()),
            None => groups.push(OutputGroup {
                module: candidate.module.clone(),
                output_dir: candidate.output_dir.clone(),
                sources: vec![candidate.source.clone()],
            }),
        }
    }

    CompileTask {
        chunk_name: chunk.name(),
        classpath: chunk_classpath(context, chunk),
        groups,
    }
}

/// Outputs of the chunk's own modules (they may reference each other),
/// their transitive dependencies' outputs, and the configured libraries.
fn chunk_classpath(context: &CompileContext<'_>, chunk: &ModuleChunk) -> Vec<PathBuf> {
    let model = &context.descriptor.model;
    let mut classpath = Vec::new();
    let mut push = |path: PathBuf| {
        if !classpath.contains(&path) {
            classpath.push(path);
        }
    };

    for module_name in &chunk.modules {
        let Some(module) = model.module(module_name) else {
            continue;
        };
        if let Some(output) = &module.output {
            push(output.clone());
        }
        if let Some(test_output) = &module.test_output {
            push(test_output.clone());
        }
        for path in &module.library_paths {
            push(path.clone());
        }
        for dep in model.dependency_closure(module_name) {
            if let Some(output) = &dep.output {
                push(output.clone());
            }
            if let Some(test_output) = &dep.test_output {
                push(test_output.clone());
            }
            for path in &dep.library_paths {
                push(path.clone());
            }
        }
    }
    classpath
}

fn to_message(diagnostic: Diagnostic) -> CompileMessage {
    CompileMessage {
        kind: match diagnostic.severity {
            Severity::Error => MessageKind::Error,
            Severity::Warning => MessageKind::Warning,
            Severity::Info => MessageKind::Info,
        },
        text: diagnostic.text,
        source_path: diagnostic
            .source_path
            .map(|path| path.to_string_lossy().into_owned()),
        line: diagnostic.line,
        column: diagnostic.column,
    }
}
