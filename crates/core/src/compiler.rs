//! The batch-compiler seam. The build system treats the compiler as an
//! opaque collaborator: hand it a batch of sources with a classpath and an
//! output mapping, get back diagnostics and per-file results.

use std::path::{Path, PathBuf};
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BuildError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub text: String,
    pub source_path: Option<PathBuf>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// Sources of one module routed to its output directory.
#[derive(Debug, Clone)]
pub struct OutputGroup {
    pub module: String,
    pub output_dir: PathBuf,
    pub sources: Vec<PathBuf>,
}

/// One compiler invocation: everything a module chunk needs compiled, with
/// the full classpath and the per-module output mapping.
#[derive(Debug, Clone)]
pub struct CompileTask {
    pub chunk_name: String,
    pub classpath: Vec<PathBuf>,
    pub groups: Vec<OutputGroup>,
}

#[derive(Debug, Clone)]
pub struct CompiledFile {
    pub source: PathBuf,
    pub outputs: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct CompileOutcome {
    /// Files that were individually compiled successfully, with the outputs
    /// they produced. May be non-empty even when the invocation failed.
    pub compiled: Vec<CompiledFile>,
    pub success: bool,
}

pub trait BatchCompiler: Send + Sync {
    fn compile(
        &self,
        task: &CompileTask,
        diagnostics: &mut dyn FnMut(Diagnostic),
    ) -> Result<CompileOutcome>;

    /// Invoked after every build, success or failure, to drop any caches
    /// the compiler keeps between invocations.
    fn cleanup(&self) {}
}

/// Drives an external `javac` process, one run per output group.
pub struct JavacCompiler {
    executable: PathBuf,
}

impl Default for JavacCompiler {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("javac"),
        }
    }
}

impl JavacCompiler {
    pub fn with_executable(executable: PathBuf) -> Self {
        Self { executable }
    }

    fn run_group(
        &self,
        group: &OutputGroup,
        classpath: &[PathBuf],
        diagnostics: &mut dyn FnMut(Diagnostic),
    ) -> Result<bool> {
        std::fs::create_dir_all(&group.output_dir)?;

        let mut command = Command::new(&self.executable);
        command.arg("-d").arg(&group.output_dir);
        if !classpath.is_empty() {
            command.arg("-cp").arg(join_classpath(classpath));
        }
        command.args(&group.sources);

        let output = command.output().map_err(|err| {
            BuildError::Compiler(format!(
                "cannot run {}: {err}",
                self.executable.display()
            ))
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut saw_error = false;
        for line in stderr.lines() {
            if let Some(diagnostic) = parse_javac_line(line) {
                saw_error |= diagnostic.severity == Severity::Error;
                diagnostics(diagnostic);
            }
        }
        if !output.status.success() && !saw_error {
            // The process failed without a parseable diagnostic; forward
            // the raw output so the failure is not silent.
            diagnostics(Diagnostic {
                severity: Severity::Error,
                text: stderr.trim().to_string(),
                source_path: None,
                line: None,
                column: None,
            });
            saw_error = true;
        }

        Ok(output.status.success() && !saw_error)
    }
}

impl BatchCompiler for JavacCompiler {
    fn compile(
        &self,
        task: &CompileTask,
        diagnostics: &mut dyn FnMut(Diagnostic),
    ) -> Result<CompileOutcome> {
        let mut outcome = CompileOutcome {
            compiled: Vec::new(),
            success: true,
        };

        for group in &task.groups {
            let ok = self.run_group(group, &task.classpath, diagnostics)?;
            if ok {
                for source in &group.sources {
                    outcome.compiled.push(CompiledFile {
                        source: source.clone(),
                        outputs: expected_outputs(source, &group.output_dir),
                    });
                }
            } else {
                outcome.success = false;
            }
        }

        Ok(outcome)
    }
}

fn join_classpath(entries: &[PathBuf]) -> String {
    let separator = if cfg!(windows) { ";" } else { ":" };
    entries
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(separator)
}

// "src/demo/App.java:4: error: ';' expected"
static JAVAC_DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<path>.+\.java):(?P<line>\d+):\s*(?P<severity>error|warning|note):\s*(?P<text>.*)$")
        .expect("static regex must parse")
});

fn parse_javac_line(line: &str) -> Option<Diagnostic> {
    let captures = JAVAC_DIAGNOSTIC.captures(line)?;
    let severity = match &captures["severity"] {
        "error" => Severity::Error,
        "warning" => Severity::Warning,
        _ => Severity::Info,
    };
    Some(Diagnostic {
        severity,
        text: captures["text"].to_string(),
        source_path: Some(PathBuf::from(&captures["path"])),
        line: captures["line"].parse().ok(),
        column: None,
    })
}

// The produced class file mirrors the package declaration under the output
// directory. Inner and anonymous classes are not tracked individually.
static PACKAGE_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*package\s+([A-Za-z_][\w.]*)\s*;").expect("static regex must parse")
});

fn expected_outputs(source: &Path, output_dir: &Path) -> Vec<PathBuf> {
    let stem = match source.file_stem().and_then(|s| s.to_str()) {
        Some(stem) => stem,
        None => return Vec::new(),
    };
    let package_dir = std::fs::read_to_string(source)
        .ok()
        .and_then(|text| {
            PACKAGE_DECL
                .captures(&text)
                .map(|c| c[1].replace('.', "/"))
        })
        .unwrap_or_default();

    let mut path = output_dir.to_path_buf();
    if !package_dir.is_empty() {
        path.push(package_dir);
    }
    path.push(format!("{stem}.class"));
    vec![path]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn javac_diagnostics_are_parsed() {
        let diagnostic =
            parse_javac_line("src/demo/App.java:4: error: ';' expected").unwrap();
        assert_eq!(diagnostic.severity, Severity::Error);
        assert_eq!(diagnostic.line, Some(4));
        assert_eq!(
            diagnostic.source_path,
            Some(PathBuf::from("src/demo/App.java"))
        );
        assert_eq!(diagnostic.text, "';' expected");

        assert!(parse_javac_line("2 errors").is_none());
        assert!(parse_javac_line("Note: uses unchecked operations").is_none());
    }

    #[test]
    fn outputs_follow_the_package_declaration() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("App.java");
        std::fs::write(&source, "package com.demo;\nclass App {}\n").unwrap();

        let outputs = expected_outputs(&source, Path::new("/p/out"));
        assert_eq!(outputs, vec![PathBuf::from("/p/out/com/demo/App.class")]);

        let bare = dir.path().join("Bare.java");
        std::fs::write(&bare, "class Bare {}\n").unwrap();
        assert_eq!(
            expected_outputs(&bare, Path::new("/p/out")),
            vec![PathBuf::from("/p/out/Bare.class")]
        );
    }
}
