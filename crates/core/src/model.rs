//! Project model: what a project looks like once its configuration file is
//! loaded and resolved against the global configuration.
//!
//! The model is immutable for the lifetime of a project descriptor; any
//! structural change requires reloading the descriptor.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};

pub const PROJECT_FILE: &str = "project.json";

/// Globally configured path variables and libraries/SDKs. Changing these
/// invalidates every loaded project.
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    pub path_variables: HashMap<String, String>,
    pub libraries: Vec<GlobalLibrary>,
}

#[derive(Debug, Clone)]
pub struct GlobalLibrary {
    pub name: String,
    pub paths: Vec<PathBuf>,
    pub home_path: Option<PathBuf>,
}

impl GlobalConfig {
    pub fn from_setup(setup: buildlink_proto::SetupRequest) -> Self {
        Self {
            path_variables: setup.path_variables,
            libraries: setup
                .libraries
                .into_iter()
                .map(|lib| GlobalLibrary {
                    name: lib.name,
                    paths: lib.paths.into_iter().map(PathBuf::from).collect(),
                    home_path: lib.home_path.map(PathBuf::from),
                })
                .collect(),
        }
    }

    pub fn library(&self, name: &str) -> Option<&GlobalLibrary> {
        self.libraries.iter().find(|lib| lib.name == name)
    }
}

/// Replaces `$NAME$` references with their configured values. Unknown
/// variables are left in place so the resulting path fails visibly.
pub fn expand_path_variables(raw: &str, variables: &HashMap<String, String>) -> String {
    let mut result = raw.to_string();
    for (name, value) in variables {
        result = result.replace(&format!("${name}$"), value);
    }
    result
}

// ---- On-disk configuration format ----

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProjectConfig {
    name: String,
    modules: Vec<ModuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModuleConfig {
    name: String,
    #[serde(default)]
    source_roots: Vec<String>,
    #[serde(default)]
    test_roots: Vec<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    test_output: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    libraries: Vec<String>,
    #[serde(default)]
    jar: Option<String>,
}

// ---- Resolved model ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Production,
    Test,
}

#[derive(Debug, Clone)]
pub struct SourceRoot {
    pub path: PathBuf,
    pub kind: RootKind,
}

#[derive(Debug, Clone)]
pub struct ModuleModel {
    pub name: String,
    pub source_roots: Vec<SourceRoot>,
    pub output: Option<PathBuf>,
    pub test_output: Option<PathBuf>,
    pub dependencies: Vec<String>,
    /// Library classpath roots, resolved from the global configuration at
    /// load time. Valid for exactly as long as the descriptor is cached.
    pub library_paths: Vec<PathBuf>,
    /// Optional archive artifact produced from this module's output.
    pub jar_output: Option<PathBuf>,
}

impl ModuleModel {
    pub fn output_for(&self, kind: RootKind) -> Option<&PathBuf> {
        match kind {
            RootKind::Production => self.output.as_ref(),
            RootKind::Test => self.test_output.as_ref().or(self.output.as_ref()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectModel {
    pub name: String,
    pub root: PathBuf,
    pub modules: Vec<ModuleModel>,
}

impl ProjectModel {
    /// Loads and resolves `project.json` under `project_root`.
    ///
    /// A missing or unparsable file, an unknown dependency or library
    /// reference, all fail the load; a broken model is never returned.
    pub fn load(project_root: &Path, globals: &GlobalConfig) -> Result<Self> {
        let config_path = project_root.join(PROJECT_FILE);
        let text = std::fs::read_to_string(&config_path).map_err(|err| {
            BuildError::Config(format!(
                "cannot read project file {}: {err}",
                config_path.display()
            ))
        })?;
        let config: ProjectConfig = serde_json::from_str(&text).map_err(|err| {
            BuildError::Config(format!(
                "cannot parse project file {}: {err}",
                config_path.display()
            ))
        })?;

        let known: HashSet<&str> = config.modules.iter().map(|m| m.name.as_str()).collect();
        let mut modules = Vec::with_capacity(config.modules.len());
        for module in &config.modules {
            for dep in &module.dependencies {
                if !known.contains(dep.as_str()) {
                    return Err(BuildError::Config(format!(
                        "module '{}' depends on unknown module '{}'",
                        module.name, dep
                    )));
                }
            }

            let mut library_paths = Vec::new();
            for lib_name in &module.libraries {
                let lib = globals.library(lib_name).ok_or_else(|| {
                    BuildError::Config(format!(
                        "module '{}' references unknown library '{}'",
                        module.name, lib_name
                    ))
                })?;
                library_paths.extend(lib.paths.iter().cloned());
            }

            let resolve = |raw: &str| -> PathBuf {
                let expanded = expand_path_variables(raw, &globals.path_variables);
                let path = PathBuf::from(expanded);
                if path.is_absolute() {
                    path
                } else {
                    project_root.join(path)
                }
            };

            let mut source_roots = Vec::new();
            for root in &module.source_roots {
                source_roots.push(SourceRoot {
                    path: resolve(root),
                    kind: RootKind::Production,
                });
            }
            for root in &module.test_roots {
                source_roots.push(SourceRoot {
                    path: resolve(root),
                    kind: RootKind::Test,
                });
            }

            modules.push(ModuleModel {
                name: module.name.clone(),
                source_roots,
                output: module.output.as_deref().map(&resolve),
                test_output: module.test_output.as_deref().map(&resolve),
                dependencies: module.dependencies.clone(),
                library_paths,
                jar_output: module.jar.as_deref().map(&resolve),
            });
        }

        Ok(Self {
            name: config.name,
            root: project_root.to_path_buf(),
            modules,
        })
    }

    pub fn module(&self, name: &str) -> Option<&ModuleModel> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name.clone()).collect()
    }

    /// Transitive dependency closure of a module, excluding the module
    /// itself. Order is stable but unspecified.
    pub fn dependency_closure(&self, name: &str) -> Vec<&ModuleModel> {
        let mut seen = HashSet::new();
        let mut queue: Vec<&str> = match self.module(name) {
            Some(module) => module.dependencies.iter().map(String::as_str).collect(),
            None => Vec::new(),
        };
        let mut result = Vec::new();
        while let Some(dep) = queue.pop() {
            if !seen.insert(dep.to_string()) {
                continue;
            }
            if let Some(module) = self.module(dep) {
                queue.extend(module.dependencies.iter().map(String::as_str));
                result.push(module);
            }
        }
        result
    }
}
