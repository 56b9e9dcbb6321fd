use std::collections::HashSet;

use crate::error::{BuildError, Result};
use crate::model::ProjectModel;

/// The set of modules one build invocation is allowed to touch. Created
/// fresh per request and dropped with it.
#[derive(Debug, Clone)]
pub struct CompileScope {
    modules: HashSet<String>,
    whole_project: bool,
}

impl CompileScope {
    /// Resolves the requested module names against the model. An empty
    /// request means the whole project; an unknown name is a configuration
    /// error surfaced before any builder runs.
    pub fn resolve(model: &ProjectModel, requested: &[String]) -> Result<Self> {
        if requested.is_empty() {
            return Ok(Self {
                modules: model.module_names().into_iter().collect(),
                whole_project: true,
            });
        }

        let mut modules = HashSet::new();
        for name in requested {
            if model.module(name).is_none() {
                return Err(BuildError::Config(format!(
                    "unknown module '{name}' in compile scope"
                )));
            }
            modules.insert(name.clone());
        }
        Ok(Self {
            modules,
            whole_project: false,
        })
    }

    pub fn contains(&self, module: &str) -> bool {
        self.modules.contains(module)
    }

    pub fn is_whole_project(&self) -> bool {
        self.whole_project
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(String::as_str)
    }
}
