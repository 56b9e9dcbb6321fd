use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("project configuration error: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("compiler error: {0}")]
    Compiler(String),
    #[error("builder '{0}' requested build stop")]
    Abort(String),
    #[error("compilation failed: {errors} error(s), {warnings} warning(s)")]
    CompilationFailed { errors: usize, warnings: usize },
    #[error("the build has been canceled")]
    Canceled,
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BuildError>;
