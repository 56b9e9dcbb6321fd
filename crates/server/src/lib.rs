//! The build server: accepts client connections, dispatches requests to
//! the build service, and bridges file-watch events into its dirty state.

pub mod server;
pub mod watcher;

use thiserror::Error;

pub use server::BuildServer;
pub use watcher::spawn_watcher;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("build error: {0}")]
    Build(#[from] buildlink_core::BuildError),
    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
