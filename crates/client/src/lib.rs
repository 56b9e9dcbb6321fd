//! Client side of the build-service connection: a connection manager owning
//! one persistent transport and a session table correlating in-flight
//! requests with the responses arriving on the read loop.

pub mod connection;
pub mod error;
pub mod session;

pub use connection::{BuildClient, ConnectionState};
pub use error::{ClientError, Result};
pub use session::{Session, SessionEvent, SessionTable};
