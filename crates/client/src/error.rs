use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not connected to a build server")]
    NotConnected,
    #[error("another connection state transition is in flight")]
    TransitionInFlight,
    #[error("protocol error: {0}")]
    Protocol(#[from] buildlink_proto::ProtoError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
