//! Wire protocol shared by the build client and the build server.
//!
//! Every frame on the stream is a varint length prefix followed by a
//! MessagePack-encoded [`Envelope`]. The envelope carries the session id
//! that correlates requests with their asynchronous responses.

pub mod codec;
pub mod message;

pub use codec::{MAX_FRAME_LEN, ProtoError, WireCodec};
pub use message::{
    BuildType, CompileMessage, CompileRequest, Envelope, ExitCode, Failure, GlobalLibrary,
    MessageKind, Payload, Request, Response, SetupRequest,
};
