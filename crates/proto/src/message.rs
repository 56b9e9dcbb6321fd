use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top-level message exchanged on the connection. The session id ties a
/// response back to the request that opened the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub session_id: Uuid,
    pub payload: Payload,
}

impl Envelope {
    pub fn request(session_id: Uuid, request: Request) -> Self {
        Self {
            session_id,
            payload: Payload::Request(request),
        }
    }

    pub fn response(session_id: Uuid, response: Response) -> Self {
        Self {
            session_id,
            payload: Payload::Response(response),
        }
    }

    pub fn failure(session_id: Uuid, failure: Failure) -> Self {
        Self {
            session_id,
            payload: Payload::Failure(failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Request(Request),
    Response(Response),
    Failure(Failure),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Compile(CompileRequest),
    Setup(SetupRequest),
    Shutdown { cancel_running_builds: bool },
}

/// How much of the project a build request is allowed to assume stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildType {
    /// Incremental build of the changed files only.
    Make,
    /// Everything is recompiled and the build bookkeeping is reset first.
    Rebuild,
    /// The requested scope is recompiled ignoring timestamps.
    ForcedCompilation,
    /// Recorded outputs for the scope are removed; nothing is compiled.
    Clean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileRequest {
    pub project_path: String,
    /// Empty means the whole project.
    pub modules: Vec<String>,
    pub build_type: BuildType,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SetupRequest {
    pub path_variables: HashMap<String, String>,
    pub libraries: Vec<GlobalLibrary>,
}

/// A globally configured library or SDK. SDKs carry a home path in
/// addition to their classpath roots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalLibrary {
    pub name: String,
    pub paths: Vec<String>,
    pub home_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    CompileMessage(CompileMessage),
    Progress { text: String },
    BuildFinished { exit_code: ExitCode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Info,
    Warning,
    Error,
}

/// A structured diagnostic produced by a builder or the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileMessage {
    pub kind: MessageKind,
    pub text: String,
    pub source_path: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl CompileMessage {
    pub fn new(kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            source_path: None,
            line: None,
            column: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitCode {
    Ok,
    Errors,
    Canceled,
}

/// Reported when a request could not be processed at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub description: String,
    pub detail: Option<String>,
}

impl Failure {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            detail: None,
        }
    }
}
