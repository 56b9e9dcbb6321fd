use std::path::Path;
use std::sync::Arc;

use buildlink_core::{BuildService, MessageHandler};
use buildlink_proto::{
    CompileMessage, CompileRequest, Envelope, Payload, Request, Response, WireCodec,
};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::Result;

/// Accepts connections and serves build requests until shut down.
pub struct BuildServer {
    service: Arc<BuildService>,
    shutdown: CancellationToken,
    running_builds: CancellationToken,
}

impl BuildServer {
    pub fn new(service: Arc<BuildService>) -> Self {
        Self {
            service,
            shutdown: CancellationToken::new(),
            running_builds: CancellationToken::new(),
        }
    }

    pub fn service(&self) -> Arc<BuildService> {
        Arc::clone(&self.service)
    }

    /// Token that resolves when the server has been asked to stop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("build server listening on {}", listener.local_addr()?);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    tracing::debug!("connection from {peer}");
                    let service = Arc::clone(&self.service);
                    let shutdown = self.shutdown.clone();
                    let running_builds = self.running_builds.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, service, shutdown, running_builds).await;
                    });
                }
            }
        }
        tracing::info!("build server stopped");
        Ok(())
    }
}

/// Forwards build messages to the client as response envelopes tagged with
/// the request's session id.
struct ConnectionHandler {
    session_id: Uuid,
    outbound: UnboundedSender<Envelope>,
}

impl MessageHandler for ConnectionHandler {
    fn compile_message(&self, message: CompileMessage) {
        let _ = self.outbound.send(Envelope::response(
            self.session_id,
            Response::CompileMessage(message),
        ));
    }

    fn progress(&self, text: &str) {
        let _ = self.outbound.send(Envelope::response(
            self.session_id,
            Response::Progress {
                text: text.to_string(),
            },
        ));
    }
}

async fn handle_connection(
    stream: TcpStream,
    service: Arc<BuildService>,
    shutdown: CancellationToken,
    running_builds: CancellationToken,
) {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!("cannot set TCP_NODELAY: {err}");
    }
    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, WireCodec);
    let mut sink = FramedWrite::new(write_half, WireCodec);

    // One writer task serializes all outbound traffic for the connection;
    // concurrent builds just push envelopes onto the channel.
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();
    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if let Err(err) = sink.send(envelope).await {
                tracing::debug!("connection write failed: {err}");
                break;
            }
        }
    });

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(envelope) => {
                let Payload::Request(request) = envelope.payload else {
                    tracing::warn!(
                        "ignoring non-request frame from client (session {})",
                        envelope.session_id
                    );
                    continue;
                };
                dispatch_request(
                    envelope.session_id,
                    request,
                    &service,
                    &outbound,
                    &shutdown,
                    &running_builds,
                );
            }
            Err(err) => {
                // Protocol errors are fatal to the connection.
                tracing::warn!("malformed frame, closing connection: {err}");
                break;
            }
        }
    }

    drop(outbound);
    let _ = writer.await;
}

fn dispatch_request(
    session_id: Uuid,
    request: Request,
    service: &Arc<BuildService>,
    outbound: &UnboundedSender<Envelope>,
    shutdown: &CancellationToken,
    running_builds: &CancellationToken,
) {
    match request {
        Request::Compile(compile) => {
            let service = Arc::clone(service);
            let outbound = outbound.clone();
            let cancel = running_builds.child_token();
            tokio::spawn(async move {
                run_build(session_id, compile, service, outbound, cancel).await;
            });
        }
        Request::Setup(setup) => {
            service.set_globals(buildlink_core::model::GlobalConfig::from_setup(setup));
        }
        Request::Shutdown {
            cancel_running_builds,
        } => {
            tracing::info!(
                "shutdown requested (cancel running builds: {cancel_running_builds})"
            );
            if cancel_running_builds {
                running_builds.cancel();
            }
            shutdown.cancel();
        }
    }
}

async fn run_build(
    session_id: Uuid,
    compile: CompileRequest,
    service: Arc<BuildService>,
    outbound: UnboundedSender<Envelope>,
    cancel: CancellationToken,
) {
    let handler = Arc::new(ConnectionHandler {
        session_id,
        outbound: outbound.clone(),
    });

    let exit_code = match service
        .start_build(
            Path::new(&compile.project_path),
            &compile.modules,
            compile.build_type,
            handler,
            cancel,
        )
        .await
    {
        Ok(exit_code) => exit_code,
        Err(err) => {
            // Build-level failure before any builder ran (bad project file,
            // unknown module, ...). The client still gets a finish status.
            let _ = outbound.send(Envelope::response(
                session_id,
                Response::CompileMessage(CompileMessage::error(err.to_string())),
            ));
            buildlink_proto::ExitCode::Errors
        }
    };

    let _ = outbound.send(Envelope::response(
        session_id,
        Response::BuildFinished { exit_code },
    ));
}
