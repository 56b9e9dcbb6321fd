use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use buildlink_proto::{
    BuildType, CompileRequest, Envelope, Payload, Request, Response, SetupRequest, WireCodec,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::session::{Session, SessionEvent, SessionTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnecting,
            _ => Self::Disconnected,
        }
    }
}

struct Shared {
    state: AtomicU8,
    sessions: SessionTable,
}

struct Transport {
    writer: FramedWrite<OwnedWriteHalf, WireCodec>,
    read_task: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Owns the single persistent connection to a build-service instance.
///
/// Requests are written synchronously by the caller; responses arrive on a
/// background read loop and are routed to per-session channels. When the
/// transport goes away, for any reason, every outstanding session receives
/// exactly one termination notification.
pub struct BuildClient {
    shared: Arc<Shared>,
    transport: tokio::sync::Mutex<Option<Transport>>,
}

impl Default for BuildClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildClient {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                sessions: SessionTable::new(),
            }),
            transport: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn outstanding_sessions(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Connects to the server. A no-op when already connected; only one
    /// attempt may be in flight at a time.
    pub async fn connect(&self, addr: &str) -> Result<()> {
        match self.shared.state.compare_exchange(
            ConnectionState::Disconnected as u8,
            ConnectionState::Connecting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(current) => {
                return match ConnectionState::from_u8(current) {
                    ConnectionState::Connected => Ok(()),
                    _ => Err(ClientError::TransitionInFlight),
                };
            }
        }

        match self.open_transport(addr).await {
            Ok(()) => {
                self.shared.state.store(
                    ConnectionState::Connected as u8,
                    Ordering::Release,
                );
                Ok(())
            }
            Err(err) => {
                self.shared.state.store(
                    ConnectionState::Disconnected as u8,
                    Ordering::Release,
                );
                Err(err)
            }
        }
    }

    async fn open_transport(&self, addr: &str) -> Result<()> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let cancel = CancellationToken::new();
        let read_task = tokio::spawn(read_loop(
            FramedRead::new(read_half, WireCodec),
            Arc::clone(&self.shared),
            cancel.clone(),
        ));

        let mut guard = self.transport.lock().await;
        *guard = Some(Transport {
            writer: FramedWrite::new(write_half, WireCodec),
            read_task,
            cancel,
        });
        Ok(())
    }

    /// Submits a compile request and returns the session observing it.
    ///
    /// Fails with [`ClientError::NotConnected`] unless connected. If the
    /// write fails the session is completed with a termination event before
    /// this call returns, and the connection is torn down.
    pub async fn send_compile_request(
        &self,
        project_path: &str,
        modules: &[String],
        build_type: BuildType,
    ) -> Result<Session> {
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.sessions.register(id, tx);

        let envelope = Envelope::request(
            id,
            Request::Compile(CompileRequest {
                project_path: project_path.to_string(),
                modules: modules.to_vec(),
                build_type,
            }),
        );

        if let Err(err) = self.write(envelope).await {
            tracing::warn!("write failed for session {id}: {err}");
            if let Some(sender) = self.shared.sessions.complete(id) {
                let _ = sender.send(SessionEvent::Terminated);
            }
            self.disconnect().await?;
        }

        Ok(Session::new(id, rx))
    }

    /// Pushes global configuration to the server. No response is expected.
    pub async fn send_setup_request(&self, setup: SetupRequest) -> Result<()> {
        self.send_fire_and_forget(Request::Setup(setup)).await
    }

    pub async fn send_shutdown_request(&self, cancel_running_builds: bool) -> Result<()> {
        self.send_fire_and_forget(Request::Shutdown {
            cancel_running_builds,
        })
        .await
    }

    async fn send_fire_and_forget(&self, request: Request) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let envelope = Envelope::request(Uuid::new_v4(), request);
        if let Err(err) = self.write(envelope).await {
            self.disconnect().await?;
            return Err(err);
        }
        Ok(())
    }

    async fn write(&self, envelope: Envelope) -> Result<()> {
        let mut guard = self.transport.lock().await;
        match guard.as_mut() {
            Some(transport) => Ok(transport.writer.send(envelope).await?),
            None => Err(ClientError::NotConnected),
        }
    }

    /// Closes the transport and waits for the read loop to finish its
    /// teardown (which terminates all outstanding sessions). Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        match self.shared.state.compare_exchange(
            ConnectionState::Connected as u8,
            ConnectionState::Disconnecting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            // Already down, or a concurrent teardown owns the transition.
            Err(_) => return Ok(()),
        }

        let transport = self.transport.lock().await.take();
        if let Some(transport) = transport {
            transport.cancel.cancel();
            drop(transport.writer);
            let _ = transport.read_task.await;
        }
        self.shared
            .state
            .store(ConnectionState::Disconnected as u8, Ordering::Release);
        Ok(())
    }
}

/// Decodes inbound frames and routes them by session id. Runs until the
/// peer closes, a protocol error occurs, or a local disconnect cancels it;
/// every exit path passes through the single `terminate_all` below.
async fn read_loop(
    mut frames: FramedRead<OwnedReadHalf, WireCodec>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(envelope)) => dispatch(&shared.sessions, envelope),
                Some(Err(err)) => {
                    tracing::warn!("protocol error, closing connection: {err}");
                    break;
                }
                None => break,
            },
        }
    }

    shared.sessions.terminate_all();
    shared
        .state
        .store(ConnectionState::Disconnected as u8, Ordering::Release);
}

fn dispatch(sessions: &SessionTable, envelope: Envelope) {
    let id = envelope.session_id;
    match envelope.payload {
        Payload::Response(Response::BuildFinished { exit_code }) => {
            if let Some(sender) = sessions.complete(id) {
                let _ = sender.send(SessionEvent::Finished(exit_code));
            } else {
                tracing::debug!("finish for unknown session {id}");
            }
        }
        Payload::Response(Response::CompileMessage(message)) => {
            if let Some(sender) = sessions.resolve(id) {
                let _ = sender.send(SessionEvent::Message(message));
            }
        }
        Payload::Response(Response::Progress { text }) => {
            if let Some(sender) = sessions.resolve(id) {
                let _ = sender.send(SessionEvent::Progress(text));
            }
        }
        Payload::Failure(failure) => {
            if let Some(sender) = sessions.complete(id) {
                let _ = sender.send(SessionEvent::Failure(failure));
            }
        }
        Payload::Request(_) => {
            tracing::warn!("ignoring request frame sent by the server (session {id})");
        }
    }
}
