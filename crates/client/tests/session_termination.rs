use std::time::Duration;

use buildlink_client::{BuildClient, ClientError, ConnectionState, SessionEvent};
use buildlink_proto::BuildType;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;

/// A peer that accepts one connection, consumes whatever the client writes,
/// and closes the socket when signalled.
async fn spawn_stub_server() -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (close_tx, close_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        tokio::select! {
            _ = close_rx => {}
            _ = async {
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            } => {}
        }
    });

    (addr, close_tx)
}

async fn expect_terminated(session: &mut buildlink_client::Session) {
    let event = timeout(Duration::from_secs(5), session.next_event())
        .await
        .expect("timed out waiting for session event");
    assert_eq!(event, Some(SessionEvent::Terminated));
}

#[tokio::test]
async fn peer_close_terminates_every_outstanding_session() {
    let (addr, close) = spawn_stub_server().await;
    let client = BuildClient::new();
    client.connect(&addr).await.unwrap();

    let mut sessions = Vec::new();
    for _ in 0..3 {
        let session = client
            .send_compile_request("/work/demo", &[], BuildType::Make)
            .await
            .unwrap();
        sessions.push(session);
    }
    assert_eq!(client.outstanding_sessions(), 3);

    close.send(()).unwrap();

    for session in &mut sessions {
        expect_terminated(session).await;
    }
    assert_eq!(client.outstanding_sessions(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn local_disconnect_terminates_sessions_and_is_idempotent() {
    let (addr, _close) = spawn_stub_server().await;
    let client = BuildClient::new();
    client.connect(&addr).await.unwrap();

    let mut session = client
        .send_compile_request("/work/demo", &[], BuildType::Rebuild)
        .await
        .unwrap();

    client.disconnect().await.unwrap();
    client.disconnect().await.unwrap();

    expect_terminated(&mut session).await;
    assert_eq!(client.outstanding_sessions(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn requests_require_a_connection() {
    let client = BuildClient::new();
    let result = client
        .send_compile_request("/work/demo", &[], BuildType::Make)
        .await;
    assert!(matches!(result, Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn connect_is_a_no_op_when_already_connected() {
    let (addr, _close) = spawn_stub_server().await;
    let client = BuildClient::new();
    client.connect(&addr).await.unwrap();
    client.connect(&addr).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
}
