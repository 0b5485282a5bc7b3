//! Integration tests: a real `ClientSession` against a hand-driven server.
//!
//! Each test binds a loopback listener, starts a session pointed at it, and
//! then plays the server's side of the protocol with the `seip_core` framing
//! helpers.  This checks what actually goes over the wire: the name frame
//! first, then exactly one JSON response per request, in order.

use std::sync::Arc;
use std::time::Duration;

use seip_client::{ClientEngine, ClientSession, SessionConfig, SessionEnd, SimulatedTerminal};
use seip_core::{
    codes, write_frame, ErrorLayer, FrameLimits, FrameReader, RequestCode, RequestMessage,
    ResponsePacket,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(2);

struct FakeServer {
    stream: TcpStream,
    reader: FrameReader,
    limits: FrameLimits,
}

impl FakeServer {
    async fn request(&mut self, code: RequestCode, data: &str) -> ResponsePacket {
        let payload = RequestMessage::new(code, data, 1000).to_json().unwrap();
        write_frame(&mut self.stream, &payload, &self.limits)
            .await
            .unwrap();
        let reply = self.reader.read_frame(&mut self.stream, WAIT).await.unwrap();
        ResponsePacket::from_json(&reply).unwrap()
    }
}

/// Starts a session named `name` and accepts it; returns the server side
/// after the name frame has been read.
async fn connect(
    name: &str,
    terminal: SimulatedTerminal,
) -> (FakeServer, String, JoinHandle<Result<SessionEnd, seip_client::ClientError>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let engine = Arc::new(ClientEngine::with_default_handlers(Arc::new(terminal)));
    let session = ClientSession::new(
        SessionConfig {
            server_addr: addr.to_string(),
            name: name.to_string(),
            poll_interval: Duration::from_millis(50),
            ..SessionConfig::default()
        },
        engine,
    );
    let task = tokio::spawn(async move { session.run().await });

    let (stream, _) = listener.accept().await.unwrap();
    let limits = FrameLimits::default();
    let mut server = FakeServer {
        stream,
        reader: FrameReader::new(limits),
        limits,
    };
    let name = server.reader.read_frame(&mut server.stream, WAIT).await.unwrap();
    (server, String::from_utf8(name).unwrap(), task)
}

#[tokio::test]
async fn test_handshake_sends_client_name_first() {
    let (_server, name, task) = connect("cardA", SimulatedTerminal::new()).await;

    assert_eq!(name, "cardA");
    task.abort();
}

#[tokio::test]
async fn test_poll_type_b_returns_card_uid() {
    // Arrange
    let terminal = SimulatedTerminal::new().with_card_uid(vec![0xCA, 0xFE]);
    let (mut server, _, task) = connect("cardB", terminal).await;

    // Act
    let reply = server.request(RequestCode::PollTypeB, "").await;

    // Assert
    assert!(reply.is_ok());
    assert_eq!(reply.data.as_deref(), Some("CAFE"));
    task.abort();
}

#[tokio::test]
async fn test_replies_arrive_in_request_order() {
    let (mut server, _, task) = connect("ordered", SimulatedTerminal::new()).await;

    let first = server.request(RequestCode::Echo, "one").await;
    let second = server.request(RequestCode::Command, "00A40400").await;
    let third = server.request(RequestCode::Echo, "three").await;

    assert_eq!(first.data.as_deref(), Some("one"));
    assert_eq!(second.data.as_deref(), Some("00A404009000"));
    assert_eq!(third.data.as_deref(), Some("three"));
    task.abort();
}

#[tokio::test]
async fn test_missing_card_is_reported_in_card_layer() {
    let (mut server, _, task) = connect("empty", SimulatedTerminal::new().without_card()).await;

    let reply = server.request(RequestCode::PollTypeA, "").await;

    assert_eq!(reply.error_code(ErrorLayer::Card), Some(codes::ERR_CARD));
    task.abort();
}

#[tokio::test]
async fn test_field_off_then_poll_is_a_terminal_failure() {
    let (mut server, _, task) = connect("field", SimulatedTerminal::new()).await;

    let off = server.request(RequestCode::PowerOffField, "").await;
    let poll = server.request(RequestCode::PollTypeF, "").await;
    let on = server.request(RequestCode::PowerOnField, "").await;
    let poll_again = server.request(RequestCode::PollTypeF, "").await;

    assert!(off.is_ok());
    assert_eq!(poll.error_code(ErrorLayer::Terminal), Some(codes::ERR_TERMINAL));
    assert!(on.is_ok());
    assert!(poll_again.is_ok());
    task.abort();
}

#[tokio::test]
async fn test_disconnect_request_ends_the_session() {
    let (mut server, _, task) = connect("leaving", SimulatedTerminal::new()).await;

    let reply = server.request(RequestCode::Disconnect, "").await;

    assert!(reply.is_ok());
    let end = tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(end, SessionEnd::Disconnected);
}

#[tokio::test]
async fn test_server_hang_up_ends_the_session() {
    let (server, _, task) = connect("dropped", SimulatedTerminal::new()).await;

    drop(server);

    let end = tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(end, SessionEnd::ServerClosed);
}

#[tokio::test]
async fn test_malformed_request_gets_invalid_request_reply() {
    let (mut server, _, task) = connect("strict", SimulatedTerminal::new()).await;

    write_frame(&mut server.stream, b"{not json", &server.limits)
        .await
        .unwrap();
    let reply = server.reader.read_frame(&mut server.stream, WAIT).await.unwrap();
    let reply = ResponsePacket::from_json(&reply).unwrap();

    assert_eq!(
        reply.error_code(ErrorLayer::Client),
        Some(codes::ERR_INVALID_REQUEST)
    );
    task.abort();
}
