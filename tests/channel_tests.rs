mod common;

use common::{AgentStub, next_event, quick_reconnect};
use remote_term::channel::{Channel, ChannelEvent, ChannelState, ReconnectPolicy};
use remote_term::endpoint::Origin;
use remote_term::protocol::OutboundMessage;
use remote_term::session::Session;
use serde_json::json;

fn open(stub: &AgentStub, session: &Session, reconnect: ReconnectPolicy) -> Channel {
    Channel::open(session, &stub.origin(), &stub.channel_options(reconnect)).unwrap()
}

async fn open_connected(stub: &AgentStub) -> (Channel, common::AgentConnection) {
    let mut channel = open(stub, &Session::new("dev-42"), ReconnectPolicy::disabled());
    let connection = stub.next_connection().await;
    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::State(ChannelState::Open))
    );
    (channel, connection)
}

#[tokio::test]
async fn test_connects_with_identity_in_query() {
    let stub = AgentStub::start().await;
    let session = Session::with_token("dev-42", Some("operator".to_string()));
    let mut channel = open(&stub, &session, ReconnectPolicy::disabled());
    assert_eq!(channel.state(), ChannelState::Connecting);

    let connection = stub.next_connection().await;
    assert_eq!(connection.path(), "/ws");
    assert_eq!(connection.query("device_id").as_deref(), Some("dev-42"));
    assert_eq!(connection.query("token").as_deref(), Some("operator"));

    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::State(ChannelState::Open))
    );
    assert_eq!(channel.state(), ChannelState::Open);
}

#[tokio::test]
async fn test_outputs_arrive_in_order() {
    let stub = AgentStub::start().await;
    let (mut channel, mut connection) = open_connected(&stub).await;

    connection.send_output("A").await;
    connection.send_output("B").await;

    assert_eq!(next_event(&mut channel).await, Some(ChannelEvent::Output("A".to_string())));
    assert_eq!(next_event(&mut channel).await, Some(ChannelEvent::Output("B".to_string())));
}

#[tokio::test]
async fn test_unknown_and_malformed_frames_are_dropped() {
    let stub = AgentStub::start().await;
    let (mut channel, mut connection) = open_connected(&stub).await;

    connection.send_raw(r#"{"type":"agent_status","payload":{"online":true}}"#).await;
    connection.send_raw("not json at all").await;
    connection.send_raw(r#"{"type":"terminal_output","payload":{}}"#).await;
    connection.send_output("after").await;

    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::Output("after".to_string()))
    );
    assert_eq!(channel.state(), ChannelState::Open);
}

#[tokio::test]
async fn test_utf8_binary_frames_are_decoded() {
    let stub = AgentStub::start().await;
    let (mut channel, mut connection) = open_connected(&stub).await;

    let frame = json!({"type": "terminal_output", "payload": {"content": "✓ binary"}});
    connection.send_binary(frame.to_string().as_bytes()).await;
    connection.send_binary(&[0xff, 0xfe]).await;
    connection.send_output("text").await;

    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::Output("✓ binary".to_string()))
    );
    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::Output("text".to_string()))
    );
}

#[tokio::test]
async fn test_send_while_open_writes_envelope() {
    let stub = AgentStub::start().await;
    let (channel, mut connection) = open_connected(&stub).await;

    assert!(channel.send(&OutboundMessage::text("ls -la\n")));
    assert_eq!(
        connection.recv_json().await,
        json!({"type": "terminal_input", "payload": {"content": "ls -la\n"}})
    );

    assert!(channel.send(&OutboundMessage::key("c", vec!["ctrl".to_string()])));
    assert_eq!(
        connection.recv_json().await,
        json!({
            "type": "terminal_input",
            "payload": {"key": "c", "modifiers": ["ctrl"], "action": "key"}
        })
    );
}

#[tokio::test]
async fn test_send_while_connecting_is_dropped() {
    let stub = AgentStub::start().await;
    let mut channel = open(&stub, &Session::new("dev-42"), ReconnectPolicy::disabled());

    assert!(!channel.send(&OutboundMessage::text("too early\n")));

    let mut connection = stub.next_connection().await;
    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::State(ChannelState::Open))
    );
    connection.expect_silence(200).await;
}

#[tokio::test]
async fn test_agent_close_ends_channel() {
    let stub = AgentStub::start().await;
    let (mut channel, mut connection) = open_connected(&stub).await;

    connection.close().await;

    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::State(ChannelState::Closed))
    );
    assert_eq!(next_event(&mut channel).await, None);
    assert!(channel.is_finished());
    assert!(!channel.send(&OutboundMessage::text("late\n")));
}

#[tokio::test]
async fn test_refused_connection_is_errored() {
    // Bind then release a port so nothing is listening on it
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let origin = Origin::parse("http://127.0.0.1").unwrap();
    let options = remote_term::channel::ChannelOptions {
        control_port: port,
        reconnect: ReconnectPolicy::disabled(),
    };
    let mut channel = Channel::open(&Session::new("dev-1"), &origin, &options).unwrap();

    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::State(ChannelState::Errored))
    );
    // Errored is terminal; no Closed follows it
    assert_eq!(next_event(&mut channel).await, None);
}

#[tokio::test]
async fn test_failed_handshake_is_errored() {
    let stub = AgentStub::start().await;
    let mut channel = open(&stub, &Session::new("dev-1"), ReconnectPolicy::disabled());

    stub.drop_next_connection().await;

    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::State(ChannelState::Errored))
    );
}

#[tokio::test]
async fn test_reconnects_after_close() {
    let stub = AgentStub::start().await;
    let mut channel = open(&stub, &Session::new("dev-1"), quick_reconnect(3));

    let mut first = stub.next_connection().await;
    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::State(ChannelState::Open))
    );
    first.close().await;

    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::State(ChannelState::Closed))
    );
    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::State(ChannelState::Connecting))
    );

    let mut second = stub.next_connection().await;
    assert_eq!(second.query("device_id").as_deref(), Some("dev-1"));
    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::State(ChannelState::Open))
    );

    second.send_output("back").await;
    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::Output("back".to_string()))
    );
}

#[tokio::test]
async fn test_gives_up_after_attempt_budget() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let origin = Origin::parse("http://127.0.0.1").unwrap();
    let options = remote_term::channel::ChannelOptions {
        control_port: port,
        reconnect: quick_reconnect(2),
    };
    let mut channel = Channel::open(&Session::new("dev-1"), &origin, &options).unwrap();

    let mut states = Vec::new();
    while let Some(event) = next_event(&mut channel).await {
        if let ChannelEvent::State(state) = event {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![
            ChannelState::Errored,
            ChannelState::Connecting,
            ChannelState::Errored,
            ChannelState::Connecting,
            ChannelState::Errored,
        ]
    );
}

#[tokio::test]
async fn test_shutdown_sends_close_frame() {
    let stub = AgentStub::start().await;
    let (channel, mut connection) = open_connected(&stub).await;

    channel.shutdown().await;
    connection.expect_closed().await;
}

#[tokio::test]
async fn test_drop_closes_connection() {
    let stub = AgentStub::start().await;
    let (channel, mut connection) = open_connected(&stub).await;

    drop(channel);
    connection.expect_closed().await;
}

#[tokio::test]
async fn test_accepted_frames_flush_before_close() {
    let stub = AgentStub::start().await;
    let (channel, mut connection) = open_connected(&stub).await;

    assert!(channel.send(&OutboundMessage::text("exit\n")));
    channel.shutdown().await;

    assert_eq!(connection.recv_json().await["payload"]["content"], "exit\n");
    connection.expect_closed().await;
}
