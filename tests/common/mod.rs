#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use ratatui::{Terminal, backend::TestBackend};
use remote_term::bind::{BindError, Binder};
use remote_term::channel::{Channel, ChannelEvent, ChannelOptions, ReconnectPolicy};
use remote_term::controller::{ControllerSettings, ControllerState, SessionController, Update};
use remote_term::endpoint::Origin;
use remote_term::session::{PersistedState, SessionStore};
use remote_term::tui::{TuiApp, draw};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// A fake terminal agent listening on loopback
pub struct AgentStub {
    listener: TcpListener,
    port: u16,
}

impl AgentStub {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    /// Control port the client should be configured with
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn origin(&self) -> Origin {
        Origin::parse("http://127.0.0.1:3000").unwrap()
    }

    pub fn channel_options(&self, reconnect: ReconnectPolicy) -> ChannelOptions {
        ChannelOptions {
            control_port: self.port,
            reconnect,
        }
    }

    pub fn settings(&self, reconnect: ReconnectPolicy) -> ControllerSettings {
        let mut settings = ControllerSettings::new(self.origin());
        settings.channel = self.channel_options(reconnect);
        settings
    }

    async fn accept_tcp(&self) -> TcpStream {
        let (stream, _) = tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        stream
    }

    /// Accept the next client and complete the WebSocket handshake
    pub async fn next_connection(&self) -> AgentConnection {
        let stream = self.accept_tcp().await;
        let mut uri = String::new();
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            uri = request.uri().to_string();
            Ok(response)
        };
        let socket = accept_hdr_async(stream, callback).await.unwrap();
        AgentConnection { socket, uri }
    }

    /// Accept the next TCP connection and hang up before the handshake
    pub async fn drop_next_connection(&self) {
        drop(self.accept_tcp().await);
    }
}

pub struct AgentConnection {
    socket: WebSocketStream<TcpStream>,
    uri: String,
}

impl AgentConnection {
    /// Request target of the handshake, e.g. `/ws?device_id=..&token=..`
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn path(&self) -> String {
        self.uri.split('?').next().unwrap_or_default().to_string()
    }

    pub fn query(&self, key: &str) -> Option<String> {
        let url = url::Url::parse(&format!("http://agent{}", self.uri)).unwrap();
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    pub async fn send_output(&mut self, content: &str) {
        let frame = json!({"type": "terminal_output", "payload": {"content": content}});
        self.send_raw(&frame.to_string()).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.socket.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn send_binary(&mut self, bytes: &[u8]) {
        self.socket.send(Message::Binary(bytes.to_vec())).await.unwrap();
    }

    /// Next text frame from the client, parsed as JSON
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let message = tokio::time::timeout(WAIT, self.socket.next())
                .await
                .expect("client sent nothing")
                .expect("connection ended")
                .unwrap();
            match message {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("expected a text frame, got {:?}", other),
            }
        }
    }

    /// Assert the client writes no data frame for `ms` milliseconds
    pub async fn expect_silence(&mut self, ms: u64) {
        match tokio::time::timeout(Duration::from_millis(ms), self.socket.next()).await {
            Err(_) => {}
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {}", text),
            Ok(other) => panic!("unexpected socket activity: {:?}", other),
        }
    }

    /// Wait for the client's close frame or the end of the stream
    pub async fn expect_closed(&mut self) {
        loop {
            let next = tokio::time::timeout(WAIT, self.socket.next())
                .await
                .expect("client never closed");
            match next {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(Message::Text(text))) => panic!("unexpected frame before close: {}", text),
                Some(Ok(_)) => continue,
            }
        }
    }

    pub async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }
}

/// Binder that answers from a fixed result and records every code it sees
pub struct StaticBinder {
    result: Result<String, String>,
    codes: Mutex<Vec<String>>,
}

impl StaticBinder {
    pub fn accepting(device_id: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(device_id.to_string()),
            codes: Mutex::new(Vec::new()),
        })
    }

    pub fn rejecting(message: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Err(message.to_string()),
            codes: Mutex::new(Vec::new()),
        })
    }

    pub fn codes(&self) -> Vec<String> {
        self.codes.lock().unwrap().clone()
    }
}

impl Binder for StaticBinder {
    fn bind(&self, code: &str) -> Result<String, BindError> {
        self.codes.lock().unwrap().push(code.to_string());
        self.result.clone().map_err(BindError::Rejected)
    }
}

pub fn unbound_store() -> SessionStore {
    SessionStore::in_memory(PersistedState::default())
}

pub fn bound_store(device_id: &str) -> SessionStore {
    SessionStore::in_memory(PersistedState {
        device_id: Some(device_id.to_string()),
        token: None,
    })
}

/// Retry policy short enough for tests
pub fn quick_reconnect(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(50),
    }
}

pub async fn next_event(channel: &mut Channel) -> Option<ChannelEvent> {
    tokio::time::timeout(WAIT, channel.next_event())
        .await
        .expect("no channel event")
}

pub async fn next_update(controller: &mut SessionController) -> Update {
    tokio::time::timeout(WAIT, controller.next_update())
        .await
        .expect("no controller update")
}

/// Drive the controller until it reaches `state`
pub async fn wait_for_state(controller: &mut SessionController, state: ControllerState) {
    while controller.state() != state {
        let update = next_update(controller).await;
        if update == Update::ChannelEnded && controller.state() != state {
            panic!("channel ended in {:?} while waiting for {:?}", controller.state(), state);
        }
    }
}

/// Drive the controller until `count` display updates have arrived
pub async fn wait_for_outputs(controller: &mut SessionController, count: usize) {
    let mut seen = 0;
    while seen < count {
        if next_update(controller).await == Update::Display {
            seen += 1;
        }
    }
}

/// Helper to render the TUI to a test terminal and return the buffer as a string
pub fn render_to_string(
    app: &mut TuiApp,
    controller: &SessionController,
    width: u16,
    height: u16,
) -> String {
    let backend = TestBackend::new(width, height);
    let mut terminal = Terminal::new(backend).unwrap();

    terminal
        .draw(|f| {
            draw(f, app, controller, std::time::Instant::now());
        })
        .unwrap();

    let buffer = terminal.backend().buffer();
    let mut result = String::new();
    for y in 0..height {
        for x in 0..width {
            let cell = buffer.cell((x, y)).unwrap();
            result.push_str(cell.symbol());
        }
        result.push('\n');
    }
    result
}
