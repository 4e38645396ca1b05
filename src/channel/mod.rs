//! Session channel: one WebSocket to the agent, owned by a background task.
//!
//! The handle talks to the task through an unbounded queue of outbound frames,
//! an event queue, a `watch` for the current state, and a oneshot for
//! shutdown. Sends are only accepted while the socket is open; nothing is
//! buffered across a reconnect.

mod backoff;

pub use backoff::ReconnectPolicy;

use std::fmt;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use crate::endpoint::{DEFAULT_CONTROL_PORT, EndpointError, Origin, redacted};
use crate::protocol::{InboundMessage, OutboundMessage, decode_inbound};
use crate::session::Session;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle as seen by the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    /// Clean close or end of stream
    Closed,
    /// Transport failure (refused, reset, protocol error)
    Errored,
}

impl ChannelState {
    pub fn is_open(self) -> bool {
        self == ChannelState::Open
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closed => "closed",
            ChannelState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Something the owner should react to, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    State(ChannelState),
    /// Complete replacement for the display buffer
    Output(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    pub control_port: u16,
    pub reconnect: ReconnectPolicy,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            control_port: DEFAULT_CONTROL_PORT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Handle to a running session channel.
///
/// Dropping the handle closes the connection.
pub struct Channel {
    endpoint: Url,
    state: watch::Receiver<ChannelState>,
    outbound: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    finished: bool,
}

impl Channel {
    /// Start connecting to the agent for `session`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        session: &Session,
        origin: &Origin,
        options: &ChannelOptions,
    ) -> Result<Self, EndpointError> {
        let endpoint = origin.session_endpoint(options.control_port, session)?;
        Ok(Self::connect(endpoint, options.reconnect))
    }

    /// Start connecting to an already derived endpoint
    pub fn connect(endpoint: Url, policy: ReconnectPolicy) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        info!(endpoint = %redacted(&endpoint), "opening session channel");
        let worker = Worker {
            endpoint: endpoint.clone(),
            policy,
            state: state_tx,
            events: events_tx,
            outbound: outbound_rx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(worker.run());

        Self {
            endpoint,
            state: state_rx,
            outbound: outbound_tx,
            events: events_rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
            finished: false,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Transmit a message if the socket is open.
    ///
    /// Returns whether the frame was handed to the socket task; anything sent
    /// while not open is dropped.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        if !self.state().is_open() {
            debug!(state = %self.state(), "dropping input, channel not open");
            return false;
        }
        match message.to_wire() {
            Ok(frame) => self.outbound.send(frame).is_ok(),
            Err(e) => {
                warn!(error = %e, "failed to encode outbound message");
                false
            }
        }
    }

    /// Next state change or output, `None` once the task has ended
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        let event = self.events.recv().await;
        if event.is_none() {
            self.finished = true;
        }
        event
    }

    /// Whether the task has ended and every event was consumed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Ask the task to send a close frame and stop. Idempotent.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }

    /// Close and wait for the task to finish
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("endpoint", &redacted(&self.endpoint))
            .field("state", &self.state())
            .finish()
    }
}

enum Step {
    Shutdown,
    Outbound(String),
    Inbound(Option<Result<Message, tungstenite::Error>>),
}

struct Worker {
    endpoint: Url,
    policy: ReconnectPolicy,
    state: watch::Sender<ChannelState>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
    shutdown: oneshot::Receiver<()>,
}

impl Worker {
    async fn run(mut self) {
        let mut failures = 0u32;
        loop {
            let connected = tokio::select! {
                biased;
                _ = &mut self.shutdown => break,
                result = connect_async(self.endpoint.as_str()) => result,
            };

            let ended = match connected {
                Ok((socket, _response)) => {
                    failures = 0;
                    self.discard_pending();
                    self.set_state(ChannelState::Open);
                    match self.pump(socket).await {
                        Some(state) => state,
                        None => {
                            self.set_state(ChannelState::Closed);
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "session connect failed");
                    ChannelState::Errored
                }
            };

            self.set_state(ended);
            self.discard_pending();

            failures += 1;
            let Some(delay) = self.policy.delay(failures) else {
                debug!(failures, "not reconnecting");
                break;
            };
            debug!(attempt = failures, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                biased;
                _ = &mut self.shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
            self.set_state(ChannelState::Connecting);
        }
    }

    /// Move frames until the connection ends. Returns the terminal state, or
    /// `None` when shutdown was requested and the socket has been closed.
    async fn pump(&mut self, mut socket: Socket) -> Option<ChannelState> {
        loop {
            let step = tokio::select! {
                biased;
                _ = &mut self.shutdown => Step::Shutdown,
                frame = self.outbound.recv() => match frame {
                    Some(frame) => Step::Outbound(frame),
                    None => Step::Shutdown,
                },
                message = socket.next() => Step::Inbound(message),
            };

            match step {
                Step::Shutdown => {
                    // Frames accepted before the close request still go out
                    while let Ok(frame) = self.outbound.try_recv() {
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    if let Err(e) = socket.close(None).await {
                        debug!(error = %e, "close handshake failed");
                    }
                    info!("session channel closed");
                    return None;
                }
                Step::Outbound(frame) => {
                    if let Err(e) = socket.send(Message::Text(frame)).await {
                        return Some(Self::classify(e));
                    }
                }
                Step::Inbound(None) => {
                    debug!("session stream ended");
                    return Some(ChannelState::Closed);
                }
                Step::Inbound(Some(Err(e))) => return Some(Self::classify(e)),
                Step::Inbound(Some(Ok(message))) => match message {
                    Message::Text(text) => self.dispatch(&text),
                    Message::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => self.dispatch(&text),
                        Err(_) => debug!("dropping non-UTF-8 binary frame"),
                    },
                    Message::Close(frame) => {
                        debug!(?frame, "agent closed the session");
                        return Some(ChannelState::Closed);
                    }
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                },
            }
        }
    }

    fn classify(error: tungstenite::Error) -> ChannelState {
        match error {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                debug!("session connection closed");
                ChannelState::Closed
            }
            other => {
                warn!(error = %other, "session transport error");
                ChannelState::Errored
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match decode_inbound(text) {
            Ok(Some(InboundMessage::Output { content })) => {
                let _ = self.events.send(ChannelEvent::Output(content));
            }
            Ok(None) => debug!("ignoring frame of unknown type"),
            Err(e) => debug!(error = %e, "dropping malformed frame"),
        }
    }

    fn discard_pending(&mut self) {
        let mut dropped = 0usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "discarded frames queued for a dead connection");
        }
    }

    fn set_state(&self, next: ChannelState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(state = %next, "channel state");
            let _ = self.events.send(ChannelEvent::State(next));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn starts_connecting() {
        // Reserved port on loopback, nothing listens there
        let endpoint = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let channel = Channel::connect(endpoint, ReconnectPolicy::disabled());
        assert_eq!(channel.state(), ChannelState::Connecting);
        assert!(!channel.send(&OutboundMessage::text("x\n")));
    }

    #[tokio::test]
    async fn refused_connection_errors_and_ends() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = Url::parse(&format!("ws://127.0.0.1:{}/ws", port)).unwrap();
        let mut channel = Channel::connect(endpoint, ReconnectPolicy::disabled());
        let event = tokio::time::timeout(Duration::from_secs(5), channel.next_event())
            .await
            .unwrap();
        assert_eq!(event, Some(ChannelEvent::State(ChannelState::Errored)));
        assert_eq!(channel.next_event().await, None);
        assert!(channel.is_finished());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let endpoint = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let mut channel = Channel::connect(endpoint, ReconnectPolicy::disabled());
        channel.close();
        channel.close();
        channel.shutdown().await;
    }

    #[test]
    fn state_names() {
        assert_eq!(ChannelState::Open.to_string(), "open");
        assert!(ChannelState::Open.is_open());
        assert!(!ChannelState::Connecting.is_open());
    }
}
