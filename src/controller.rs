//! Session controller: binding lifecycle, channel ownership, and the display
//! buffer the operator sees.
//!
//! The controller is the only owner of the channel. Every path that leaves a
//! bound state (unbind, rebind, a store change, shutdown) drops the channel,
//! which closes the socket.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bind::{BindError, Binder};
use crate::channel::{Channel, ChannelEvent, ChannelOptions, ChannelState};
use crate::encoder::{InputEvent, KeyChord, encode};
use crate::endpoint::Origin;
use crate::protocol::OutboundMessage;
use crate::render::{HtmlRenderer, Palette};
use crate::session::{Session, SessionStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Unbound,
    BoundConnecting,
    BoundConnected,
    BoundDisconnected,
}

impl ControllerState {
    pub fn is_bound(self) -> bool {
        self != ControllerState::Unbound
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Unbound => "unbound",
            ControllerState::BoundConnecting => "connecting",
            ControllerState::BoundConnected => "connected",
            ControllerState::BoundDisconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Which input surface is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    /// Free-text line box
    #[default]
    Text,
    /// Shortcut buttons and forwarded key chords
    Keys,
}

impl InputMode {
    pub fn toggled(self) -> Self {
        match self {
            InputMode::Text => InputMode::Keys,
            InputMode::Keys => InputMode::Text,
        }
    }
}

/// Latest full terminal buffer received from the agent
#[derive(Debug, Clone, Default)]
pub struct DisplayBuffer {
    content: String,
    generation: u64,
}

impl DisplayBuffer {
    pub fn replace(&mut self, content: String) {
        self.content = content;
        self.generation += 1;
    }

    pub fn clear(&mut self) {
        if !self.content.is_empty() {
            self.content.clear();
            self.generation += 1;
        }
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Bumped on every change, for render caching
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone)]
struct KeyEcho {
    label: String,
    shown_at: Instant,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub origin: Origin,
    pub channel: ChannelOptions,
    /// How long a sent key stays visible
    pub key_echo: Duration,
    pub palette: Palette,
}

impl ControllerSettings {
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            channel: ChannelOptions::default(),
            key_echo: Duration::from_millis(500),
            palette: Palette::default(),
        }
    }
}

/// What changed after `next_update`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    State(ControllerState),
    Display,
    /// The persisted session changed underneath us
    Session(Option<Session>),
    /// The channel task ended and will not reconnect
    ChannelEnded,
}

enum Next {
    Channel(Option<ChannelEvent>),
    Store,
}

pub struct SessionController {
    store: SessionStore,
    store_rx: watch::Receiver<Option<Session>>,
    binder: Arc<dyn Binder>,
    settings: ControllerSettings,
    renderer: HtmlRenderer,
    session: Option<Session>,
    channel: Option<Channel>,
    state: ControllerState,
    display: DisplayBuffer,
    input_mode: InputMode,
    key_echo: Option<KeyEcho>,
}

impl SessionController {
    /// Build a controller; a persisted session starts connecting right away,
    /// so this must run inside a tokio runtime.
    pub fn new(store: SessionStore, binder: Arc<dyn Binder>, settings: ControllerSettings) -> Self {
        let store_rx = store.subscribe();
        let renderer = HtmlRenderer::new(settings.palette.clone());
        let mut controller = Self {
            store,
            store_rx,
            binder,
            settings,
            renderer,
            session: None,
            channel: None,
            state: ControllerState::Unbound,
            display: DisplayBuffer::default(),
            input_mode: InputMode::default(),
            key_echo: None,
        };
        if let Some(session) = controller.store.get() {
            info!(device_id = %session.device_id, "resuming persisted session");
            controller.connect(session);
        }
        controller
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn channel_state(&self) -> Option<ChannelState> {
        self.channel.as_ref().map(Channel::state)
    }

    pub fn display(&self) -> &DisplayBuffer {
        &self.display
    }

    pub fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Current display buffer as escaped HTML
    pub fn render_html(&self) -> String {
        self.renderer.render(self.display.as_str())
    }

    /// Exchange a bind code for a device id and connect to it
    pub async fn bind(&mut self, code: &str) -> Result<Session, BindError> {
        self.bind_with_token(code, None).await
    }

    /// Like `bind`, presenting `token` instead of the stored one. The token is
    /// persisted only if the exchange succeeds.
    pub async fn bind_with_token(
        &mut self,
        code: &str,
        token: Option<String>,
    ) -> Result<Session, BindError> {
        let code = code.trim().to_string();
        if code.is_empty() {
            return Err(BindError::EmptyCode);
        }
        let binder = Arc::clone(&self.binder);
        let device_id = tokio::task::spawn_blocking(move || binder.bind(&code))
            .await
            .map_err(|e| BindError::Network(format!("bind task failed: {}", e)))??;
        self.bind_device_with_token(device_id, token)
    }

    /// Persist a binding to `device_id` and open a fresh channel for it
    pub fn bind_device(&mut self, device_id: impl Into<String>) -> Result<Session, BindError> {
        self.bind_device_with_token(device_id, None)
    }

    fn bind_device_with_token(
        &mut self,
        device_id: impl Into<String>,
        token: Option<String>,
    ) -> Result<Session, BindError> {
        let session = Session::with_token(device_id, token.or_else(|| self.store.token()));
        self.store.set(session.clone())?;
        // Our own write, not an outside change
        self.store_rx.mark_unchanged();
        info!(device_id = %session.device_id, "bound");
        self.connect(session.clone());
        Ok(session)
    }

    /// Forget the binding and close the channel.
    ///
    /// Local teardown happens even if the store cannot be written.
    pub fn unbind(&mut self) -> Result<(), StoreError> {
        let result = self.store.clear();
        self.store_rx.mark_unchanged();
        self.reset_unbound();
        info!("unbound");
        result
    }

    /// Send a typed line. Blank lines are not sent.
    pub fn submit_line(&mut self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        self.send(encode(&InputEvent::Line(text.to_string())))
    }

    pub fn submit_key(&mut self, key: &str, modifiers: &[String]) -> bool {
        self.submit_chord(&KeyChord::with_modifiers(key, modifiers.iter().cloned()))
    }

    /// Send a chord and, if it went out, show it briefly
    pub fn submit_chord(&mut self, chord: &KeyChord) -> bool {
        let sent = self.send(encode(&InputEvent::Key(chord.clone())));
        if sent {
            self.key_echo = Some(KeyEcho {
                label: chord.to_string(),
                shown_at: Instant::now(),
            });
        }
        sent
    }

    pub fn switch_input_mode(&mut self, mode: InputMode) {
        self.input_mode = mode;
    }

    pub fn toggle_input_mode(&mut self) -> InputMode {
        self.input_mode = self.input_mode.toggled();
        self.input_mode
    }

    /// Label of the last sent key while it is still within the echo window
    pub fn key_echo(&self, now: Instant) -> Option<&str> {
        self.key_echo
            .as_ref()
            .filter(|echo| now.saturating_duration_since(echo.shown_at) < self.settings.key_echo)
            .map(|echo| echo.label.as_str())
    }

    /// Fold one channel event into the controller state
    pub fn apply(&mut self, event: ChannelEvent) -> Update {
        match event {
            ChannelEvent::Output(content) => {
                self.display.replace(content);
                Update::Display
            }
            ChannelEvent::State(state) => {
                if self.session.is_some() {
                    self.state = match state {
                        ChannelState::Connecting => ControllerState::BoundConnecting,
                        ChannelState::Open => ControllerState::BoundConnected,
                        ChannelState::Closed | ChannelState::Errored => {
                            ControllerState::BoundDisconnected
                        }
                    };
                }
                debug!(channel = %state, controller = %self.state, "state");
                Update::State(self.state)
            }
        }
    }

    /// Wait for the next channel event or persisted-session change and apply it
    pub async fn next_update(&mut self) -> Update {
        loop {
            let channel_live = self.channel.as_ref().is_some_and(|c| !c.is_finished());
            let next = tokio::select! {
                event = next_channel_event(&mut self.channel), if channel_live => Next::Channel(event),
                _ = self.store_rx.changed() => Next::Store,
            };

            match next {
                Next::Channel(Some(event)) => return self.apply(event),
                Next::Channel(None) => {
                    debug!("channel task ended");
                    return Update::ChannelEnded;
                }
                Next::Store => {
                    let latest = self.store_rx.borrow_and_update().clone();
                    if let Some(update) = self.on_store_change(latest) {
                        return update;
                    }
                }
            }
        }
    }

    /// Close the channel and wait for its task
    pub async fn shutdown(mut self) {
        if let Some(channel) = self.channel.take() {
            channel.shutdown().await;
        }
    }

    fn on_store_change(&mut self, latest: Option<Session>) -> Option<Update> {
        match latest {
            None if self.session.is_some() => {
                info!("session cleared elsewhere");
                self.reset_unbound();
                Some(Update::Session(None))
            }
            Some(session) if self.session.as_ref() != Some(&session) => {
                info!(device_id = %session.device_id, "session changed elsewhere, reconnecting");
                self.connect(session.clone());
                Some(Update::Session(Some(session)))
            }
            _ => None,
        }
    }

    fn send(&self, message: OutboundMessage) -> bool {
        if self.state != ControllerState::BoundConnected {
            debug!(state = %self.state, "input dropped");
            return false;
        }
        self.channel
            .as_ref()
            .is_some_and(|channel| channel.send(&message))
    }

    fn connect(&mut self, session: Session) {
        self.teardown();
        self.display.clear();
        self.key_echo = None;
        match Channel::open(&session, &self.settings.origin, &self.settings.channel) {
            Ok(channel) => {
                self.channel = Some(channel);
                self.state = ControllerState::BoundConnecting;
            }
            Err(e) => {
                warn!(error = %e, "cannot derive session endpoint");
                self.state = ControllerState::BoundDisconnected;
            }
        }
        self.session = Some(session);
    }

    fn reset_unbound(&mut self) {
        self.teardown();
        self.session = None;
        self.display.clear();
        self.key_echo = None;
        self.state = ControllerState::Unbound;
    }

    fn teardown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }
}

async fn next_channel_event(channel: &mut Option<Channel>) -> Option<ChannelEvent> {
    match channel {
        Some(channel) => channel.next_event().await,
        None => std::future::pending().await,
    }
}
