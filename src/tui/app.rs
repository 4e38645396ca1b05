use ansi_to_tui::IntoText;
use ratatui::text::Text;

use crate::controller::{DisplayBuffer, Update};
use crate::keys::Shortcut;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusType {
    Success,
    Error,
    Info,
}

/// Parsed output, reused until the display buffer changes
#[derive(Default)]
struct OutputCache {
    generation: Option<u64>,
    text: Text<'static>,
}

impl OutputCache {
    fn get(&mut self, display: &DisplayBuffer) -> &Text<'static> {
        if self.generation != Some(display.generation()) {
            self.text = parse_output(display.as_str());
            self.generation = Some(display.generation());
        }
        &self.text
    }
}

fn parse_output(raw: &str) -> Text<'static> {
    match raw.as_bytes().into_text() {
        Ok(text) => text,
        Err(_) => Text::raw(strip_ansi_escapes::strip_str(raw)),
    }
}

/// Screen-local state; everything about the session lives in the controller
pub struct TuiApp {
    pub input: String,
    pub shortcuts: Vec<Shortcut>,
    pub status_message: Option<(String, StatusType)>,
    pub should_quit: bool,
    pending_bind: Option<String>,
    output: OutputCache,
}

impl TuiApp {
    pub fn new(shortcuts: Vec<Shortcut>) -> Self {
        Self {
            input: String::new(),
            shortcuts,
            status_message: None,
            should_quit: false,
            pending_bind: None,
            output: OutputCache::default(),
        }
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    pub fn set_status_success(&mut self, message: impl Into<String>) {
        self.status_message = Some((message.into(), StatusType::Success));
    }

    pub fn set_status_error(&mut self, message: impl Into<String>) {
        self.status_message = Some((message.into(), StatusType::Error));
    }

    pub fn set_status_info(&mut self, message: impl Into<String>) {
        self.status_message = Some((message.into(), StatusType::Info));
    }

    pub fn clear_status(&mut self) {
        self.status_message = None;
    }

    pub fn add_char(&mut self, c: char) {
        self.input.push(c);
    }

    pub fn delete_char(&mut self) {
        self.input.pop();
    }

    pub fn clear_input(&mut self) {
        self.input.clear();
    }

    /// Queue a bind code; the event loop runs the exchange after the next draw
    pub fn request_bind(&mut self, code: String) {
        self.pending_bind = Some(code);
    }

    pub fn take_pending_bind(&mut self) -> Option<String> {
        self.pending_bind.take()
    }

    pub fn is_binding(&self) -> bool {
        self.pending_bind.is_some()
    }

    pub fn output_text(&mut self, display: &DisplayBuffer) -> &Text<'static> {
        self.output.get(display)
    }

    /// Surface controller changes the operator should know about
    pub fn on_update(&mut self, update: &Update) {
        match update {
            Update::Session(None) => self.set_status_info("Session cleared"),
            Update::Session(Some(session)) => {
                self.set_status_info(format!("Switched to device {}", session.device_id))
            }
            Update::ChannelEnded => {
                self.set_status_info("Agent not reachable yet. Ctrl+U to unbind and bind again")
            }
            Update::State(_) | Update::Display => {}
        }
    }
}
