use std::fmt;

use crate::protocol::OutboundMessage;

/// Keys starting with this character are commands, sent as typed lines
pub const COMMAND_PREFIX: char = '/';

/// A named key plus an ordered set of modifier names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    key: String,
    modifiers: Vec<String>,
}

impl KeyChord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            modifiers: Vec::new(),
        }
    }

    /// Build a chord; repeated modifiers collapse, first occurrence wins the position
    pub fn with_modifiers<I, S>(key: impl Into<String>, modifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut chord = Self::new(key);
        for modifier in modifiers {
            chord.add_modifier(modifier);
        }
        chord
    }

    pub fn add_modifier(&mut self, modifier: impl Into<String>) {
        let modifier = modifier.into();
        if !self.modifiers.contains(&modifier) {
            self.modifiers.push(modifier);
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn modifiers(&self) -> &[String] {
        &self.modifiers
    }

    /// Whether this "key" is really a command such as `/help`. A bare `/` is
    /// an ordinary keystroke.
    pub fn is_command(&self) -> bool {
        self.key.len() > COMMAND_PREFIX.len_utf8() && self.key.starts_with(COMMAND_PREFIX)
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_command() || self.modifiers.is_empty() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}+{}", self.modifiers.join("+"), self.key)
        }
    }
}

/// Operator intent before it becomes a wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A submitted line from the text box
    Line(String),
    /// A key or shortcut button
    Key(KeyChord),
}

/// Encode an input event as an outbound message.
///
/// Empty lines are the caller's concern; this always produces a message.
pub fn encode(event: &InputEvent) -> OutboundMessage {
    match event {
        InputEvent::Line(text) => OutboundMessage::text(format!("{}\n", text)),
        InputEvent::Key(chord) if chord.is_command() => {
            OutboundMessage::text(format!("{}\n", chord.key()))
        }
        InputEvent::Key(chord) => OutboundMessage::key(chord.key(), chord.modifiers().to_vec()),
    }
}
