//! Shortcut table and terminal key translation.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};

use crate::encoder::KeyChord;

/// One operator-facing shortcut button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortcut {
    pub label: String,
    pub key: String,
    #[serde(default)]
    pub mods: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl Shortcut {
    pub fn new(label: &str, key: &str, mods: &[&str], description: &str) -> Self {
        Self {
            label: label.to_string(),
            key: key.to_string(),
            mods: mods.iter().map(|m| m.to_string()).collect(),
            description: description.to_string(),
        }
    }

    pub fn chord(&self) -> KeyChord {
        KeyChord::with_modifiers(self.key.clone(), self.mods.iter().cloned())
    }
}

/// Commands, execution control, then completion and history
pub fn default_shortcuts() -> Vec<Shortcut> {
    vec![
        Shortcut::new("/help", "/help", &[], "help"),
        Shortcut::new("/clear", "/clear", &[], "clear screen"),
        Shortcut::new("/model", "/model", &[], "switch model"),
        Shortcut::new("/memory", "/memory", &[], "memory"),
        Shortcut::new("Esc", "Escape", &[], "cancel"),
        Shortcut::new("Enter", "Enter", &[], "run"),
        Shortcut::new("Ctrl+C", "c", &["ctrl"], "interrupt"),
        Shortcut::new("Ctrl+L", "l", &["ctrl"], "redraw"),
        Shortcut::new("Tab", "Tab", &[], "complete"),
        Shortcut::new("S+Tab", "Tab", &["shift"], "reverse"),
        Shortcut::new("Up", "Up", &[], "previous"),
        Shortcut::new("Down", "Down", &[], "next"),
    ]
}

/// Map a function key (F1 = 0) to its shortcut slot
pub fn shortcut_slot(key: &KeyEvent) -> Option<usize> {
    match key.code {
        KeyCode::F(n @ 1..=12) if key.modifiers.is_empty() => Some((n - 1) as usize),
        _ => None,
    }
}

/// Translate a local key press into the agent's key vocabulary.
///
/// Returns `None` for keys with no remote meaning.
pub fn chord_from_key_event(key: &KeyEvent) -> Option<KeyChord> {
    let name = match key.code {
        KeyCode::Enter => "Enter".to_string(),
        KeyCode::Esc => "Escape".to_string(),
        KeyCode::Tab => "Tab".to_string(),
        KeyCode::BackTab => "Tab".to_string(),
        KeyCode::Backspace => "Backspace".to_string(),
        KeyCode::Delete => "Delete".to_string(),
        KeyCode::Insert => "Insert".to_string(),
        KeyCode::Up => "Up".to_string(),
        KeyCode::Down => "Down".to_string(),
        KeyCode::Left => "Left".to_string(),
        KeyCode::Right => "Right".to_string(),
        KeyCode::Home => "Home".to_string(),
        KeyCode::End => "End".to_string(),
        KeyCode::PageUp => "PageUp".to_string(),
        KeyCode::PageDown => "PageDown".to_string(),
        KeyCode::Char(c) => c.to_string(),
        _ => return None,
    };

    let mut chord = KeyChord::new(name);
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        chord.add_modifier("ctrl");
    }
    if key.modifiers.contains(KeyModifiers::ALT) {
        chord.add_modifier("alt");
    }
    // Shift is already folded into the character for printable keys
    let shifted = key.modifiers.contains(KeyModifiers::SHIFT) && !matches!(key.code, KeyCode::Char(_));
    if shifted || key.code == KeyCode::BackTab {
        chord.add_modifier("shift");
    }
    Some(chord)
}
