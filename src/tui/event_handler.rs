use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use super::app::TuiApp;
use crate::controller::{InputMode, SessionController};
use crate::keys::{chord_from_key_event, shortcut_slot};

const NOT_CONNECTED: &str = "Not connected";

pub struct EventHandler<'a> {
    app: &'a mut TuiApp,
    controller: &'a mut SessionController,
}

impl<'a> EventHandler<'a> {
    pub fn new(app: &'a mut TuiApp, controller: &'a mut SessionController) -> Self {
        Self { app, controller }
    }

    pub async fn handle_key_event(&mut self, key: KeyEvent) -> Result<bool> {
        // Returns true if the app should quit, false otherwise
        if let Some(slot) = shortcut_slot(&key) {
            self.handle_shortcut(slot);
            return Ok(false);
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('q') if ctrl => {
                self.app.quit();
                Ok(true)
            }
            KeyCode::Char('t') if ctrl => {
                let mode = self.controller.toggle_input_mode();
                self.app.set_status_info(match mode {
                    InputMode::Text => "Text input",
                    InputMode::Keys => "Key input: keys are sent as you press them",
                });
                Ok(false)
            }
            KeyCode::Char('u') if ctrl => {
                self.handle_unbind();
                Ok(false)
            }
            _ if !self.controller.state().is_bound() => {
                self.handle_bind_input(key);
                Ok(false)
            }
            _ => {
                match self.controller.input_mode() {
                    InputMode::Text => self.handle_text_input(key),
                    InputMode::Keys => self.handle_key_forward(key),
                }
                Ok(false)
            }
        }
    }

    fn handle_unbind(&mut self) {
        if !self.controller.state().is_bound() {
            self.app.set_status_info("Not bound");
            return;
        }
        self.app.clear_input();
        match self.controller.unbind() {
            Ok(()) => self.app.set_status_success("Unbound"),
            Err(e) => self.app.set_status_error(format!("Unbound, but state was not saved: {}", e)),
        }
    }

    fn handle_shortcut(&mut self, slot: usize) {
        let Some(shortcut) = self.app.shortcuts.get(slot) else {
            return;
        };
        let chord = shortcut.chord();
        if self.controller.submit_chord(&chord) {
            self.app.clear_status();
        } else {
            self.app.set_status_error(NOT_CONNECTED);
        }
    }

    fn handle_bind_input(&mut self, key: KeyEvent) {
        if self.app.is_binding() {
            return;
        }
        match key.code {
            KeyCode::Enter => {
                let code = self.app.input.trim().to_string();
                if code.is_empty() {
                    self.app.set_status_error("Enter the bind code shown by the agent");
                    return;
                }
                self.app.clear_input();
                self.app.set_status_info(format!("Binding with code {}...", code));
                self.app.request_bind(code);
            }
            KeyCode::Backspace => self.app.delete_char(),
            KeyCode::Esc => self.app.clear_input(),
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.app.add_char(c)
            }
            _ => {}
        }
    }

    fn handle_text_input(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => {
                if self.app.input.trim().is_empty() {
                    return;
                }
                if self.controller.submit_line(&self.app.input) {
                    self.app.clear_input();
                    self.app.clear_status();
                } else {
                    // Keep the line so it can be sent once reconnected
                    self.app.set_status_error(NOT_CONNECTED);
                }
            }
            KeyCode::Backspace => self.app.delete_char(),
            KeyCode::Esc => self.app.clear_input(),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.app.clear_input()
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.app.add_char(c)
            }
            _ => {}
        }
    }

    fn handle_key_forward(&mut self, key: KeyEvent) {
        let Some(chord) = chord_from_key_event(&key) else {
            return;
        };
        if self.controller.submit_chord(&chord) {
            self.app.clear_status();
        } else {
            self.app.set_status_error(NOT_CONNECTED);
        }
    }
}
