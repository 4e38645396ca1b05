use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::{ChannelOptions, ReconnectPolicy};
use crate::controller::ControllerSettings;
use crate::endpoint::{DEFAULT_CONTROL_PORT, Origin};
use crate::keys::{Shortcut, default_shortcuts};
use crate::render::Palette;

pub const DEFAULT_CONFIG_FILE: &str = ".rterm.toml";
pub const DEFAULT_STATE_FILE: &str = ".rterm-session.toml";
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1";
pub const DEFAULT_KEY_ECHO_MS: u64 = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Front-end address the operator uses, e.g. `http://192.168.1.5:3000`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_echo_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    #[serde(default)]
    pub palette: Palette,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shortcuts: Vec<Shortcut>,

    // This field is not serialized, just used at runtime
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.config_path = Some(PathBuf::from(path));
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            return Self::from_file(path);
        }
        Ok(Config {
            config_path: Some(PathBuf::from(path)),
            ..Config::default()
        })
    }

    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Explicit values for every key, written by `--init`
    pub fn starter() -> Self {
        Config {
            origin: Some(DEFAULT_ORIGIN.to_string()),
            control_port: Some(DEFAULT_CONTROL_PORT),
            state_file: Some(PathBuf::from(DEFAULT_STATE_FILE)),
            key_echo_ms: Some(DEFAULT_KEY_ECHO_MS),
            log_file: Some(PathBuf::from("rterm.log")),
            reconnect: ReconnectPolicy::default(),
            palette: Palette::default(),
            shortcuts: default_shortcuts(),
            config_path: None,
        }
    }

    pub fn origin(&self) -> anyhow::Result<Origin> {
        let raw = self.origin.as_deref().unwrap_or(DEFAULT_ORIGIN);
        Ok(Origin::parse(raw)?)
    }

    pub fn control_port(&self) -> u16 {
        self.control_port.unwrap_or(DEFAULT_CONTROL_PORT)
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE))
    }

    pub fn key_echo(&self) -> Duration {
        Duration::from_millis(self.key_echo_ms.unwrap_or(DEFAULT_KEY_ECHO_MS))
    }

    /// Configured shortcuts, or the built-in table when none are listed
    pub fn shortcuts(&self) -> Vec<Shortcut> {
        if self.shortcuts.is_empty() {
            default_shortcuts()
        } else {
            self.shortcuts.clone()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Err(e) = self.origin() {
            anyhow::bail!("Invalid origin: {}", e);
        }

        if self.control_port == Some(0) {
            anyhow::bail!("control_port must be between 1 and 65535");
        }

        if self.reconnect.initial_backoff > self.reconnect.max_backoff {
            anyhow::bail!(
                "reconnect.initial_backoff_ms ({}) exceeds reconnect.max_backoff_ms ({})",
                self.reconnect.initial_backoff.as_millis(),
                self.reconnect.max_backoff.as_millis()
            );
        }

        if let Some((name, value)) = self.palette.invalid_entry() {
            anyhow::bail!("palette.{} must be a #rgb or #rrggbb colour, got '{}'", name, value);
        }

        for shortcut in &self.shortcuts {
            if shortcut.key.trim().is_empty() {
                anyhow::bail!("Shortcut '{}' has an empty key", shortcut.label);
            }
        }

        Ok(())
    }

    pub fn controller_settings(&self) -> anyhow::Result<ControllerSettings> {
        Ok(ControllerSettings {
            origin: self.origin()?,
            channel: ChannelOptions {
                control_port: self.control_port(),
                reconnect: self.reconnect,
            },
            key_echo: self.key_echo(),
            palette: self.palette.clone(),
        })
    }
}
