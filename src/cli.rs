use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::bind::HttpBinder;
use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::controller::{ControllerState, SessionController, Update};
use crate::endpoint::redacted;
use crate::session::SessionStore;

/// rterm - remote terminal session client
#[derive(Parser, Debug)]
#[command(name = "rterm")]
#[command(version)]
#[command(about = "Drive a remote terminal agent from your terminal")]
#[command(long_about = "rterm attaches to a terminal agent through its control plane.

A short bind code shown by the agent is exchanged for the agent's device id, which is
remembered between runs. rterm then mirrors the agent's terminal and forwards your typed
lines and key chords to it.

Quick start:
  1. Run 'rterm --init' to generate a config file
  2. Set 'origin' in .rterm.toml to the address of the control plane
  3. Run 'rterm bind <code>' with the code shown by the agent
  4. Run 'rterm' to attach")]
pub struct Cli {
    /// Path to config file (defaults to .rterm.toml)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Origin of the control plane, e.g. http://192.168.1.5:3000 (overrides config)
    #[arg(long)]
    pub origin: Option<String>,

    /// Control-plane port (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Initialize a new .rterm.toml config file
    #[arg(long)]
    pub init: bool,

    /// One-shot command; without one the TUI starts
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Exchange a bind code for a device id and remember it
    Bind {
        /// The code shown by the agent
        code: String,
        /// Access token to present (persisted for later runs)
        #[arg(long)]
        token: Option<String>,
    },
    /// Forget the remembered device
    Unbind,
    /// Show the binding and try to reach the agent
    Status {
        /// How long to wait for the connection, in milliseconds
        #[arg(long, default_value = "3000")]
        wait_ms: u64,
    },
    /// Print the agent's current terminal buffer
    Snapshot {
        /// Strip escape sequences instead of rendering HTML
        #[arg(long)]
        plain: bool,
        /// Wrap the HTML in a styled <pre> element
        #[arg(long, conflicts_with = "plain")]
        document: bool,
        /// How long to wait for the first buffer, in milliseconds
        #[arg(long, default_value = "5000")]
        wait_ms: u64,
    },
    /// Send a line of text (a newline is appended)
    Send {
        text: String,
        #[arg(long, default_value = "5000")]
        wait_ms: u64,
    },
    /// Send a named key, e.g. 'rterm key c --mod ctrl'
    Key {
        key: String,
        /// Modifier to hold (ctrl, alt, shift, meta); may be repeated
        #[arg(long = "mod")]
        mods: Vec<String>,
        #[arg(long, default_value = "5000")]
        wait_ms: u64,
    },
}

/// Write a starter config file unless one already exists
pub fn init_config(config_path: &str) -> anyhow::Result<()> {
    if Path::new(config_path).exists() {
        println!("Config file '{}' already exists.", config_path);
        return Ok(());
    }

    Config::starter()
        .save(config_path)
        .with_context(|| format!("Failed to write config to '{}'", config_path))?;

    println!("Created {}", config_path);
    println!("\nNext steps:");
    println!("  1. Set 'origin' in {} to your control plane address", config_path);
    println!("  2. Run 'rterm bind <code>' with the code shown by the agent");
    println!("  3. Run 'rterm' to attach");
    Ok(())
}

/// Command-line flags take precedence over the file
pub fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(origin) = &cli.origin {
        config.origin = Some(origin.clone());
    }
    if let Some(port) = cli.port {
        config.control_port = Some(port);
    }
}

pub fn open_store(config: &Config) -> anyhow::Result<SessionStore> {
    let state_file = config.state_file();
    SessionStore::file(&state_file)
        .with_context(|| format!("Failed to load session state from {}", state_file.display()))
}

/// Build a controller over `store` with the binder and settings from `config`
pub fn build_controller(store: SessionStore, config: &Config) -> anyhow::Result<SessionController> {
    let origin = config.origin()?;
    let binder = HttpBinder::new(&origin, config.control_port())?;
    Ok(SessionController::new(
        store,
        Arc::new(binder),
        config.controller_settings()?,
    ))
}

/// Run a one-shot command and print the result
pub async fn run_command(command: &Commands, config: &Config) -> anyhow::Result<()> {
    match command {
        Commands::Unbind => {
            let store = open_store(config)?;
            match store.get() {
                Some(session) => {
                    store.clear()?;
                    println!("Unbound from device {}", session.device_id);
                }
                None => println!("Not bound"),
            }
            Ok(())
        }
        Commands::Bind { code, token } => {
            let mut controller = build_controller(open_store(config)?, config)?;
            let result = controller.bind_with_token(code, token.clone()).await;
            controller.shutdown().await;
            let session = result.map_err(|e| anyhow!("Bind failed: {}", e))?;
            println!("Bound to device {}", session.device_id);
            Ok(())
        }
        Commands::Status { wait_ms } => {
            let mut controller = build_controller(open_store(config)?, config)?;
            if controller.state().is_bound() {
                wait_until(&mut controller, *wait_ms, |c| {
                    c.state() == ControllerState::BoundConnected
                })
                .await;
            }
            println!("{}", format_status(&controller, config));
            controller.shutdown().await;
            Ok(())
        }
        Commands::Snapshot {
            plain,
            document,
            wait_ms,
        } => {
            let mut controller = require_bound(config)?;
            let received = wait_until(&mut controller, *wait_ms, |c| c.display().generation() > 0).await;
            let output = if received {
                Some(snapshot_output(&controller, *plain, *document))
            } else {
                None
            };
            controller.shutdown().await;
            let output = output.ok_or_else(|| {
                anyhow!("No terminal output received within {}ms", wait_ms)
            })?;
            println!("{}", output);
            Ok(())
        }
        Commands::Send { text, wait_ms } => {
            let mut controller = require_connected(config, *wait_ms).await?;
            let sent = controller.submit_line(text);
            controller.shutdown().await;
            if !sent {
                return Err(anyhow!("Nothing sent (empty line or connection lost)"));
            }
            Ok(())
        }
        Commands::Key { key, mods, wait_ms } => {
            let mut controller = require_connected(config, *wait_ms).await?;
            let sent = controller.submit_key(key, mods);
            controller.shutdown().await;
            if !sent {
                return Err(anyhow!("Key not sent (connection lost)"));
            }
            Ok(())
        }
    }
}

fn require_bound(config: &Config) -> anyhow::Result<SessionController> {
    let controller = build_controller(open_store(config)?, config)?;
    if !controller.state().is_bound() {
        return Err(anyhow!("Not bound. Run 'rterm bind <code>' first."));
    }
    Ok(controller)
}

async fn require_connected(config: &Config, wait_ms: u64) -> anyhow::Result<SessionController> {
    let mut controller = require_bound(config)?;
    let connected = wait_until(&mut controller, wait_ms, |c| {
        c.state() == ControllerState::BoundConnected
    })
    .await;
    if !connected {
        let state = controller.state();
        controller.shutdown().await;
        return Err(anyhow!("Could not connect to the agent ({})", state));
    }
    Ok(controller)
}

/// Drive the controller until `done` holds, the channel ends, or `wait_ms` passes
async fn wait_until(
    controller: &mut SessionController,
    wait_ms: u64,
    done: impl Fn(&SessionController) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(wait_ms);
    while !done(controller) {
        match tokio::time::timeout_at(deadline, controller.next_update()).await {
            Ok(Update::ChannelEnded) | Err(_) => break,
            Ok(_) => {}
        }
    }
    done(controller)
}

fn format_status(controller: &SessionController, config: &Config) -> String {
    let mut lines = Vec::new();
    lines.push(format!("origin:   {}", controller.settings().origin));
    match controller.session() {
        Some(session) => {
            lines.push(format!("device:   {}", session.device_id));
            let endpoint = controller
                .settings()
                .origin
                .session_endpoint(config.control_port(), session)
                .map(|url| redacted(&url))
                .unwrap_or_else(|e| e.to_string());
            lines.push(format!("endpoint: {}", endpoint));
        }
        None => lines.push("device:   (none)".to_string()),
    }
    lines.push(format!("state:    {}", controller.state()));
    lines.join("\n")
}

fn snapshot_output(controller: &SessionController, plain: bool, document: bool) -> String {
    let raw = controller.display().as_str();
    if plain {
        strip_ansi_escapes::strip_str(raw)
    } else if document {
        crate::render::HtmlRenderer::new(controller.settings().palette.clone()).render_document(raw)
    } else {
        controller.render_html()
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
