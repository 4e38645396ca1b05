use anyhow::Context;
use clap::Parser;

use remote_term::cli::{Cli, apply_overrides, init_config, run_command};
use remote_term::config::Config;
use remote_term::logging::{self, LogTarget};
use remote_term::tui;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();
    let config_path = &cli.config;

    // Handle --init flag
    if cli.init {
        return init_config(config_path);
    }

    // Load config, falling back to defaults when the file is absent
    let mut config = Config::load_or_default(config_path)
        .with_context(|| format!("Failed to load config from '{}'", config_path))?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    match &cli.command {
        Some(command) => {
            logging::init(&LogTarget::for_command(config.log_file.as_deref()))?;
            run_command(command, &config).await
        }
        None => {
            // The TUI owns stdout, so logs must not reach the terminal
            logging::init(&LogTarget::for_tui(config.log_file.as_deref()))?;
            tui::run(&config).await
        }
    }
}
