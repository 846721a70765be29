//! relaycast binary: parse the CLI, load the config, run the relay.

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser};

use relaycast::{Server, ServerConfig};

#[derive(Parser)]
#[command(
    name = "relaycast",
    about = "Multi-output audio streaming relay",
    version,
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Args {
    /// Configuration file path.
    #[arg(short = 'c', long = "config", value_name = "PATH", default_value = "config.json")]
    config: PathBuf,

    /// Display help.
    #[arg(short = '?', long = "help", action = ArgAction::Help)]
    help: Option<bool>,

    /// Display version.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = ServerConfig::load(&args.config)
        .with_context(|| format!("failed to read configuration {}", args.config.display()))?;
    let server = Server::new(config).context("failed to start server")?;

    let lifecycle = server.lifecycle();
    ctrlc::set_handler(move || {
        tracing::info!("received termination signal, quitting");
        lifecycle.terminate();
    })
    .context("failed to install signal handler")?;

    server.run();
    Ok(())
}
