//! qlserve - command-line front end for the analysis engine's command server.
//!
//! Each invocation builds a [`CliServer`], runs one subcommand against it and
//! prints the result as pretty JSON on stdout. Logs go to stderr so stdout
//! stays machine-readable.
//!
//! ```text
//! main() -> load config -> CliServer::new -> execute(command) -> close()
//! ```

mod commands;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use qlserve_config::QlserveConfig;
use qlserve_server::{CliServer, ServerConfig};
use qlserve_types::VersionRange;

use crate::commands::Command;

#[derive(Debug, Parser)]
#[command(name = "qlserve")]
#[command(about = "Query the analysis engine for versions, packs and languages")]
struct Cli {
    /// Engine executable (overrides config and QLSERVE_ENGINE)
    #[arg(long, global = true)]
    engine: Option<String>,
    /// Config file (defaults to ~/.qlserve/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Per-command timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
    /// Fail unless the engine version matches this range, e.g. ">=2.12"
    #[arg(long, global = true)]
    require: Option<VersionRange>,
    #[command(subcommand)]
    command: Command,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .unwrap_or_default();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_server_config(cli: &Cli) -> Result<ServerConfig> {
    let file = match &cli.config {
        Some(path) => QlserveConfig::load_from(path)?
            .with_context(|| format!("config file not found: {}", path.display()))?,
        None => QlserveConfig::load()?.unwrap_or_default(),
    };

    let mut config = match &cli.engine {
        Some(engine) => file
            .engine
            .clone()
            .unwrap_or_default()
            .to_server_config(Some(engine.clone())),
        None => file.to_server_config(),
    }
    .context("invalid engine configuration")?;

    if let Some(secs) = cli.timeout {
        config = config.with_command_timeout(Duration::from_secs(secs))?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_server_config(&cli)?;
    tracing::debug!(executable = config.executable(), "Loaded configuration");

    let server = CliServer::new(config);
    let result = tokio::select! {
        result = commands::execute(&server, cli.require.as_ref(), cli.command) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
    };
    server.close().await;

    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
