//! Subcommands and their execution against a [`CliServer`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::{Value, json};

use qlserve_server::CliServer;
use qlserve_types::VersionRange;

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Print the engine version
    Version,
    /// Print the heap flags for a total memory budget in MB
    Ram {
        #[arg(allow_negative_numbers = true)]
        total_mb: i64,
    },
    /// Resolve installed packs, searching FOLDERS in addition to the defaults
    Qlpacks { folders: Vec<PathBuf> },
    /// List languages the engine can extract
    Languages,
    /// Determine which language(s) a query file targets
    Query {
        /// Query file (.ql)
        file: PathBuf,
        /// Additional pack search roots
        folders: Vec<PathBuf>,
    },
}

impl Command {
    fn needs_engine(&self) -> bool {
        !matches!(self, Command::Ram { .. })
    }
}

/// Run `command` and return its JSON result.
///
/// With `require` set, the engine version is checked first and a mismatch
/// aborts the command.
pub(crate) async fn execute(
    server: &CliServer,
    require: Option<&VersionRange>,
    command: Command,
) -> Result<Value> {
    if let Some(range) = require
        && command.needs_engine()
    {
        server
            .require_version(range)
            .await
            .context("engine version check failed")?;
    }

    let value = match command {
        Command::Version => {
            let version = server.get_version().await?;
            json!({ "version": version })
        }
        Command::Ram { total_mb } => serde_json::to_value(server.resolve_ram(total_mb)?)?,
        Command::Qlpacks { folders } => {
            let folders = absolutize_all(&folders)?;
            serde_json::to_value(server.resolve_qlpacks(&folders).await?)?
        }
        Command::Languages => serde_json::to_value(server.resolve_languages().await?)?,
        Command::Query { file, folders } => {
            let folders = absolutize_all(&folders)?;
            let file = absolutize(&file)?;
            serde_json::to_value(server.resolve_query_by_language(&folders, &file).await?)?
        }
    };
    Ok(value)
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("invalid path: {}", path.display()))
}

fn absolutize_all(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    paths.iter().map(|path| absolutize(path)).collect()
}
