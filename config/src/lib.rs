//! Configuration file loading for qlserve.
//!
//! Reads `~/.qlserve/config.toml` (or the file named by `QLSERVE_CONFIG`).
//! A missing file means defaults. `${VAR}` references in the executable and
//! extra arguments are expanded from the environment.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

use qlserve_server::ServerConfig;
use qlserve_types::{EngineError, RamPolicy};

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "QLSERVE_CONFIG";

/// Overrides `engine.executable`.
pub const ENGINE_ENV: &str = "QLSERVE_ENGINE";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QlserveConfig {
    pub engine: Option<EngineConfig>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Executable name (looked up in `PATH`) or absolute path.
    pub executable: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Total memory budget; adds heap flags to the launch arguments.
    pub memory_mb: Option<i64>,
    pub managed_heap_percent: Option<u8>,
    pub command_timeout_secs: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

impl QlserveConfig {
    /// Load from the default location. Missing file → `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    /// Load from `path`. Missing file → `Ok(None)`.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}", path.display());
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Build a server configuration, with `QLSERVE_ENGINE` taking precedence
    /// over the file's executable.
    pub fn to_server_config(&self) -> Result<ServerConfig, EngineError> {
        let engine = self.engine.clone().unwrap_or_default();
        engine.to_server_config(env::var(ENGINE_ENV).ok())
    }
}

impl EngineConfig {
    /// Build a server configuration. `executable_override` wins over the
    /// file's `executable` when set and non-empty.
    pub fn to_server_config(
        &self,
        executable_override: Option<String>,
    ) -> Result<ServerConfig, EngineError> {
        let executable = pick_executable(executable_override, self.executable.as_deref());
        let mut config = ServerConfig::new(executable).with_extra_args(
            self.extra_args
                .iter()
                .map(String::as_str)
                .map(expand_env_vars)
                .collect(),
        );

        if let Some(percent) = self.managed_heap_percent {
            config = config.with_ram_policy(RamPolicy::new(percent)?)?;
        }
        if let Some(total_mb) = self.memory_mb {
            config = config.with_memory_budget(total_mb)?;
        }
        if let Some(secs) = self.command_timeout_secs {
            config = config.with_command_timeout(Duration::from_secs(secs))?;
        }
        Ok(config)
    }
}

fn pick_executable(env_value: Option<String>, file_value: Option<&str>) -> String {
    env_value
        .filter(|value| !value.trim().is_empty())
        .or_else(|| file_value.map(expand_env_vars))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| qlserve_server::DEFAULT_EXECUTABLE.to_string())
}

/// Default config location, honoring `QLSERVE_CONFIG`.
pub fn config_path() -> Option<PathBuf> {
    resolve_config_path(env::var_os(CONFIG_PATH_ENV), dirs::home_dir())
}

fn resolve_config_path(env_value: Option<OsString>, home: Option<PathBuf>) -> Option<PathBuf> {
    match env_value {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => home.map(|home| home.join(".qlserve").join("config.toml")),
    }
}
