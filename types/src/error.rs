//! Error taxonomy shared by every qlserve layer.
//!
//! Nothing in the core retries. Each variant carries enough context (the
//! offending command, raw output, engine stderr) for the caller to diagnose
//! an installation problem or a version skew without re-running anything.

use thiserror::Error;

use crate::version::{EngineVersion, VersionRange};

/// Maximum number of characters of raw engine output kept in a rendered error.
pub const MAX_DISPLAY_CHARS: usize = 2000;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Bad caller input. Rejected before the engine process is touched.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// The executable is missing, failed to spawn, or the channel was closed.
    #[error("engine `{executable}` is unavailable: {reason}")]
    EngineUnavailable { executable: String, reason: String },

    /// The process died or timed out while a command was in flight.
    #[error("engine crashed while running `{command}`: {reason}{}", stderr_suffix(.stderr))]
    EngineCrashed {
        command: String,
        reason: String,
        stderr: String,
    },

    /// A response was read but did not decode into the expected shape.
    #[error(
        "malformed output from `{command}`: {reason}\nraw output: {}",
        truncate_for_display(.raw, MAX_DISPLAY_CHARS)
    )]
    MalformedOutput {
        command: String,
        reason: String,
        raw: String,
    },

    /// Only produced when a caller asks the version gate to block.
    #[error("engine version {found} does not satisfy required range {required}")]
    IncompatibleVersion {
        found: EngineVersion,
        required: VersionRange,
    },
}

impl EngineError {
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    pub fn malformed(command: &str, reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::MalformedOutput {
            command: command.to_string(),
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// The engine command this error relates to, when there is one.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::EngineCrashed { command, .. } | Self::MalformedOutput { command, .. } => {
                Some(command)
            }
            Self::InvalidConfiguration { .. }
            | Self::EngineUnavailable { .. }
            | Self::IncompatibleVersion { .. } => None,
        }
    }

    /// Whether repeating the same call could succeed.
    ///
    /// Only a crash qualifies: the channel has already reset itself and the
    /// next call gets a fresh process. Everything else is deterministic.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EngineCrashed { .. })
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(
            "\nengine stderr:\n{}",
            truncate_for_display(trimmed, MAX_DISPLAY_CHARS)
        )
    }
}

/// Truncate to at most `max_chars` characters, marking the cut with `...`.
#[must_use]
pub fn truncate_for_display(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
