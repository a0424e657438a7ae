//! Drives the analysis engine's command server.
//!
//! One [`CliServer`] owns at most one engine process at a time and talks to it
//! through a serialized [`ProcessChannel`]. Everything above the channel is
//! request/response; nothing runs in the background except draining the
//! engine's stderr.

pub mod codec;

mod channel;
mod config;
mod launcher;
mod metadata;
mod server;
mod stderr;
mod version;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use channel::{ChannelStatus, ProcessChannel, SHUTDOWN_TIMEOUT};
pub use config::{CLI_SERVER_ARGS, DEFAULT_COMMAND_TIMEOUT, DEFAULT_EXECUTABLE, ServerConfig};
pub use launcher::{EngineConnection, EngineLauncher, ProcessLauncher};
pub use metadata::MetadataResolver;
pub use server::CliServer;
pub use version::VersionGate;

pub use qlserve_types::{
    EngineError, EngineVersion, HeapFlags, LanguageInfo, LanguageMap, QlpackMap,
    QueryInfoByLanguage, RamPolicy, VersionRange,
};
