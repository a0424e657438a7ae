//! The public API callers use.
//!
//! Composes the process channel, version gate, metadata resolver and RAM
//! policy. Constructing a server does not start the engine; the first
//! operation that needs it does.
//!
//! Release is guaranteed on every exit path: the process is spawned with
//! `kill_on_drop` and its guard kills the whole process group, so dropping a
//! server (or failing halfway through building one) never leaks an engine.
//! [`CliServer::close`] is the graceful path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use qlserve_types::{
    EngineError, EngineVersion, HeapFlags, LanguageMap, QlpackMap, QueryInfoByLanguage,
    VersionRange,
};

use crate::channel::{ChannelStatus, ProcessChannel};
use crate::config::ServerConfig;
use crate::launcher::{EngineLauncher, ProcessLauncher};
use crate::metadata::MetadataResolver;
use crate::version::VersionGate;

pub struct CliServer {
    config: ServerConfig,
    channel: Arc<ProcessChannel>,
    version: VersionGate,
    metadata: MetadataResolver,
}

impl CliServer {
    /// Server for the real engine described by `config`.
    pub fn new(config: ServerConfig) -> Self {
        let launcher = ProcessLauncher::from_config(&config);
        Self::with_launcher(config, Box::new(launcher))
    }

    /// Server whose engine processes come from `launcher`.
    ///
    /// Only the command timeout and RAM policy of `config` apply; launch
    /// arguments are up to the launcher.
    pub fn with_launcher(config: ServerConfig, launcher: Box<dyn EngineLauncher>) -> Self {
        let channel = Arc::new(ProcessChannel::new(launcher, config.command_timeout()));
        Self {
            version: VersionGate::new(Arc::clone(&channel)),
            metadata: MetadataResolver::new(Arc::clone(&channel)),
            channel,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn get_version(&self) -> Result<EngineVersion, EngineError> {
        self.version.get_version().await
    }

    pub async fn check_compatible(&self, required: &VersionRange) -> Result<bool, EngineError> {
        self.version.check_compatible(required).await
    }

    /// Fails with `IncompatibleVersion` when the engine is outside `required`.
    pub async fn require_version(
        &self,
        required: &VersionRange,
    ) -> Result<EngineVersion, EngineError> {
        self.version.require(required).await
    }

    /// Heap flags for `total_mb` under this server's RAM policy.
    ///
    /// Pure; never touches the engine.
    pub fn resolve_ram(&self, total_mb: i64) -> Result<HeapFlags, EngineError> {
        self.config.ram_policy().resolve(total_mb)
    }

    pub async fn resolve_qlpacks(&self, folders: &[PathBuf]) -> Result<QlpackMap, EngineError> {
        self.metadata.resolve_qlpacks(folders).await
    }

    pub async fn resolve_languages(&self) -> Result<LanguageMap, EngineError> {
        self.metadata.resolve_languages().await
    }

    pub async fn resolve_query_by_language(
        &self,
        folders: &[PathBuf],
        query_file: &Path,
    ) -> Result<QueryInfoByLanguage, EngineError> {
        self.metadata
            .resolve_query_by_language(folders, query_file)
            .await
    }

    pub async fn status(&self) -> ChannelStatus {
        self.channel.status().await
    }

    /// Stop the current engine; the next operation starts a fresh one.
    ///
    /// The memoized version is kept.
    pub async fn restart(&self) {
        self.channel.restart().await;
    }

    /// Shut the engine down. Idempotent; later operations that need the
    /// engine fail with `EngineUnavailable`.
    pub async fn close(&self) {
        self.channel.close().await;
    }
}
