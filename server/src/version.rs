//! Engine version lookup and compatibility checks.

use std::sync::Arc;

use tokio::sync::OnceCell;

use qlserve_types::{EngineError, EngineOutput, EngineVersion, VersionRange};

use crate::channel::ProcessChannel;

const VERSION_COMMAND: [&str; 1] = ["version"];

/// Reads the engine version once and answers compatibility questions.
///
/// A failed read is not cached; the next call tries again.
pub struct VersionGate {
    channel: Arc<ProcessChannel>,
    cached: OnceCell<EngineVersion>,
}

impl VersionGate {
    pub fn new(channel: Arc<ProcessChannel>) -> Self {
        Self {
            channel,
            cached: OnceCell::new(),
        }
    }

    /// The engine's self-reported version, starting the engine if needed.
    ///
    /// Any failure to obtain a version, including a crash, is reported as
    /// `EngineUnavailable`. Undecodable output stays `MalformedOutput`.
    pub async fn get_version(&self) -> Result<EngineVersion, EngineError> {
        self.cached
            .get_or_try_init(|| self.read_version())
            .await
            .cloned()
    }

    /// Whether the engine version lies in `required`. Never blocks a call.
    pub async fn check_compatible(&self, required: &VersionRange) -> Result<bool, EngineError> {
        Ok(self.get_version().await?.satisfies(required))
    }

    /// Like [`check_compatible`](Self::check_compatible), but fails with
    /// `IncompatibleVersion` on a mismatch.
    pub async fn require(&self, required: &VersionRange) -> Result<EngineVersion, EngineError> {
        let found = self.get_version().await?;
        if found.satisfies(required) {
            Ok(found)
        } else {
            Err(EngineError::IncompatibleVersion {
                found,
                required: required.clone(),
            })
        }
    }

    /// The memoized version, if it has been read.
    #[must_use]
    pub fn cached(&self) -> Option<&EngineVersion> {
        self.cached.get()
    }

    async fn read_version(&self) -> Result<EngineVersion, EngineError> {
        let args = vec!["--format=json".to_string()];
        let command = VERSION_COMMAND.join(" ");
        let value = self
            .channel
            .invoke(&VERSION_COMMAND, &args)
            .await
            .map_err(|e| match e {
                EngineError::EngineCrashed { reason, stderr, .. } => {
                    EngineError::EngineUnavailable {
                        executable: self.channel.executable().to_string(),
                        reason: if stderr.trim().is_empty() {
                            format!("version query failed: {reason}")
                        } else {
                            format!("version query failed: {reason}; stderr: {}", stderr.trim())
                        },
                    }
                }
                other => other,
            })?;
        let version = EngineVersion::decode(&command, value)?;
        tracing::info!(%version, "Engine version");
        Ok(version)
    }
}
