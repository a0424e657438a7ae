//! Typed metadata queries over the process channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use qlserve_types::{EngineError, EngineOutput, LanguageMap, QlpackMap, QueryInfoByLanguage};

use crate::channel::ProcessChannel;

const RESOLVE_QLPACKS: [&str; 2] = ["resolve", "qlpacks"];
const RESOLVE_LANGUAGES: [&str; 2] = ["resolve", "languages"];
const RESOLVE_QUERIES: [&str; 2] = ["resolve", "queries"];

/// Resolves packs, languages and query targets by asking the engine.
///
/// Nothing is cached and nothing is retried: every call reflects what is on
/// disk right now, and channel errors reach the caller unchanged.
pub struct MetadataResolver {
    channel: Arc<ProcessChannel>,
}

impl MetadataResolver {
    pub fn new(channel: Arc<ProcessChannel>) -> Self {
        Self { channel }
    }

    /// Packs visible from the engine's own search path plus `folders`.
    pub async fn resolve_qlpacks(&self, folders: &[PathBuf]) -> Result<QlpackMap, EngineError> {
        let mut args = vec!["--format=json".to_string()];
        args.extend(additional_packs_args(folders)?);
        self.run(&RESOLVE_QLPACKS, &args).await
    }

    /// Languages the engine has extractors for.
    pub async fn resolve_languages(&self) -> Result<LanguageMap, EngineError> {
        self.run(&RESOLVE_LANGUAGES, &["--format=json".to_string()])
            .await
    }

    /// Languages `query_file` targets, as determined by the engine.
    ///
    /// The result is not checked for cardinality.
    pub async fn resolve_query_by_language(
        &self,
        folders: &[PathBuf],
        query_file: &Path,
    ) -> Result<QueryInfoByLanguage, EngineError> {
        let query_file = path_arg(query_file, "query file")?;
        let mut args = vec!["--format=bylanguage".to_string()];
        args.extend(additional_packs_args(folders)?);
        args.push("--".to_string());
        args.push(query_file);
        self.run(&RESOLVE_QUERIES, &args).await
    }

    async fn run<T: EngineOutput>(
        &self,
        command: &[&str],
        args: &[String],
    ) -> Result<T, EngineError> {
        let value = self.channel.invoke(command, args).await?;
        T::decode(&command.join(" "), value)
    }
}

/// `--additional-packs <joined>` for a non-empty folder set.
fn additional_packs_args(folders: &[PathBuf]) -> Result<Vec<String>, EngineError> {
    if folders.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(relative) = folders.iter().find(|folder| !folder.is_absolute()) {
        return Err(EngineError::invalid_configuration(format!(
            "workspace folder must be an absolute path: {}",
            relative.display()
        )));
    }
    let joined = std::env::join_paths(folders).map_err(|e| {
        EngineError::invalid_configuration(format!("cannot pass workspace folders: {e}"))
    })?;
    let joined = joined.into_string().map_err(|raw| {
        EngineError::invalid_configuration(format!(
            "workspace folders are not valid UTF-8: {}",
            raw.to_string_lossy()
        ))
    })?;
    Ok(vec!["--additional-packs".to_string(), joined])
}

fn path_arg(path: &Path, what: &str) -> Result<String, EngineError> {
    if !path.is_absolute() {
        return Err(EngineError::invalid_configuration(format!(
            "{what} must be an absolute path: {}",
            path.display()
        )));
    }
    path.to_str().map(str::to_string).ok_or_else(|| {
        EngineError::invalid_configuration(format!(
            "{what} is not valid UTF-8: {}",
            path.display()
        ))
    })
}
