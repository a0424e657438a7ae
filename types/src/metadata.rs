//! Typed results of the engine's metadata queries.
//!
//! Every decoder checks the payload's shape explicitly and reports a
//! [`EngineError::MalformedOutput`] carrying the raw JSON instead of trusting
//! whatever the engine sent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::version::EngineVersion;

/// A value that can be decoded from one engine response.
pub trait EngineOutput: Sized {
    /// `command` is the rendered engine command, used for error context only.
    fn decode(command: &str, value: Value) -> Result<Self, EngineError>;
}

impl EngineOutput for EngineVersion {
    fn decode(command: &str, value: Value) -> Result<Self, EngineError> {
        Self::from_engine_output(command, &value)
    }
}

fn require_object(command: &str, value: &Value, what: &str) -> Result<(), EngineError> {
    if value.is_object() {
        Ok(())
    } else {
        Err(EngineError::malformed(
            command,
            format!("expected {what} to be a JSON object, got {}", json_kind(value)),
            value.to_string(),
        ))
    }
}

fn from_value<T: DeserializeOwned>(command: &str, value: Value) -> Result<T, EngineError> {
    let raw = value.to_string();
    serde_json::from_value(value).map_err(|e| EngineError::malformed(command, e.to_string(), raw))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Packs
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum PackLocations {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl From<PackLocations> for Vec<PathBuf> {
    fn from(value: PackLocations) -> Self {
        match value {
            PackLocations::One(path) => vec![path],
            PackLocations::Many(paths) => paths,
        }
    }
}

/// Pack name to the on-disk location(s) the engine resolved it to.
///
/// Produced fresh on every resolution; packs can change between calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct QlpackMap(BTreeMap<String, Vec<PathBuf>>);

impl QlpackMap {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[PathBuf]> {
        self.0.get(name).map(Vec::as_slice)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[PathBuf])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Vec<PathBuf>> {
        self.0
    }
}

impl EngineOutput for QlpackMap {
    fn decode(command: &str, value: Value) -> Result<Self, EngineError> {
        require_object(command, &value, "the pack listing")?;
        let packs: BTreeMap<String, PackLocations> = from_value(command, value)?;
        Ok(Self(
            packs
                .into_iter()
                .map(|(name, locations)| (name, locations.into()))
                .collect(),
        ))
    }
}

// ============================================================================
// Languages
// ============================================================================

/// Engine-internal metadata about one supported language.
///
/// The engine usually reports a list of extractor directories; any object
/// payload is kept as-is in [`LanguageInfo::raw`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LanguageInfo {
    raw: Value,
}

impl LanguageInfo {
    fn from_engine(command: &str, language: &str, raw: Value) -> Result<Self, EngineError> {
        let valid = match &raw {
            Value::Array(items) => items.iter().all(Value::is_string),
            Value::Object(_) => true,
            _ => false,
        };
        if !valid {
            return Err(EngineError::malformed(
                command,
                format!(
                    "language `{language}`: expected a list of extractor paths or an object, got {}",
                    json_kind(&raw)
                ),
                raw.to_string(),
            ));
        }
        Ok(Self { raw })
    }

    /// Extractor directories, when the engine reported them as a list.
    #[must_use]
    pub fn extractor_paths(&self) -> Vec<PathBuf> {
        match &self.raw {
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// Language id (e.g. `javascript`) to the engine's metadata for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LanguageMap(BTreeMap<String, LanguageInfo>);

impl LanguageMap {
    #[must_use]
    pub fn get(&self, language: &str) -> Option<&LanguageInfo> {
        self.0.get(language)
    }

    #[must_use]
    pub fn contains(&self, language: &str) -> bool {
        self.0.contains_key(language)
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl EngineOutput for LanguageMap {
    fn decode(command: &str, value: Value) -> Result<Self, EngineError> {
        let Value::Object(map) = value else {
            return Err(EngineError::malformed(
                command,
                format!(
                    "expected the language listing to be a JSON object, got {}",
                    json_kind(&value)
                ),
                value.to_string(),
            ));
        };
        let mut languages = BTreeMap::new();
        for (language, raw) in map {
            let info = LanguageInfo::from_engine(command, &language, raw)?;
            languages.insert(language, info);
        }
        Ok(Self(languages))
    }
}

// ============================================================================
// Queries by language
// ============================================================================

/// Per-query metadata the engine attaches to each resolved query file.
pub type QueryMetadata = BTreeMap<PathBuf, Value>;

/// Which language(s) a set of queries targets.
///
/// Keys of `by_language` are whatever the engine determined; a query written
/// against one language's libraries normally yields exactly one, but no
/// cardinality is enforced here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInfoByLanguage {
    pub by_language: BTreeMap<String, QueryMetadata>,
    #[serde(default)]
    pub by_folder: BTreeMap<PathBuf, Vec<String>>,
    #[serde(default)]
    pub no_declared_language: QueryMetadata,
    #[serde(default)]
    pub multiple_declared_languages: QueryMetadata,
}

impl QueryInfoByLanguage {
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.by_language.keys().map(String::as_str)
    }

    /// Queries resolved for `language`, if any.
    pub fn queries_for(&self, language: &str) -> impl Iterator<Item = &Path> {
        self.by_language
            .get(language)
            .into_iter()
            .flat_map(|queries| queries.keys().map(PathBuf::as_path))
    }
}

impl EngineOutput for QueryInfoByLanguage {
    fn decode(command: &str, value: Value) -> Result<Self, EngineError> {
        require_object(command, &value, "the query resolution")?;
        from_value(command, value)
    }
}
