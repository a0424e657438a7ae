//! Engine version and required-version ranges.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::EngineError;

#[derive(Debug, Clone, Error)]
#[error("invalid version `{input}`: {reason}")]
pub struct VersionParseError {
    input: String,
    reason: String,
}

/// Semantic version reported by the engine.
///
/// Read once per server and never mutated. Ordering is standard semver
/// ordering, so `2.4.0-rc.1 < 2.4.0`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EngineVersion(semver::Version);

impl EngineVersion {
    /// Parse a version as printed by the engine.
    ///
    /// Surrounding whitespace and a leading `v` are tolerated.
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let trimmed = input.trim();
        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
        semver::Version::parse(bare)
            .map(Self)
            .map_err(|e| VersionParseError {
                input: input.to_string(),
                reason: e.to_string(),
            })
    }

    #[must_use]
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    #[must_use]
    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }

    #[must_use]
    pub fn satisfies(&self, range: &VersionRange) -> bool {
        range.0.matches(&self.0)
    }

    /// Decode the payload of `version --format=json`.
    ///
    /// The engine answers with an object carrying a `version` field; a bare
    /// JSON string is accepted as well.
    pub fn from_engine_output(command: &str, value: &Value) -> Result<Self, EngineError> {
        let raw = match value {
            Value::String(s) => s.as_str(),
            Value::Object(map) => match map.get("version") {
                Some(Value::String(s)) => s.as_str(),
                Some(_) => {
                    return Err(EngineError::malformed(
                        command,
                        "`version` field is not a string",
                        value.to_string(),
                    ));
                }
                None => {
                    return Err(EngineError::malformed(
                        command,
                        "missing `version` field",
                        value.to_string(),
                    ));
                }
            },
            _ => {
                return Err(EngineError::malformed(
                    command,
                    "expected an object or a string",
                    value.to_string(),
                ));
            }
        };
        Self::parse(raw)
            .map_err(|e| EngineError::malformed(command, e.to_string(), value.to_string()))
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for EngineVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EngineVersion {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EngineVersion> for String {
    fn from(value: EngineVersion) -> Self {
        value.to_string()
    }
}

/// A required-version range such as `>=2.4.0, <3`.
///
/// Pre-release engines only match comparators that name a pre-release on the
/// same `major.minor.patch`, following cargo's semver rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange(semver::VersionReq);

impl VersionRange {
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        semver::VersionReq::parse(input.trim())
            .map(Self)
            .map_err(|e| VersionParseError {
                input: input.to_string(),
                reason: e.to_string(),
            })
    }

    /// A range that accepts every release version.
    #[must_use]
    pub fn any() -> Self {
        Self(semver::VersionReq::STAR)
    }

    #[must_use]
    pub fn matches(&self, version: &EngineVersion) -> bool {
        version.satisfies(self)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for VersionRange {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
