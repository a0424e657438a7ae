//! Core domain types for qlserve.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies:
//! the engine version, the memory split policy, typed metadata results and the
//! shared error taxonomy. Everything here can be used from any layer.

#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod error;
mod metadata;
mod ram;
mod version;

pub use error::{EngineError, MAX_DISPLAY_CHARS, truncate_for_display};
pub use metadata::{
    EngineOutput, LanguageInfo, LanguageMap, QlpackMap, QueryInfoByLanguage, QueryMetadata,
};
pub use ram::{
    HeapFlags, MANAGED_HEAP_FLAG, MemoryBudget, OFF_HEAP_FLAG, RamPolicy, resolve_ram,
};
pub use version::{EngineVersion, VersionParseError, VersionRange};
