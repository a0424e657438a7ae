//! Shared test utilities and fixtures
//!
//! A fake engine that answers the four metadata commands the way a real
//! installation with the standard packs would.

#![allow(dead_code)]

use std::path::Path;

use serde_json::{Map, Value, json};

use qlserve_server::fake::{FakeEngine, FakeReply};
use qlserve_server::{CliServer, ServerConfig};

pub const ENGINE_VERSION: &str = "2.15.3";

pub const PACK_LANGUAGES: [&str; 5] = ["cpp", "csharp", "java", "javascript", "python"];

pub const EXTRACTOR_LANGUAGES: [&str; 7] =
    ["cpp", "csharp", "go", "java", "javascript", "python", "ruby"];

/// Engine answering like a standard installation rooted at `/dist`.
pub fn standard_engine() -> FakeEngine {
    FakeEngine::new(standard_reply)
}

pub fn standard_reply(words: &[String]) -> FakeReply {
    let command: Vec<&str> = words.iter().take(2).map(String::as_str).collect();
    match command.as_slice() {
        ["version", ..] => FakeReply::Json(json!({
            "productName": "CodeQL",
            "version": ENGINE_VERSION,
        })),
        ["resolve", "qlpacks"] => FakeReply::Json(qlpacks(words)),
        ["resolve", "languages"] => FakeReply::Json(languages()),
        ["resolve", "queries"] => FakeReply::Json(queries_by_language(words)),
        _ => FakeReply::Text(format!("unknown command {words:?}")),
    }
}

fn qlpacks(words: &[String]) -> Value {
    let mut packs = Map::new();
    for lang in PACK_LANGUAGES {
        packs.insert(
            format!("codeql-{lang}"),
            json!([format!("/dist/qlpacks/codeql/{lang}-queries")]),
        );
    }
    if let Some(folders) = additional_packs(words) {
        for folder in std::env::split_paths(folders) {
            if let Some(name) = folder.file_name() {
                packs.insert(
                    format!("local-{}", name.to_string_lossy()),
                    json!([folder.to_string_lossy()]),
                );
            }
        }
    }
    Value::Object(packs)
}

fn languages() -> Value {
    let mut languages = Map::new();
    for lang in EXTRACTOR_LANGUAGES {
        languages.insert(lang.to_string(), json!([format!("/dist/{lang}")]));
    }
    Value::Object(languages)
}

/// The target language is the name of the directory holding the query.
fn queries_by_language(words: &[String]) -> Value {
    let Some(query) = words.last() else {
        return json!({ "byLanguage": {} });
    };
    let language = Path::new(query)
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut queries = Map::new();
    queries.insert(query.clone(), json!({}));
    let mut by_language = Map::new();
    by_language.insert(language, Value::Object(queries));
    json!({
        "byLanguage": by_language,
        "byFolder": {},
        "noDeclaredLanguage": {},
        "multipleDeclaredLanguages": {}
    })
}

fn additional_packs(words: &[String]) -> Option<&str> {
    let index = words.iter().position(|w| w == "--additional-packs")?;
    words.get(index + 1).map(String::as_str)
}

pub fn server(engine: &FakeEngine) -> CliServer {
    CliServer::with_launcher(ServerConfig::default(), Box::new(engine.clone()))
}
