//! End-to-end behavior of the CliServer façade over the fake engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use qlserve_server::fake::{FakeEngine, FakeReply};
use qlserve_server::{ChannelStatus, CliServer, EngineError, ServerConfig, VersionRange};
use qlserve_types::EngineVersion;

use crate::common::{self, ENGINE_VERSION, PACK_LANGUAGES};

fn workspace(name: &str) -> PathBuf {
    std::env::temp_dir().join("qlserve-ws").join(name)
}

#[tokio::test]
async fn version_is_read_once() {
    let engine = common::standard_engine();
    let server = common::server(&engine);

    let first = server.get_version().await.unwrap();
    let second = server.get_version().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, EngineVersion::parse(ENGINE_VERSION).unwrap());
    assert_eq!(engine.requests().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_version_reads_issue_one_command() {
    let engine = common::standard_engine();
    let server = Arc::new(common::server(&engine));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.get_version().await.unwrap() })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().to_string(), ENGINE_VERSION);
    }
    assert_eq!(engine.requests().len(), 1);
}

#[tokio::test]
async fn version_compatibility() {
    let engine = common::standard_engine();
    let server = common::server(&engine);

    assert!(
        server
            .check_compatible(&VersionRange::parse(">=2.12.0").unwrap())
            .await
            .unwrap()
    );
    assert!(
        !server
            .check_compatible(&VersionRange::parse("^3").unwrap())
            .await
            .unwrap()
    );
    assert!(matches!(
        server
            .require_version(&VersionRange::parse("^3").unwrap())
            .await,
        Err(EngineError::IncompatibleVersion { .. })
    ));
}

#[test]
fn resolve_ram_regression() {
    let engine = common::standard_engine();
    let server = common::server(&engine);
    let flags = server.resolve_ram(8192).unwrap();
    assert_eq!(flags.into_args(), ["-J-Xmx4096M", "--off-heap-ram=4096"]);

    for bad in [0, -1, -8192] {
        assert!(matches!(
            server.resolve_ram(bad),
            Err(EngineError::InvalidConfiguration { .. })
        ));
    }
}

#[test]
fn resolve_ram_flags_fit_budget() {
    let server = common::server(&common::standard_engine());
    for total in (2..20_000).step_by(37) {
        let flags = server.resolve_ram(total).unwrap();
        let args = flags.as_args();
        assert!(args[0].starts_with("-J-Xmx") && args[0].ends_with('M'));
        assert!(args[1].starts_with("--off-heap-ram="));
        let sum = i64::from(flags.managed_mb()) + i64::from(flags.off_heap_mb());
        assert!(sum <= total, "{total}: {flags}");
        assert!(flags.managed_mb() > 0 && flags.off_heap_mb() > 0);
    }
}

#[tokio::test]
async fn qlpacks_cover_standard_languages() {
    let engine = common::standard_engine();
    let server = common::server(&engine);
    let folders = vec![workspace("vscode-codeql-starter"), workspace("custom")];

    let packs = server.resolve_qlpacks(&folders).await.unwrap();
    for lang in PACK_LANGUAGES {
        assert!(packs.contains(&format!("codeql-{lang}")), "missing {lang}");
    }
    assert!(packs.contains("local-custom"));
    assert_eq!(
        packs.get("local-custom"),
        Some(&[workspace("custom")][..])
    );
}

#[tokio::test]
async fn qlpacks_are_not_cached() {
    let engine = common::standard_engine();
    let server = common::server(&engine);
    server.resolve_qlpacks(&[]).await.unwrap();
    let with_folder = server
        .resolve_qlpacks(&[workspace("late")])
        .await
        .unwrap();
    assert!(with_folder.contains("local-late"));
    assert_eq!(engine.requests().len(), 2);
}

#[tokio::test]
async fn languages_include_standard_set() {
    let engine = common::standard_engine();
    let languages = common::server(&engine)
        .resolve_languages()
        .await
        .unwrap();
    for lang in ["cpp", "csharp", "go", "java", "javascript", "python"] {
        assert!(languages.contains(lang), "missing {lang}");
    }
    assert_eq!(
        languages.get("go").unwrap().extractor_paths(),
        [PathBuf::from("/dist/go")]
    );
}

#[tokio::test]
async fn javascript_query_targets_exactly_javascript() {
    let engine = common::standard_engine();
    let server = common::server(&engine);
    let query = workspace("queries").join("javascript").join("example.ql");

    let info = server
        .resolve_query_by_language(&[workspace("queries")], &query)
        .await
        .unwrap();
    assert_eq!(info.languages().collect::<Vec<_>>(), ["javascript"]);
}

#[tokio::test]
async fn killed_mid_invocation_then_recovers() {
    let engine = FakeEngine::scripted(vec![
        FakeReply::Json(json!({ "version": ENGINE_VERSION })),
        FakeReply::Crash {
            stderr: "Killed\n".to_string(),
        },
    ])
    .then(common::standard_reply);
    let server = common::server(&engine);
    server.get_version().await.unwrap();

    let err = server.resolve_languages().await.unwrap_err();
    assert!(matches!(err, EngineError::EngineCrashed { .. }), "{err}");
    assert!(err.is_retryable());
    assert!(err.to_string().contains("Killed"));

    let languages = server.resolve_languages().await.unwrap();
    assert!(languages.contains("javascript"));
    assert_eq!(engine.launches(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_never_see_each_others_responses() {
    let engine = common::standard_engine();
    let server = Arc::new(common::server(&engine));

    let mut handles = Vec::new();
    for i in 0..24 {
        let server = Arc::clone(&server);
        handles.push(tokio::spawn(async move {
            match i % 3 {
                0 => {
                    let languages = server.resolve_languages().await.unwrap();
                    assert!(languages.contains("go"));
                }
                1 => {
                    let folder = workspace(&format!("ws{i}"));
                    let packs = server.resolve_qlpacks(&[folder]).await.unwrap();
                    assert!(packs.contains(&format!("local-ws{i}")));
                    assert_eq!(packs.len(), PACK_LANGUAGES.len() + 1);
                }
                _ => {
                    let lang = if i % 2 == 0 { "python" } else { "java" };
                    let query = workspace("q").join(lang).join(format!("q{i}.ql"));
                    let info = server
                        .resolve_query_by_language(&[], &query)
                        .await
                        .unwrap();
                    assert_eq!(info.languages().collect::<Vec<_>>(), [lang]);
                    assert_eq!(
                        info.queries_for(lang).collect::<Vec<_>>(),
                        [query.as_path()]
                    );
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(engine.launches(), 1);
    assert_eq!(engine.requests().len(), 24);
}

#[tokio::test]
async fn timeout_restarts_engine() {
    let engine = FakeEngine::scripted(vec![FakeReply::Hang]).then(common::standard_reply);
    let config = ServerConfig::default()
        .with_command_timeout(Duration::from_millis(100))
        .unwrap();
    let server = CliServer::with_launcher(config, Box::new(engine.clone()));

    let err = server.resolve_languages().await.unwrap_err();
    assert!(matches!(err, EngineError::EngineCrashed { .. }));
    assert!(matches!(
        server.status().await,
        ChannelStatus::Crashed { .. }
    ));

    server.resolve_languages().await.unwrap();
    assert_eq!(engine.launches(), 2);
}

#[tokio::test]
async fn malformed_output_carries_raw_text() {
    let engine = FakeEngine::new(|_| FakeReply::Text("Picked up JAVA_TOOL_OPTIONS".to_string()));
    let err = common::server(&engine)
        .resolve_languages()
        .await
        .unwrap_err();
    match &err {
        EngineError::MalformedOutput { raw, .. } => {
            assert_eq!(raw, "Picked up JAVA_TOOL_OPTIONS");
        }
        other => panic!("expected MalformedOutput, got {other:?}"),
    }
    assert!(err.to_string().contains("Picked up JAVA_TOOL_OPTIONS"));
}

#[tokio::test]
async fn close_is_idempotent_and_final() {
    let engine = common::standard_engine();
    let server = common::server(&engine);
    server.resolve_languages().await.unwrap();

    server.close().await;
    server.close().await;
    assert_eq!(engine.shutdowns(), 1);

    let err = server.resolve_languages().await.unwrap_err();
    assert!(matches!(err, EngineError::EngineUnavailable { .. }));
    // Pure operations keep working.
    server.resolve_ram(4096).unwrap();
}
