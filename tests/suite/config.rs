//! Config file → server wiring.

use std::time::Duration;

use qlserve_config::{ConfigError, QlserveConfig};
use qlserve_server::{CliServer, EngineError};

use crate::common;

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

#[tokio::test]
async fn configured_policy_drives_resolve_ram() {
    let (_dir, path) = write_config(
        r#"
[engine]
executable = "/opt/codeql/codeql"
managed_heap_percent = 25
command_timeout_secs = 60
"#,
    );
    let config = QlserveConfig::load_from(&path)
        .unwrap()
        .unwrap()
        .engine
        .unwrap()
        .to_server_config(None)
        .unwrap();
    assert_eq!(config.command_timeout(), Duration::from_secs(60));

    let engine = common::standard_engine();
    let server = CliServer::with_launcher(config, Box::new(engine.clone()));
    let flags = server.resolve_ram(8000).unwrap();
    assert_eq!(flags.into_args(), ["-J-Xmx2000M", "--off-heap-ram=6000"]);
    assert_eq!(engine.launches(), 0);
}

#[test]
fn memory_budget_becomes_launch_flags() {
    let (_dir, path) = write_config("[engine]\nmemory_mb = 8192\n");
    let config = QlserveConfig::load_from(&path)
        .unwrap()
        .unwrap()
        .engine
        .unwrap()
        .to_server_config(Some("codeql".to_string()))
        .unwrap();
    assert_eq!(
        config.launch_args(),
        [
            "execute",
            "cli-server",
            "-J-Xmx4096M",
            "--off-heap-ram=4096"
        ]
    );
}

#[test]
fn bad_budget_is_invalid_configuration() {
    let (_dir, path) = write_config("[engine]\nmemory_mb = -1\n");
    let engine = QlserveConfig::load_from(&path)
        .unwrap()
        .unwrap()
        .engine
        .unwrap();
    assert!(matches!(
        engine.to_server_config(None),
        Err(EngineError::InvalidConfiguration { .. })
    ));
}

#[test]
fn malformed_file_reports_path() {
    let (_dir, path) = write_config("[engine]\nmemory_mb = \"lots\"\n");
    match QlserveConfig::load_from(&path) {
        Err(err @ ConfigError::Parse { .. }) => assert_eq!(err.path(), &path),
        other => panic!("expected parse error, got {other:?}"),
    }
}
