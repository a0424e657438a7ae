//! Behavior against real child processes.

use std::time::Duration;

use qlserve_server::{ChannelStatus, CliServer, EngineError, ProcessLauncher, ServerConfig};

/// `cat` rejects the command-server arguments and exits at once.
#[tokio::test]
async fn engine_that_exits_reports_crash_with_stderr() {
    let server = CliServer::new(ServerConfig::new("cat"));

    let err = server.resolve_languages().await.unwrap_err();
    match &err {
        EngineError::EngineCrashed { command, stderr, .. } => {
            assert!(command.starts_with("resolve languages"));
            assert!(stderr.contains("execute"), "stderr: {stderr:?}");
        }
        other => panic!("expected EngineCrashed, got {other:?}"),
    }
    server.close().await;
}

/// `sleep` never answers, so the deadline fires and the process is killed.
#[tokio::test]
async fn hung_engine_is_killed_on_deadline() {
    let config = ServerConfig::new("sleep")
        .with_command_timeout(Duration::from_millis(200))
        .unwrap();
    let launcher = ProcessLauncher::new("sleep", vec!["30".to_string()]);
    let server = CliServer::with_launcher(config, Box::new(launcher));

    let err = server.resolve_languages().await.unwrap_err();
    assert!(matches!(err, EngineError::EngineCrashed { .. }), "{err}");
    assert!(matches!(
        server.status().await,
        ChannelStatus::Crashed { .. }
    ));
    server.close().await;
    assert_eq!(server.status().await, ChannelStatus::Closed);
}

#[tokio::test]
async fn missing_engine_is_unavailable() {
    let server = CliServer::new(ServerConfig::new("qlserve-no-such-engine"));
    assert!(matches!(
        server.get_version().await,
        Err(EngineError::EngineUnavailable { .. })
    ));
    assert_eq!(server.status().await, ChannelStatus::NotStarted);
}
