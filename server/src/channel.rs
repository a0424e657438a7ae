//! Serialized access to the single engine process.
//!
//! The process lifecycle is an explicit state machine guarded by one mutex:
//!
//! ```text
//! NotStarted ──launch──▶ Running ──crash/timeout──▶ Crashed
//!     ▲                    │  ▲                        │
//!     └────── restart ─────┘  └──────── launch ────────┘
//!
//! any state ──close──▶ Closed
//! ```
//!
//! The lock is held for a full write-then-read cycle, so at most one command
//! is in flight and responses can never be matched to the wrong caller.
//! tokio's mutex is fair: queued callers are served in arrival order.

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;

use qlserve_types::EngineError;

use crate::codec::FrameError;
use crate::launcher::{EngineConnection, EngineLauncher, Termination};

/// Grace period for the engine to exit after a shutdown request.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Observable lifecycle state of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    NotStarted,
    Running {
        pid: Option<u32>,
        commands_served: u64,
    },
    Crashed {
        reason: String,
    },
    Closed,
}

enum EngineState {
    NotStarted,
    Running(RunningEngine),
    Crashed { reason: String },
    Closed,
}

/// A command whose caller went away before its response was read.
#[derive(Clone)]
struct InFlight {
    command: String,
    written: bool,
}

struct RunningEngine {
    conn: EngineConnection,
    in_flight: Option<InFlight>,
    commands_served: u64,
}

enum ExchangeError {
    Crashed(String),
    TimedOut(Duration),
    Oversized(usize),
}

impl RunningEngine {
    fn new(conn: EngineConnection) -> Self {
        Self {
            conn,
            in_flight: None,
            commands_served: 0,
        }
    }

    /// Send one command and read its response frame.
    ///
    /// If this future is dropped midway, `in_flight` stays set and the next
    /// caller deals with the orphaned response.
    async fn exchange(
        &mut self,
        command: &str,
        words: &[String],
        timeout: Duration,
    ) -> Result<Vec<u8>, ExchangeError> {
        self.conn.clear_stderr();
        self.in_flight = Some(InFlight {
            command: command.to_string(),
            written: false,
        });

        let exchange = async {
            self.conn
                .send(words)
                .await
                .map_err(|e| ExchangeError::Crashed(format!("failed to send command: {e}")))?;
            if let Some(in_flight) = self.in_flight.as_mut() {
                in_flight.written = true;
            }
            match self.conn.receive().await {
                Ok(Some(bytes)) => Ok(bytes),
                Ok(None) => Err(ExchangeError::Crashed(
                    "engine closed its output".to_string(),
                )),
                Err(FrameError::Oversized { limit }) => Err(ExchangeError::Oversized(limit)),
                Err(e) => Err(ExchangeError::Crashed(format!(
                    "failed to read response: {e}"
                ))),
            }
        };

        let result = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::TimedOut(timeout)),
        };
        self.in_flight = None;
        if result.is_ok() {
            self.commands_served += 1;
        }
        result
    }
}

/// Serialized access to a single engine process.
///
/// Nothing else holds the process; every interaction goes through
/// [`ProcessChannel::invoke`].
pub struct ProcessChannel {
    launcher: Box<dyn EngineLauncher>,
    state: Mutex<EngineState>,
    default_timeout: Duration,
}

impl ProcessChannel {
    /// Create a channel. The engine is not started until the first command.
    pub fn new(launcher: Box<dyn EngineLauncher>, default_timeout: Duration) -> Self {
        Self {
            launcher,
            state: Mutex::new(EngineState::NotStarted),
            default_timeout,
        }
    }

    #[must_use]
    pub fn executable(&self) -> &str {
        self.launcher.executable()
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub async fn status(&self) -> ChannelStatus {
        match &*self.state.lock().await {
            EngineState::NotStarted => ChannelStatus::NotStarted,
            EngineState::Running(engine) => ChannelStatus::Running {
                pid: engine.conn.pid(),
                commands_served: engine.commands_served,
            },
            EngineState::Crashed { reason } => ChannelStatus::Crashed {
                reason: reason.clone(),
            },
            EngineState::Closed => ChannelStatus::Closed,
        }
    }

    /// Run `command` with `args` and return the engine's JSON response.
    pub async fn invoke(&self, command: &[&str], args: &[String]) -> Result<Value, EngineError> {
        self.invoke_with_deadline(command, args, self.default_timeout)
            .await
    }

    /// Like [`invoke`](Self::invoke) with an explicit deadline.
    ///
    /// The deadline covers the exchange with the engine, not the time spent
    /// queued behind other callers. On expiry the process is assumed hung:
    /// it is killed and the call fails with `EngineCrashed`. Waiting out the
    /// response of an abandoned command is bounded by the same deadline; if
    /// that runs out the engine is restarted before this command is sent.
    pub async fn invoke_with_deadline(
        &self,
        command: &[&str],
        args: &[String],
        timeout: Duration,
    ) -> Result<Value, EngineError> {
        let words: Vec<String> = command
            .iter()
            .map(|word| (*word).to_string())
            .chain(args.iter().cloned())
            .collect();
        let command_line = words.join(" ");

        let mut state = self.state.lock().await;
        let engine = self.ensure_running(&mut state, timeout).await?;

        tracing::debug!(command = %command_line, "Invoking engine");
        let started = Instant::now();
        match engine.exchange(&command_line, &words, timeout).await {
            Ok(bytes) => {
                tracing::debug!(
                    command = %command_line,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    bytes = bytes.len(),
                    "Engine command finished"
                );
                decode_response(&command_line, &bytes, &engine.conn.stderr_tail())
            }
            Err(ExchangeError::Oversized(limit)) => {
                // The rest of the oversized frame is still in the pipe.
                let termination = self
                    .tear_down(&mut state, EngineState::NotStarted)
                    .await;
                Err(EngineError::malformed(
                    &command_line,
                    with_stderr(
                        format!("response exceeds maximum frame size of {limit} bytes"),
                        termination.map(|t| t.stderr).as_deref().unwrap_or(""),
                    ),
                    "",
                ))
            }
            Err(ExchangeError::Crashed(reason)) => {
                Err(self.crashed(&mut state, command_line, reason).await)
            }
            Err(ExchangeError::TimedOut(after)) => {
                let reason = format!("no response within {after:?}; engine assumed hung");
                Err(self.crashed(&mut state, command_line, reason).await)
            }
        }
    }

    /// Terminate any running engine; the next command starts a fresh one.
    ///
    /// Has no effect on a closed channel.
    pub async fn restart(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, EngineState::Closed) {
            tracing::debug!("Ignoring restart of closed engine channel");
            return;
        }
        let previous = std::mem::replace(&mut *state, EngineState::NotStarted);
        if let EngineState::Running(engine) = previous {
            tracing::info!("Restarting engine process");
            engine.conn.shutdown(SHUTDOWN_TIMEOUT).await;
        }
    }

    /// Shut the engine down gracefully and refuse further commands.
    ///
    /// Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, EngineState::Closed);
        if let EngineState::Running(engine) = previous {
            tracing::info!("Shutting down engine process...");
            engine.conn.shutdown(SHUTDOWN_TIMEOUT).await;
        }
    }

    async fn ensure_running<'a>(
        &self,
        state: &'a mut EngineState,
        timeout: Duration,
    ) -> Result<&'a mut RunningEngine, EngineError> {
        self.settle_abandoned(state, timeout).await;

        match &*state {
            EngineState::Closed => {
                return Err(EngineError::EngineUnavailable {
                    executable: self.executable().to_string(),
                    reason: "the engine channel has been closed".to_string(),
                });
            }
            EngineState::Crashed { reason } => {
                tracing::info!(previous = %reason, "Restarting engine after crash");
            }
            EngineState::NotStarted | EngineState::Running(_) => {}
        }

        if !matches!(state, EngineState::Running(_)) {
            let conn = self.launcher.launch()?;
            tracing::info!(
                executable = self.executable(),
                pid = ?conn.pid(),
                "Engine process ready"
            );
            *state = EngineState::Running(RunningEngine::new(conn));
        }

        match state {
            EngineState::Running(engine) => Ok(engine),
            _ => Err(EngineError::EngineUnavailable {
                executable: self.executable().to_string(),
                reason: "engine did not reach the running state".to_string(),
            }),
        }
    }

    /// Wait out a command whose caller went away, so its response is never
    /// handed to the next caller. Restarts the engine if that fails or takes
    /// longer than `timeout`.
    ///
    /// The in-flight marker stays set until the response has been read, so a
    /// caller dropped during the wait leaves the same work to the next one.
    async fn settle_abandoned(&self, state: &mut EngineState, timeout: Duration) {
        let EngineState::Running(engine) = &mut *state else {
            return;
        };
        let Some(abandoned) = engine.in_flight.clone() else {
            return;
        };

        let wait = self.default_timeout.min(timeout);
        let failure = if abandoned.written {
            match tokio::time::timeout(wait, engine.conn.receive()).await {
                Ok(Ok(Some(_))) => {
                    engine.in_flight = None;
                    None
                }
                Ok(Ok(None)) => Some("engine closed its output".to_string()),
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("no response within {wait:?}")),
            }
        } else {
            Some("request was only partially written".to_string())
        };

        match failure {
            None => tracing::debug!(
                command = %abandoned.command,
                "Discarded response of abandoned command"
            ),
            Some(reason) => {
                tracing::warn!(
                    command = %abandoned.command,
                    %reason,
                    "Abandoned command left the engine unusable; restarting"
                );
                self.tear_down(state, EngineState::NotStarted).await;
            }
        }
    }

    async fn crashed(
        &self,
        state: &mut EngineState,
        command: String,
        reason: String,
    ) -> EngineError {
        let termination = self
            .tear_down(
                state,
                EngineState::Crashed {
                    reason: reason.clone(),
                },
            )
            .await;
        let (reason, stderr) = match termination {
            Some(Termination {
                exit_status: Some(status),
                stderr,
            }) => (format!("{reason} ({status})"), stderr),
            Some(Termination { stderr, .. }) => (reason, stderr),
            None => (reason, String::new()),
        };
        tracing::warn!(command = %command, %reason, "Engine crashed");
        EngineError::EngineCrashed {
            command,
            reason,
            stderr,
        }
    }

    /// Replace the state and kill the engine it held, if any.
    async fn tear_down(&self, state: &mut EngineState, next: EngineState) -> Option<Termination> {
        match std::mem::replace(state, next) {
            EngineState::Running(engine) => Some(engine.conn.terminate().await),
            _ => None,
        }
    }
}

fn with_stderr(reason: String, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        reason
    } else {
        format!("{reason}; engine stderr: {stderr}")
    }
}

fn decode_response(command: &str, bytes: &[u8], stderr: &str) -> Result<Value, EngineError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(EngineError::malformed(
            command,
            with_stderr("engine produced no output".to_string(), stderr),
            String::from_utf8_lossy(bytes),
        ));
    }
    serde_json::from_slice(bytes).map_err(|e| {
        EngineError::malformed(
            command,
            with_stderr(format!("response is not valid JSON: {e}"), stderr),
            String::from_utf8_lossy(bytes),
        )
    })
}
