//! In-process stand-in for the engine, for tests.
//!
//! [`FakeEngine`] implements [`EngineLauncher`] over in-memory pipes and
//! speaks the same NUL-framed protocol as the real command server. Replies
//! come from a script first, then from a fallback handler.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncWriteExt, DuplexStream};

use qlserve_types::EngineError;

use crate::codec::{FrameReader, FrameWriter};
use crate::launcher::{EngineConnection, EngineLauncher};

const PIPE_CAPACITY: usize = 64 * 1024;

/// What the fake engine does with one request.
#[derive(Debug, Clone)]
pub enum FakeReply {
    /// Respond with the serialized value.
    Json(Value),
    /// Respond with raw text, which need not be JSON.
    Text(String),
    /// Write to stderr and exit without responding.
    Crash { stderr: String },
    /// Never respond; keep reading until stdin closes.
    Hang,
    /// Respond with `value` after `delay`.
    Delayed { delay: Duration, value: Value },
}

type Handler = Arc<dyn Fn(&[String]) -> FakeReply + Send + Sync>;

struct Inner {
    script: Mutex<VecDeque<FakeReply>>,
    fallback: Handler,
    launches: AtomicUsize,
    shutdowns: AtomicUsize,
    requests: Mutex<Vec<Vec<String>>>,
    launch_failure: Mutex<Option<String>>,
}

impl Inner {
    fn next_reply(&self, words: &[String]) -> FakeReply {
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.unwrap_or_else(|| (self.fallback)(words))
    }
}

/// Scriptable fake engine. Clones share state, so a test can keep one
/// handle while the channel owns another.
#[derive(Clone)]
pub struct FakeEngine {
    inner: Arc<Inner>,
}

impl FakeEngine {
    /// Answer every request with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&[String]) -> FakeReply + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(VecDeque::new()),
                fallback: Arc::new(handler),
                launches: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                launch_failure: Mutex::new(None),
            }),
        }
    }

    /// Answer the first requests from `replies` in order, then with `null`.
    pub fn scripted(replies: Vec<FakeReply>) -> Self {
        let engine = Self::new(|_| FakeReply::Json(Value::Null));
        engine
            .inner
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(replies);
        engine
    }

    /// Replace the handler used once the script runs out.
    #[must_use]
    pub fn then<F>(self, handler: F) -> Self
    where
        F: Fn(&[String]) -> FakeReply + Send + Sync + 'static,
    {
        let script = std::mem::take(
            &mut *self
                .inner
                .script
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let engine = Self::new(handler);
        *engine
            .inner
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = script;
        engine
    }

    /// Make the next `launch` fail with `EngineUnavailable`.
    pub fn fail_next_launch(&self, reason: impl Into<String>) {
        *self
            .inner
            .launch_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    /// Number of successful launches.
    #[must_use]
    pub fn launches(&self) -> usize {
        self.inner.launches.load(Ordering::SeqCst)
    }

    /// Number of shutdown requests received.
    #[must_use]
    pub fn shutdowns(&self) -> usize {
        self.inner.shutdowns.load(Ordering::SeqCst)
    }

    /// Every request received so far, excluding shutdown.
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EngineLauncher for FakeEngine {
    fn executable(&self) -> &str {
        "fake-engine"
    }

    fn launch(&self) -> Result<EngineConnection, EngineError> {
        let failure = self
            .inner
            .launch_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reason) = failure {
            return Err(EngineError::EngineUnavailable {
                executable: self.executable().to_string(),
                reason,
            });
        }

        let (client_stdin, engine_stdin) = tokio::io::duplex(PIPE_CAPACITY);
        let (engine_stdout, client_stdout) = tokio::io::duplex(PIPE_CAPACITY);
        let (engine_stderr, client_stderr) = tokio::io::duplex(PIPE_CAPACITY);

        self.inner.launches.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(serve(
            Arc::clone(&self.inner),
            engine_stdin,
            engine_stdout,
            engine_stderr,
        ));

        Ok(EngineConnection::new(client_stdin, client_stdout).with_stderr(client_stderr))
    }
}

async fn serve(
    inner: Arc<Inner>,
    stdin: DuplexStream,
    stdout: DuplexStream,
    mut stderr: DuplexStream,
) {
    let mut reader = FrameReader::new(stdin);
    let mut writer = FrameWriter::new(stdout);

    while let Ok(Some(frame)) = reader.read_frame().await {
        let Ok(words) = serde_json::from_slice::<Vec<String>>(&frame) else {
            return;
        };
        if words == ["shutdown"] {
            inner.shutdowns.fetch_add(1, Ordering::SeqCst);
            return;
        }
        inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(words.clone());

        let body = match inner.next_reply(&words) {
            FakeReply::Json(value) => value.to_string(),
            FakeReply::Text(text) => text,
            FakeReply::Crash { stderr: message } => {
                let _ = stderr.write_all(message.as_bytes()).await;
                return;
            }
            FakeReply::Hang => {
                while let Ok(Some(_)) = reader.read_frame().await {}
                return;
            }
            FakeReply::Delayed { delay, value } => {
                tokio::time::sleep(delay).await;
                value.to_string()
            }
        };
        if writer.write_frame(body.as_bytes()).await.is_err() {
            return;
        }
    }
}
