//! Bounded capture of the engine's stderr.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::task::JoinHandle;

/// Number of most recent stderr lines kept for error reports.
pub(crate) const STDERR_TAIL_LINES: usize = 50;

/// Longer lines are split into pieces of at most this many bytes.
pub(crate) const MAX_STDERR_LINE_BYTES: usize = 64 * 1024;

/// Last [`STDERR_TAIL_LINES`] lines written by the engine.
#[derive(Debug, Clone, Default)]
pub(crate) struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    pub(crate) fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub(crate) fn clear(&self) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub(crate) fn snapshot(&self) -> String {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    /// Drain `reader` line by line into the tail until EOF.
    pub(crate) fn spawn_drain<R>(&self, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let tail = self.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                let read = (&mut reader)
                    .take(MAX_STDERR_LINE_BYTES as u64)
                    .read_until(b'\n', &mut buf)
                    .await;
                match read {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                        tracing::debug!(target: "qlserve::engine_stderr", "{line}");
                        tail.push(line);
                    }
                    Err(e) => {
                        tracing::debug!("engine stderr read error: {e}");
                        break;
                    }
                }
            }
        })
    }
}
