//! Engine process launch and ownership.
//!
//! [`EngineLauncher`] is the seam between the channel and the operating
//! system: [`ProcessLauncher`] spawns the real executable, tests plug in an
//! in-process engine. Either way the channel receives an [`EngineConnection`]
//! and is the only owner of it.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use qlserve_types::EngineError;

use crate::codec::{FrameError, FrameReader, FrameWriter};
use crate::config::ServerConfig;
use crate::stderr::StderrTail;

/// How long stderr may keep draining after the engine's streams are closed.
const STDERR_SETTLE: Duration = Duration::from_millis(200);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Starts engine processes for a channel.
pub trait EngineLauncher: Send + Sync {
    /// Executable name or path, for logs and error reports.
    fn executable(&self) -> &str;

    /// Start a fresh engine and hand back its streams.
    fn launch(&self) -> Result<EngineConnection, EngineError>;
}

/// Streams of one running engine, plus the process handle when there is one.
pub struct EngineConnection {
    writer: FrameWriter<BoxedWriter>,
    reader: FrameReader<BoxedReader>,
    stderr: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
    process: Option<ProcessGuard>,
}

/// What is left of a connection after it was torn down.
pub(crate) struct Termination {
    pub exit_status: Option<ExitStatus>,
    pub stderr: String,
}

impl EngineConnection {
    pub fn new<W, R>(stdin: W, stdout: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            writer: FrameWriter::new(Box::new(stdin)),
            reader: FrameReader::new(Box::new(stdout)),
            stderr: StderrTail::default(),
            stderr_task: None,
            process: None,
        }
    }

    /// Capture the engine's stderr in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_stderr<E>(mut self, stderr: E) -> Self
    where
        E: AsyncRead + Send + Unpin + 'static,
    {
        self.stderr_task = Some(self.stderr.spawn_drain(stderr));
        self
    }

    fn with_process(mut self, process: ProcessGuard) -> Self {
        self.process = Some(process);
        self
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(ProcessGuard::id)
    }

    pub(crate) async fn send(&mut self, words: &[String]) -> Result<(), FrameError> {
        self.writer.write_request(words).await
    }

    pub(crate) async fn receive(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        self.reader.read_frame().await
    }

    pub(crate) fn clear_stderr(&self) {
        self.stderr.clear();
    }

    pub(crate) fn stderr_tail(&self) -> String {
        self.stderr.snapshot()
    }

    /// Kill the engine immediately and collect whatever it wrote to stderr.
    pub(crate) async fn terminate(self) -> Termination {
        let Self {
            writer,
            reader,
            stderr,
            stderr_task,
            mut process,
        } = self;

        let exit_status = process.as_mut().and_then(ProcessGuard::try_exit_status);
        drop(writer);
        drop(reader);
        if let Some(process) = process.as_mut() {
            process.kill().await;
        }
        settle_stderr(stderr_task).await;

        Termination {
            exit_status,
            stderr: stderr.snapshot(),
        }
    }

    /// Ask the engine to exit, wait up to `timeout`, then kill it.
    pub(crate) async fn shutdown(self, timeout: Duration) {
        let Self {
            mut writer,
            reader,
            stderr: _,
            stderr_task,
            mut process,
        } = self;

        if let Err(e) = writer.write_request(&["shutdown".to_string()]).await {
            tracing::debug!("engine shutdown request failed: {e}");
        }
        let _ = writer.close().await;
        drop(writer);

        if let Some(process) = process.as_mut() {
            if process.wait_for_exit(timeout).await {
                tracing::info!("engine process exited");
            } else {
                tracing::warn!("engine didn't exit within {timeout:?}, killing");
                process.kill().await;
            }
        }
        drop(reader);
        settle_stderr(stderr_task).await;
    }
}

async fn settle_stderr(task: Option<JoinHandle<()>>) {
    let Some(mut task) = task else { return };
    if tokio::time::timeout(STDERR_SETTLE, &mut task).await.is_err() {
        task.abort();
    }
}

/// RAII guard that kills the engine (and its process group on Unix) on drop.
///
/// Dropping a `CliServer` without `close()` still releases the process.
pub(crate) struct ProcessGuard {
    child: Option<Child>,
}

impl ProcessGuard {
    pub(crate) fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    pub(crate) fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub(crate) fn try_exit_status(&mut self) -> Option<ExitStatus> {
        self.child.as_mut()?.try_wait().ok().flatten()
    }

    /// Returns true once the process has exited; the guard is then disarmed.
    pub(crate) async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let Some(child) = self.child.as_mut() else {
            return true;
        };
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(%status, "engine exit status");
                self.child = None;
                true
            }
            Ok(Err(e)) => {
                tracing::debug!("waiting for engine failed: {e}");
                false
            }
            Err(_) => false,
        }
    }

    pub(crate) async fn kill(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        kill_process_group(&child);
        if let Err(e) = child.kill().await {
            tracing::debug!("killing engine failed: {e}");
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        kill_process_group(child);
        let _ = child.start_kill();
        let _ = child.try_wait();
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain syscall on a pid we spawned as a session leader.
        unsafe {
            libc::killpg(pid as i32, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Put the engine in its own session (Unix only) so the entire process group
/// can be killed, and tie its lifetime to ours on Linux.
#[cfg(unix)]
fn set_new_session(cmd: &mut Command) {
    // SAFETY: only async-signal-safe libc calls run between fork and exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Linux-only: the engine dies with us even on kill -9.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Spawns the real engine executable in command-server mode.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    executable: String,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
        }
    }

    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.executable(), config.launch_args())
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn unavailable(&self, reason: impl Into<String>) -> EngineError {
        EngineError::EngineUnavailable {
            executable: self.executable.clone(),
            reason: reason.into(),
        }
    }
}

impl EngineLauncher for ProcessLauncher {
    fn executable(&self) -> &str {
        &self.executable
    }

    fn launch(&self) -> Result<EngineConnection, EngineError> {
        let resolved = which::which(&self.executable)
            .map_err(|e| self.unavailable(format!("not found in PATH: {e}")))?;

        let mut cmd = Command::new(&resolved);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        set_new_session(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| self.unavailable(format!("failed to spawn: {e}")))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(self.unavailable("engine streams were not captured"));
        };

        tracing::info!(
            executable = %resolved.display(),
            args = ?self.args,
            pid = ?child.id(),
            "Started engine process"
        );

        Ok(EngineConnection::new(stdin, stdout)
            .with_stderr(stderr)
            .with_process(ProcessGuard::new(child)))
    }
}
