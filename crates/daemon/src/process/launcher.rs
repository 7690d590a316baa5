use std::future::Future;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, Instrument, Span};

use super::{ProcessError, ProcessLauncher, ServedProcess};
use crate::shutdown::{Shutdown, ShutdownToken};

/// Replaced by the listen address in every launcher argument.
pub const ADDR_PLACEHOLDER: &str = "{addr}";

const READ_CHUNK: usize = 8 * 1024;

/// How long output capture may keep reading after the child exits. Pipes
/// inherited by grandchildren would otherwise keep it alive indefinitely.
const CAPTURE_DRAIN: Duration = Duration::from_millis(200);

/// Launches `program args...` with the listen address substituted in.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn render_args(&self, listen_addr: &str) -> Vec<String> {
        self.args.iter().map(|arg| arg.replace(ADDR_PLACEHOLDER, listen_addr)).collect()
    }
}

impl ProcessLauncher for CommandLauncher {
    type Process = ProcessHandle;

    fn launch(&self, listen_addr: &str, workdir: &Path) -> Result<ProcessHandle, ProcessError> {
        ProcessHandle::spawn(&self.program, &self.render_args(listen_addr), workdir)
    }
}

/// Unbounded capture of one output stream.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    fn append(&self, chunk: &[u8]) {
        self.lock().extend_from_slice(chunk);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct ExitState {
    terminate_requested: bool,
    status: Option<ExitStatus>,
    error: Option<String>,
}

/// A live child process. Shared between the controller, which requests
/// termination, and the exit waiter, which records how the child ended.
/// Dropping the handle kills the child.
#[derive(Debug)]
pub struct ProcessHandle {
    program: String,
    pid: Option<u32>,
    kill: Shutdown,
    state: Arc<Mutex<ExitState>>,
    done: watch::Receiver<bool>,
    waiter: JoinHandle<()>,
    captures: Vec<AbortHandle>,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
}

impl ProcessHandle {
    /// Spawn `program` and its exit waiter. Must be called inside a Tokio
    /// runtime.
    pub fn spawn(program: &str, args: &[String], workdir: &Path) -> Result<Self, ProcessError> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn { program: program.to_string(), source })?;

        let pid = child.id();
        let stdout = OutputBuffer::default();
        let stderr = OutputBuffer::default();
        let mut captures = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            captures.push(tokio::spawn(capture(pipe, stdout.clone()).in_current_span()));
        }
        if let Some(pipe) = child.stderr.take() {
            captures.push(tokio::spawn(capture(pipe, stderr.clone()).in_current_span()));
        }
        let capture_aborts = captures.iter().map(JoinHandle::abort_handle).collect();

        let kill = Shutdown::new();
        let state = Arc::new(Mutex::new(ExitState::default()));
        let (done_tx, done) = watch::channel(false);
        let span = Span::current();
        let waiter = tokio::spawn(
            wait_for_exit(
                child,
                kill.token(),
                Arc::clone(&state),
                done_tx,
                captures,
                stderr.clone(),
                program.to_string(),
            )
            .instrument(span),
        );

        info!(program, ?pid, args = ?args, workdir = %workdir.display(), "served process launched");
        Ok(Self {
            program: program.to_string(),
            pid,
            kill,
            state,
            done,
            waiter,
            captures: capture_aborts,
            stdout,
            stderr,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        lock_state(&self.state).status
    }

    /// How the child ended, if it ended badly. `None` while it is running.
    pub fn exit_error(&self) -> Option<String> {
        lock_state(&self.state).error.clone()
    }

    pub fn stdout(&self) -> &OutputBuffer {
        &self.stdout
    }

    pub fn stderr(&self) -> &OutputBuffer {
        &self.stderr
    }

    /// Whether both output streams have stopped being read.
    pub fn output_closed(&self) -> bool {
        self.captures.iter().all(AbortHandle::is_finished)
    }
}

impl ServedProcess for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&self) -> Result<(), ProcessError> {
        if self.is_done() {
            return Ok(());
        }
        if self.waiter.is_finished() && !self.is_done() {
            return Err(ProcessError::Terminate {
                message: format!("exit waiter for `{}` ({:?}) is gone", self.program, self.pid),
            });
        }

        lock_state(&self.state).terminate_requested = true;
        self.kill.cancel();
        Ok(())
    }

    fn wait_terminated(&self) -> impl Future<Output = ()> + Send {
        let mut done = self.done.clone();
        async move {
            // A closed channel means the waiter is gone; nothing left to wait for.
            let _ = done.wait_for(|done| *done).await;
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        lock_state(&self.state).terminate_requested = true;
        self.kill.cancel();
        for capture in &self.captures {
            capture.abort();
        }
    }
}

async fn wait_for_exit(
    mut child: Child,
    kill: ShutdownToken,
    state: Arc<Mutex<ExitState>>,
    done: watch::Sender<bool>,
    captures: Vec<JoinHandle<()>>,
    stderr: OutputBuffer,
    program: String,
) {
    let exited = tokio::select! {
        result = child.wait() => Some(result),
        _ = kill.cancelled() => None,
    };
    let result = match exited {
        Some(result) => result,
        None => {
            if let Err(error) = child.start_kill() {
                debug!(%program, %error, "kill failed, child may have already exited");
            }
            child.wait().await
        }
    };

    let unexpected = {
        let mut state = lock_state(&state);
        match &result {
            Ok(status) => {
                state.status = Some(*status);
                if !status.success() {
                    state.error = Some(format!("`{program}` exited with {status}"));
                }
            }
            Err(error) => state.error = Some(format!("waiting for `{program}` failed: {error}")),
        }
        !state.terminate_requested
    };

    if unexpected {
        error!(
            %program,
            status = ?result.as_ref().ok(),
            stderr_bytes = stderr.len(),
            "served process exited unexpectedly"
        );
    } else {
        debug!(%program, status = ?result.as_ref().ok(), "served process exited");
    }

    done.send_replace(true);

    for mut capture in captures {
        if tokio::time::timeout(CAPTURE_DRAIN, &mut capture).await.is_err() {
            debug!(%program, "output pipe still held open after exit, capture aborted");
            capture.abort();
        }
    }
}

async fn capture<R: AsyncRead + Unpin>(mut reader: R, buffer: OutputBuffer) {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => buffer.append(&chunk[..read]),
            Err(error) => {
                debug!(%error, "output capture stopped");
                break;
            }
        }
    }
}

fn lock_state(state: &Mutex<ExitState>) -> MutexGuard<'_, ExitState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
