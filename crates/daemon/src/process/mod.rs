// Served-process lifecycle: the launcher seam, the OS-backed handle, and the
// supervisor that owns exactly one live generation at a time.

use std::future::Future;
use std::path::Path;

use thiserror::Error;

pub mod launcher;
pub mod supervisor;

pub use launcher::{CommandLauncher, OutputBuffer, ProcessHandle, ADDR_PLACEHOLDER};
pub use supervisor::{ProcessSupervisor, ServeTarget, SUPERVISOR};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("termination request failed: {message}")]
    Terminate { message: String },
}

/// Starts the documentation server.
pub trait ProcessLauncher: Send + Sync + 'static {
    type Process: ServedProcess;

    fn launch(&self, listen_addr: &str, workdir: &Path) -> Result<Self::Process, ProcessError>;
}

/// One running generation of the served process.
pub trait ServedProcess: Send + Sync + 'static {
    fn pid(&self) -> Option<u32>;

    /// Request termination. Idempotent and non-blocking; the actual exit is
    /// observed through `wait_terminated`.
    fn terminate(&self) -> Result<(), ProcessError>;

    /// Resolves once the process has exited.
    fn wait_terminated(&self) -> impl Future<Output = ()> + Send;
}
