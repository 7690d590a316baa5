// Background worker bookkeeping: start errors and the join handle the
// coordinator waits on before the process may exit.

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::error;

use crate::process::ProcessError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{worker} was already started")]
    AlreadyStarted { worker: &'static str },
    #[error("poll interval must be greater than zero")]
    ZeroInterval,
    #[error("initial launch of the served process failed: {0}")]
    InitialLaunch(#[source] ProcessError),
}

/// A running worker's background routine.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn new(name: &'static str, task: JoinHandle<()>) -> Self {
        Self { name, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the routine to return. A panic inside it is logged, not
    /// propagated.
    pub async fn join(self) {
        if let Err(join_error) = self.task.await {
            error!(worker = self.name, ?join_error, "worker routine did not finish cleanly");
        }
    }
}
