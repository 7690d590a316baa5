// Fatal-error escalation from workers to the coordinator.
//
// Workers never exit the process themselves. They report here and return
// from their routine; the coordinator owns the exit decision.

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::git::RepositoryError;
use crate::process::ProcessError;

/// Must exceed the number of producers so no report blocks during shutdown.
pub const FATAL_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Error)]
pub enum FatalError {
    #[error("merge of `{remote_ref}` failed, workspace needs manual repair: {source}")]
    MergeFailed {
        remote_ref: String,
        #[source]
        source: RepositoryError,
    },
    #[error("local branch is ahead of `{remote_ref}`; the workspace must be a mirror of its remote")]
    LocalAhead { remote_ref: String },
    #[error("failed to terminate served process generation {generation}: {source}")]
    Terminate {
        generation: u64,
        #[source]
        source: ProcessError,
    },
    #[error("failed to launch served process generation {generation}: {source}")]
    Launch {
        generation: u64,
        #[source]
        source: ProcessError,
    },
}

/// One report on the fatal channel. `error: None` asks for a clean exit.
#[derive(Debug)]
pub struct FatalReport {
    pub worker: &'static str,
    pub error: Option<FatalError>,
}

#[derive(Debug, Clone)]
pub struct FatalSender {
    tx: mpsc::Sender<FatalReport>,
}

pub fn fatal_channel() -> (FatalSender, mpsc::Receiver<FatalReport>) {
    let (tx, rx) = mpsc::channel(FATAL_CHANNEL_CAPACITY);
    (FatalSender { tx }, rx)
}

impl FatalSender {
    /// Report an irrecoverable error. Returns false if the report was dropped.
    pub fn escalate(&self, worker: &'static str, error: FatalError) -> bool {
        self.deliver(FatalReport { worker, error: Some(error) })
    }

    /// Ask the coordinator to exit with success.
    pub fn request_clean_exit(&self, worker: &'static str) -> bool {
        self.deliver(FatalReport { worker, error: None })
    }

    // Never blocks: once shutdown has begun, later reports are best-effort.
    fn deliver(&self, report: FatalReport) -> bool {
        match self.tx.try_send(report) {
            Ok(()) => true,
            Err(TrySendError::Full(report)) => {
                warn!(worker = report.worker, error = ?report.error, "fatal channel full, dropping report");
                false
            }
            Err(TrySendError::Closed(report)) => {
                debug!(worker = report.worker, error = ?report.error, "coordinator gone, dropping fatal report");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn escalated_errors_reach_the_receiver() {
        let (tx, mut rx) = fatal_channel();
        assert!(tx.escalate("repo_watcher", FatalError::LocalAhead { remote_ref: "origin/main".into() }));
        assert!(tx.request_clean_exit("supervisor"));

        let first = rx.recv().await.expect("first report");
        assert_eq!(first.worker, "repo_watcher");
        assert!(matches!(first.error, Some(FatalError::LocalAhead { .. })));

        let second = rx.recv().await.expect("second report");
        assert_eq!(second.worker, "supervisor");
        assert!(second.error.is_none());
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (tx, _rx) = fatal_channel();
        for _ in 0..FATAL_CHANNEL_CAPACITY {
            assert!(tx.request_clean_exit("test"));
        }
        assert!(!tx.request_clean_exit("test"));
    }

    #[test]
    fn closed_channel_drops_report() {
        let (tx, rx) = fatal_channel();
        drop(rx);
        assert!(!tx.escalate("test", FatalError::LocalAhead { remote_ref: "origin/main".into() }));
    }

    #[test]
    fn fatal_errors_name_the_failing_operation() {
        let error = FatalError::LocalAhead { remote_ref: "origin/main".into() };
        assert!(error.to_string().contains("ahead of `origin/main`"));

        let error = FatalError::Launch {
            generation: 3,
            source: ProcessError::Terminate { message: "gone".into() },
        };
        assert!(error.to_string().contains("generation 3"));
    }
}
