// Repository watcher: polls the tracked repository on a fixed interval and
// fast-forwards the workspace when the remote has moved.
//
// Per tick: fetch -> status -> dispatch. Fetch and status failures are
// transient and retried on the next tick. A failed merge or a local branch
// ahead of its remote is escalated as fatal and ends polling. On shutdown an
// in-flight poll is cancelled and awaited, never abandoned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sitewatch_common::{RepositoryEvent, StatusReport, SyncState};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument, Span};

use super::client::{RepositoryClient, RepositoryError};
use crate::fatal::{FatalError, FatalSender};
use crate::shutdown::ShutdownToken;
use crate::worker::{WorkerError, WorkerHandle};

pub const WATCHER: &str = "repo_watcher";

/// What one polling tick concluded.
#[derive(Debug)]
pub enum TickOutcome {
    /// Fetch or status failed; try again next tick.
    Skipped,
    /// Already up to date.
    Idle,
    /// Behind, and the merge succeeded.
    Updated { remote_ref: String },
    /// The watcher cannot continue.
    Fatal(FatalError),
}

pub struct RepositoryWatcher<C> {
    client: Arc<C>,
    interval: Duration,
    fatal: FatalSender,
    span: Span,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl<C: RepositoryClient> RepositoryWatcher<C> {
    pub fn new(client: Arc<C>, interval: Duration, fatal: FatalSender, span: Span) -> Self {
        Self {
            client,
            interval,
            fatal,
            span,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawn the polling routine. The first poll happens one full interval
    /// after this call.
    pub fn start(
        &self,
        shutdown: ShutdownToken,
        events: mpsc::Sender<RepositoryEvent>,
    ) -> Result<WorkerHandle, WorkerError> {
        if self.interval.is_zero() {
            return Err(WorkerError::ZeroInterval);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted { worker: WATCHER });
        }

        let routine = poll_loop(
            Arc::clone(&self.client),
            self.interval,
            self.fatal.clone(),
            shutdown,
            events,
        );
        let task = tokio::spawn(routine.instrument(self.span.clone()));

        self.span.in_scope(|| {
            info!(interval_ms = self.interval.as_millis() as u64, "repository watcher started")
        });
        Ok(WorkerHandle::new(WATCHER, task))
    }

    /// Marks the watcher as stopping. The routine itself ends on shutdown
    /// cancellation; this never fails and is safe to call repeatedly.
    pub fn stop(&self) -> Result<(), WorkerError> {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.span.in_scope(|| debug!("repository watcher stop requested"));
        }
        Ok(())
    }
}

async fn poll_loop<C: RepositoryClient>(
    client: Arc<C>,
    interval: Duration,
    fatal: FatalSender,
    shutdown: ShutdownToken,
    events: mpsc::Sender<RepositoryEvent>,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let poll = poll_once(&client);
        tokio::pin!(poll);
        let outcome = tokio::select! {
            outcome = &mut poll => outcome,
            _ = shutdown.cancelled() => {
                // The blocking git call cannot be dropped mid-flight: cancel
                // what can be cancelled, then wait for the rest to finish.
                client.cancel();
                let abandoned = poll.await;
                debug!(?abandoned, "in-flight poll finished after cancellation");
                break;
            }
        };

        match outcome {
            TickOutcome::Skipped | TickOutcome::Idle => {}
            TickOutcome::Updated { remote_ref } => {
                let sent = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    sent = events.send(RepositoryEvent::Update) => sent,
                };
                if sent.is_err() {
                    warn!(%remote_ref, "event channel closed, stopping");
                    break;
                }
                debug!(%remote_ref, "update event emitted");
            }
            TickOutcome::Fatal(error) => {
                error!(error = %error, "repository watcher cannot continue");
                fatal.escalate(WATCHER, error);
                break;
            }
        }
    }

    info!("repository watcher finished");
}

/// Run one fetch/status/dispatch cycle.
pub async fn poll_once<C: RepositoryClient>(client: &Arc<C>) -> TickOutcome {
    debug!("git fetch begin");
    if let Err(error) = blocking(client, |c| c.fetch()).await {
        error!(operation = "fetch", error = %error, "fetch failed, retrying next tick");
        return TickOutcome::Skipped;
    }
    debug!("git fetch end");

    let report = match blocking(client, |c| c.status()).await {
        Ok(report) => report,
        Err(error) => {
            error!(operation = "status", error = %error, "status failed, retrying next tick");
            return TickOutcome::Skipped;
        }
    };

    dispatch(client, report).await
}

async fn dispatch<C: RepositoryClient>(client: &Arc<C>, report: StatusReport) -> TickOutcome {
    let StatusReport { local_branch, remote_ref, sync_state } = report;
    info!(
        local_branch = local_branch.as_deref().unwrap_or("(detached)"),
        %remote_ref,
        %sync_state,
        "git status"
    );

    match sync_state {
        SyncState::UpToDate => TickOutcome::Idle,
        SyncState::Behind => {
            let merge_ref = remote_ref.clone();
            match blocking(client, move |c| c.merge(&merge_ref)).await {
                Ok(()) => {
                    info!(%remote_ref, "merged remote changes");
                    TickOutcome::Updated { remote_ref }
                }
                Err(source) => TickOutcome::Fatal(FatalError::MergeFailed { remote_ref, source }),
            }
        }
        SyncState::Ahead => TickOutcome::Fatal(FatalError::LocalAhead { remote_ref }),
    }
}

async fn blocking<C, T, F>(client: &Arc<C>, op: F) -> Result<T, RepositoryError>
where
    C: RepositoryClient,
    T: Send + 'static,
    F: FnOnce(&C) -> Result<T, RepositoryError> + Send + 'static,
{
    let client = Arc::clone(client);
    match tokio::task::spawn_blocking(move || op(&client)).await {
        Ok(result) => result,
        Err(join_error) => Err(RepositoryError::Interrupted(join_error.to_string())),
    }
}
