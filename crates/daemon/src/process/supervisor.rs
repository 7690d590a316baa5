// Process supervisor: keeps exactly one generation of the served process
// alive and replaces it on every reload command.
//
// A reload is terminate-then-launch. The old child only has to have been
// asked to exit before the new one starts; its actual exit is observed by
// its own exit waiter.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sitewatch_common::SupervisorCommand;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument, Span};

use super::{ProcessLauncher, ServedProcess};
use crate::fatal::{FatalError, FatalSender};
use crate::shutdown::ShutdownToken;
use crate::worker::{WorkerError, WorkerHandle};

pub const SUPERVISOR: &str = "supervisor";

/// Where every generation listens and what directory it serves. Fixed for
/// the lifetime of the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeTarget {
    pub listen_addr: String,
    pub workdir: PathBuf,
}

pub struct ProcessSupervisor<L> {
    launcher: Arc<L>,
    target: ServeTarget,
    shutdown_grace: Duration,
    fatal: FatalSender,
    span: Span,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl<L: ProcessLauncher> ProcessSupervisor<L> {
    pub fn new(
        launcher: Arc<L>,
        target: ServeTarget,
        shutdown_grace: Duration,
        fatal: FatalSender,
        span: Span,
    ) -> Self {
        Self {
            launcher,
            target,
            shutdown_grace,
            fatal,
            span,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> &ServeTarget {
        &self.target
    }

    /// Launch generation 1 and spawn the control routine. Returns once the
    /// first launch has succeeded.
    pub fn start(
        &self,
        shutdown: ShutdownToken,
        commands: mpsc::Receiver<SupervisorCommand>,
    ) -> Result<WorkerHandle, WorkerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted { worker: SUPERVISOR });
        }

        let first = self
            .span
            .in_scope(|| self.launcher.launch(&self.target.listen_addr, &self.target.workdir))
            .map_err(WorkerError::InitialLaunch)?;
        self.span.in_scope(|| {
            info!(
                generation = 1u64,
                pid = ?first.pid(),
                listen_addr = %self.target.listen_addr,
                workdir = %self.target.workdir.display(),
                "supervisor started"
            )
        });

        let control = Control {
            launcher: Arc::clone(&self.launcher),
            target: self.target.clone(),
            shutdown_grace: self.shutdown_grace,
            fatal: self.fatal.clone(),
            current: first,
            generation: 1,
        };
        let task = tokio::spawn(control.run(shutdown, commands).instrument(self.span.clone()));
        Ok(WorkerHandle::new(SUPERVISOR, task))
    }

    /// Marks the supervisor as stopping. Resources are released through
    /// shutdown cancellation; this never fails and is safe to call repeatedly.
    pub fn stop(&self) -> Result<(), WorkerError> {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.span.in_scope(|| debug!("supervisor stop requested"));
        }
        Ok(())
    }
}

struct Control<L: ProcessLauncher> {
    launcher: Arc<L>,
    target: ServeTarget,
    shutdown_grace: Duration,
    fatal: FatalSender,
    current: L::Process,
    generation: u64,
}

impl<L: ProcessLauncher> Control<L> {
    async fn run(
        mut self,
        shutdown: ShutdownToken,
        mut commands: mpsc::Receiver<SupervisorCommand>,
    ) {
        let mut commands_open = true;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    self.shut_down().await;
                    return;
                }
                command = commands.recv(), if commands_open => match command {
                    Some(SupervisorCommand::Reload) => {
                        if let Err(error) = self.reload() {
                            error!(
                                operation = "reload",
                                error = %error,
                                "reload failed, supervisor stopping"
                            );
                            self.fatal.escalate(SUPERVISOR, error);
                            return;
                        }
                    }
                    None => {
                        debug!("command channel closed, serving until shutdown");
                        commands_open = false;
                    }
                },
            }
        }
    }

    fn reload(&mut self) -> Result<(), FatalError> {
        let old_generation = self.generation;
        self.current
            .terminate()
            .map_err(|source| FatalError::Terminate { generation: old_generation, source })?;
        debug!(generation = old_generation, "termination requested");

        let next_generation = old_generation + 1;
        let next = self
            .launcher
            .launch(&self.target.listen_addr, &self.target.workdir)
            .map_err(|source| FatalError::Launch { generation: next_generation, source })?;

        info!(generation = next_generation, pid = ?next.pid(), "served process reloaded");
        self.current = next;
        self.generation = next_generation;
        Ok(())
    }

    async fn shut_down(self) {
        let generation = self.generation;
        if let Err(error) = self.current.terminate() {
            warn!(generation, error = %error, "termination request failed during shutdown");
        }
        if self.shutdown_grace.is_zero() {
            info!(generation, "supervisor stopped");
            return;
        }

        match timeout(self.shutdown_grace, self.current.wait_terminated()).await {
            Ok(()) => info!(generation, "supervisor stopped, served process exited"),
            Err(_) => warn!(
                generation,
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "served process not reaped within shutdown grace"
            ),
        }
    }
}
