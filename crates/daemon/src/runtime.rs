// Coordinator: wires watcher events to supervisor commands and owns the
// single exit decision for the process.

use std::sync::Arc;
use std::time::Duration;

use sitewatch_common::{RepositoryEvent, SupervisorCommand};
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::Config;
use crate::fatal::{fatal_channel, FatalError, FatalReport, FatalSender};
use crate::git::watcher::WATCHER;
use crate::git::{GitRepositoryClient, RepositoryClient, RepositoryWatcher};
use crate::process::{CommandLauncher, ProcessLauncher, ProcessSupervisor, ServeTarget, SUPERVISOR};
use crate::shutdown::{Shutdown, ShutdownToken};
use crate::worker::{WorkerError, WorkerHandle};

pub const COORDINATOR: &str = "coordinator";
const BRIDGE: &str = "bridge";

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
pub const COMMAND_CHANNEL_CAPACITY: usize = 1024;
const SIGNAL_CHANNEL_CAPACITY: usize = 8;

/// OS signals the coordinator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Interrupt,
    Terminate,
    /// Reserved for a future reload; currently ignored.
    Hangup,
}

/// Why the coordinator stopped.
#[derive(Debug)]
pub enum ExitReason {
    Fatal { worker: &'static str, error: FatalError },
    CleanExit { worker: &'static str },
    Signal(ProcessSignal),
}

impl ExitReason {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Fatal { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub interval: Duration,
    pub target: ServeTarget,
    pub shutdown_grace: Duration,
}

impl From<&Config> for CoordinatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.watch.interval,
            target: config.serve_target(),
            shutdown_grace: config.server.shutdown_grace,
        }
    }
}

pub struct Coordinator<C, L> {
    watcher: RepositoryWatcher<C>,
    supervisor: ProcessSupervisor<L>,
    fatal_tx: FatalSender,
    fatal_rx: mpsc::Receiver<FatalReport>,
    shutdown: Shutdown,
    span: Span,
}

impl Coordinator<GitRepositoryClient, CommandLauncher> {
    /// Coordinator backed by `git` in the configured workdir and the
    /// configured server program.
    pub fn from_config(config: &Config, span: Span) -> Self {
        let client = Arc::new(GitRepositoryClient::new(config.watch.workdir.clone()));
        let launcher = Arc::new(config.launcher());
        Self::new(client, launcher, CoordinatorSettings::from(config), span)
    }
}

impl<C: RepositoryClient, L: ProcessLauncher> Coordinator<C, L> {
    pub fn new(client: Arc<C>, launcher: Arc<L>, settings: CoordinatorSettings, span: Span) -> Self {
        let (fatal_tx, fatal_rx) = fatal_channel();
        let watcher = RepositoryWatcher::new(
            client,
            settings.interval,
            fatal_tx.clone(),
            info_span!(parent: &span, "worker", worker = WATCHER),
        );
        let supervisor = ProcessSupervisor::new(
            launcher,
            settings.target,
            settings.shutdown_grace,
            fatal_tx.clone(),
            info_span!(parent: &span, "worker", worker = SUPERVISOR),
        );
        Self { watcher, supervisor, fatal_tx, fatal_rx, shutdown: Shutdown::new(), span }
    }

    /// Sender for reports from outside the two workers, e.g. a clean exit
    /// request.
    pub fn fatal_sender(&self) -> FatalSender {
        self.fatal_tx.clone()
    }

    /// Start both workers, wait for the exit trigger, then cancel and join
    /// everything. Returns an error only if startup failed.
    pub async fn run(
        self,
        signals: mpsc::Receiver<ProcessSignal>,
    ) -> Result<ExitReason, WorkerError> {
        let span = self.span.clone();
        self.run_inner(signals).instrument(span).await
    }

    async fn run_inner(
        self,
        mut signals: mpsc::Receiver<ProcessSignal>,
    ) -> Result<ExitReason, WorkerError> {
        let Self { watcher, supervisor, fatal_tx, mut fatal_rx, shutdown, span: _ } = self;
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let supervisor_handle = supervisor.start(shutdown.token(), command_rx)?;
        let watcher_handle = match watcher.start(shutdown.token(), event_tx) {
            Ok(handle) => handle,
            Err(start_error) => {
                error!(error = %start_error, "repository watcher failed to start");
                shutdown.cancel();
                if let Err(stop_error) = supervisor.stop() {
                    warn!(error = %stop_error, "supervisor stop failed");
                }
                supervisor_handle.join().await;
                return Err(start_error);
            }
        };
        let bridge_handle = WorkerHandle::new(
            BRIDGE,
            tokio::spawn(bridge_events(event_rx, command_tx, shutdown.token()).in_current_span()),
        );
        drop(fatal_tx);
        info!("coordinator running");

        let reason = wait_for_exit(&mut fatal_rx, &mut signals).await;
        match &reason {
            ExitReason::Fatal { worker, error } => {
                error!(failed_worker = worker, error = %error, "fatal error, shutting down")
            }
            ExitReason::CleanExit { worker } => {
                info!(requested_by = worker, "clean exit requested, shutting down")
            }
            ExitReason::Signal(signal) => info!(?signal, "signal received, shutting down"),
        }

        shutdown.cancel();
        if let Err(stop_error) = watcher.stop() {
            warn!(error = %stop_error, "repository watcher stop failed");
        }
        if let Err(stop_error) = supervisor.stop() {
            warn!(error = %stop_error, "supervisor stop failed");
        }

        watcher_handle.join().await;
        bridge_handle.join().await;
        supervisor_handle.join().await;
        info!("all workers finished");

        Ok(reason)
    }
}

async fn wait_for_exit(
    fatal_rx: &mut mpsc::Receiver<FatalReport>,
    signals: &mut mpsc::Receiver<ProcessSignal>,
) -> ExitReason {
    let mut signals_open = true;
    loop {
        tokio::select! {
            report = fatal_rx.recv() => {
                return match report {
                    Some(FatalReport { worker, error: Some(error) }) => ExitReason::Fatal { worker, error },
                    Some(FatalReport { worker, error: None }) => ExitReason::CleanExit { worker },
                    // Every sender is gone, nothing can fail any more.
                    None => ExitReason::CleanExit { worker: COORDINATOR },
                };
            }
            signal = signals.recv(), if signals_open => match signal {
                Some(ProcessSignal::Hangup) => debug!("hangup received, ignoring"),
                Some(signal) => return ExitReason::Signal(signal),
                None => {
                    debug!("signal source closed");
                    signals_open = false;
                }
            },
        }
    }
}

/// Turn every repository event into exactly one supervisor command until
/// cancelled or either side goes away.
pub async fn bridge_events(
    mut events: mpsc::Receiver<RepositoryEvent>,
    commands: mpsc::Sender<SupervisorCommand>,
    shutdown: ShutdownToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let command = SupervisorCommand::from(event);
        let sent = tokio::select! {
            _ = shutdown.cancelled() => break,
            sent = commands.send(command) => sent,
        };
        if sent.is_err() {
            debug!("supervisor no longer accepts commands");
            break;
        }
        debug!(event = event.kind(), command = command.kind(), "event bridged");
    }
}

/// Forward SIGINT, SIGTERM and SIGHUP (Ctrl+C only off unix) into a channel
/// the coordinator can select on. Must be called inside a Tokio runtime.
pub fn forward_os_signals() -> std::io::Result<mpsc::Receiver<ProcessSignal>> {
    let (tx, rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    Some(()) = interrupt.recv() => ProcessSignal::Interrupt,
                    Some(()) = terminate.recv() => ProcessSignal::Terminate,
                    Some(()) = hangup.recv() => ProcessSignal::Hangup,
                    else => break,
                };
                if tx.send(received).await.is_err() {
                    break;
                }
            }
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(ProcessSignal::Interrupt).await.is_err() {
                    break;
                }
            }
        });
    }

    Ok(rx)
}
