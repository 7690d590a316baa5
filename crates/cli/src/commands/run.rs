// `sitewatch run`: supervise the documentation server until a signal or a
// fatal error.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use sitewatch_common::duration::{format_duration, parse_duration};
use sitewatch_daemon::config::{Config, ConfigError, LogFormat, LogLevel};
use sitewatch_daemon::runtime::forward_os_signals;
use sitewatch_daemon::{Coordinator, ExitReason};
use tracing::{info, info_span};

use crate::exit_code::ExitCode;
use crate::telemetry;

/// Blocking tasks still running after the coordinator returns get this long
/// before the runtime stops waiting for them.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Time between repository polls, e.g. `30s` or `1m30s`.
    #[arg(long, value_parser = parse_duration)]
    interval: Option<Duration>,
    /// Repository checkout to watch and serve.
    #[arg(long)]
    workdir: Option<PathBuf>,
    /// Listen address passed to the server program.
    #[arg(long)]
    addr: Option<String>,
    /// Server program to launch.
    #[arg(long)]
    program: Option<String>,
    /// Config file (default: ~/.sitewatch/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Discard all log output.
    #[arg(long)]
    no_logger: bool,
    /// Append logs to this file instead of stdout.
    #[arg(long)]
    logfile: Option<PathBuf>,
    /// disabled, error, warn, info, debug or trace.
    #[arg(long)]
    log_level: Option<LogLevel>,
    /// json or text.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

pub fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let config = resolve_config(&args).context("invalid configuration")?;
    telemetry::initialise(&config.log).context("failed to initialise logging")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;
    let outcome = runtime.block_on(serve(config));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    let reason = outcome?;
    Ok(ExitCode::from_exit_reason(&reason))
}

async fn serve(config: Config) -> anyhow::Result<ExitReason> {
    let signals = forward_os_signals().context("failed to install signal handlers")?;
    let span = info_span!("sitewatch", workdir = %config.watch.workdir.display());
    span.in_scope(|| {
        info!(
            interval = %format_duration(config.watch.interval),
            addr = %config.server.addr,
            program = %config.server.program,
            "starting"
        )
    });

    Coordinator::from_config(&config, span)
        .run(signals)
        .await
        .context("startup failed")
}

/// File (or defaults), then flags, then validation.
fn resolve_config(args: &RunArgs) -> Result<Config, ConfigError> {
    let mut config = Config::load(args.config.as_deref())?;
    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if let Some(interval) = args.interval {
        config.watch.interval = interval;
    }
    if let Some(workdir) = &args.workdir {
        config.watch.workdir = workdir.clone();
    }
    if let Some(addr) = &args.addr {
        config.server.addr = addr.clone();
    }
    if let Some(program) = &args.program {
        config.server.program = program.clone();
    }
    if args.no_logger {
        config.log.enabled = false;
    }
    if let Some(logfile) = &args.logfile {
        config.log.file = Some(logfile.clone());
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    if let Some(format) = args.log_format {
        config.log.format = format;
    }
}
