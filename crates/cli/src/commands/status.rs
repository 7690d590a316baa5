// `sitewatch status`: classify the checkout against its upstream.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde::Serialize;
use sitewatch_common::{StatusReport, SyncState};
use sitewatch_daemon::git::{GitRepositoryClient, RepositoryClient};

use crate::exit_code::ExitCode;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Repository checkout to inspect.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,
    /// Run `git fetch` first so the remote state is current.
    #[arg(long)]
    fetch: bool,
    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize)]
struct StatusOutput {
    workdir: String,
    fetched: bool,
    #[serde(flatten)]
    report: StatusReport,
}

pub fn run(args: StatusArgs) -> anyhow::Result<ExitCode> {
    let format = OutputFormat::detect(args.json);
    let client = GitRepositoryClient::new(&args.workdir);

    if args.fetch {
        client.fetch().context("git fetch failed")?;
    }
    let report = client
        .status()
        .with_context(|| format!("could not classify `{}`", args.workdir.display()))?;

    let result = StatusOutput {
        workdir: args.workdir.display().to_string(),
        fetched: args.fetch,
        report,
    };
    output::print_output(format, &result, format_human)?;
    Ok(ExitCode::Success)
}

fn format_human(result: &StatusOutput) -> String {
    let report = &result.report;
    let branch = match &report.local_branch {
        Some(branch) => format!("branch `{branch}`"),
        None => "detached HEAD".to_string(),
    };
    let mut lines =
        vec![format!("{branch} is {} `{}`", relation(report.sync_state), report.remote_ref)];

    match report.sync_state {
        SyncState::UpToDate => {}
        SyncState::Behind => {
            lines.push("  the watcher will merge and reload on its next poll".into())
        }
        SyncState::Ahead => lines.push(
            "  local commits found; the watcher treats this as fatal, reset to the remote first"
                .into(),
        ),
    }
    if !result.fetched {
        lines.push("  (remote refs not fetched; pass --fetch for a current view)".into());
    }
    lines.join("\n")
}

fn relation(state: SyncState) -> &'static str {
    match state {
        SyncState::UpToDate => "up to date with",
        SyncState::Behind => "behind",
        SyncState::Ahead => "ahead of",
    }
}
