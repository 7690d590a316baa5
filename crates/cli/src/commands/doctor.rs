// `sitewatch doctor`: check that everything `sitewatch run` needs is in place.

use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::Command;

use clap::Args;
use serde::Serialize;
use sitewatch_daemon::config::Config;
use sitewatch_daemon::git::GitRepositoryClient;

use crate::exit_code::ExitCode;
use crate::output::{self, OutputFormat};

const ANSI_GREEN: &str = "\x1b[32m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_RED: &str = "\x1b[31m";
const ANSI_RESET: &str = "\x1b[0m";

#[derive(Debug, Args)]
pub struct DoctorArgs {
    /// Config file (default: ~/.sitewatch/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Checkout to inspect instead of the configured one.
    #[arg(long)]
    workdir: Option<PathBuf>,
    /// Server program to look for instead of the configured one.
    #[arg(long)]
    program: Option<String>,
    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DoctorStatus {
    Pass,
    Warning,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    name: String,
    status: DoctorStatus,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl DoctorCheck {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: DoctorStatus::Pass,
            detail: detail.into(),
            hint: None,
        }
    }

    fn warning(name: &str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: DoctorStatus::Warning,
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }

    fn fail(name: &str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: DoctorStatus::Fail,
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }
}

pub fn run(args: DoctorArgs) -> anyhow::Result<ExitCode> {
    let format = OutputFormat::detect(args.json);
    let checks = collect_checks(&args);

    output::print_output(format, &checks, |items| format_human(items))?;
    if checks.iter().any(|check| check.status == DoctorStatus::Fail) {
        anyhow::bail!("doctor checks failed");
    }
    Ok(ExitCode::Success)
}

fn collect_checks(args: &DoctorArgs) -> Vec<DoctorCheck> {
    let (config_check, mut config) = check_config(args.config.as_deref());
    if let Some(workdir) = &args.workdir {
        config.watch.workdir = workdir.clone();
    }
    if let Some(program) = &args.program {
        config.server.program = program.clone();
    }

    let mut checks = vec![config_check];
    let git_check = check_git();
    let git_ok = git_check.status == DoctorStatus::Pass;
    checks.push(git_check);

    if git_ok {
        let checkout_check = check_checkout(&config.watch.workdir);
        let checkout_ok = checkout_check.status == DoctorStatus::Pass;
        checks.push(checkout_check);
        if checkout_ok {
            checks.push(check_upstream(&config.watch.workdir));
        }
    }

    checks.push(check_server_program(&config.server.program));
    checks.push(check_logging(&config));
    checks
}

/// Parse and validate the config; on failure the defaults stand in so the
/// remaining checks still run.
fn check_config(explicit: Option<&Path>) -> (DoctorCheck, Config) {
    let source = match explicit {
        Some(path) => format!("`{}`", path.display()),
        None => "the default location".to_string(),
    };

    let config = match Config::load(explicit) {
        Ok(config) => config,
        Err(error) => {
            let check = DoctorCheck::fail(
                "config",
                format!("failed to load config from {source}: {error}"),
                "Fix the TOML file or pass --config",
            );
            return (check, Config::default());
        }
    };

    let check = match config.validate() {
        Ok(()) => DoctorCheck::pass("config", format!("config from {source} is valid")),
        Err(error) => DoctorCheck::fail(
            "config",
            format!("config from {source} is invalid: {error}"),
            "Correct the named field and rerun doctor",
        ),
    };
    (check, config)
}

fn check_git() -> DoctorCheck {
    match Command::new("git").arg("--version").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            DoctorCheck::pass("git", version)
        }
        Ok(output) => DoctorCheck::fail(
            "git",
            format!("git --version exited with {}", output.status),
            "Install Git and ensure it is in PATH",
        ),
        Err(error) => DoctorCheck::fail(
            "git",
            format!("failed to execute git: {error}"),
            "Install Git and ensure it is in PATH",
        ),
    }
}

fn check_checkout(workdir: &Path) -> DoctorCheck {
    if !workdir.is_dir() {
        return DoctorCheck::fail(
            "checkout",
            format!("`{}` is not a directory", workdir.display()),
            "Point watch.workdir (or --workdir) at a clone of the site",
        );
    }

    let inside = Command::new("git")
        .arg("-C")
        .arg(workdir)
        .args(["rev-parse", "--is-inside-work-tree"])
        .output();
    match inside {
        Ok(output) if output.status.success() => {
            DoctorCheck::pass("checkout", format!("`{}` is a git work tree", workdir.display()))
        }
        _ => DoctorCheck::fail(
            "checkout",
            format!("`{}` is not a git repository", workdir.display()),
            "Clone the site repository into this directory",
        ),
    }
}

fn check_upstream(workdir: &Path) -> DoctorCheck {
    match GitRepositoryClient::new(workdir).upstream() {
        Ok(upstream) => {
            DoctorCheck::pass("upstream", format!("current branch tracks `{upstream}`"))
        }
        Err(error) => DoctorCheck::fail(
            "upstream",
            format!("no upstream configured: {error}"),
            "Run: git branch --set-upstream-to=origin/<branch>",
        ),
    }
}

fn check_server_program(program: &str) -> DoctorCheck {
    let resolved = if program.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(program);
        is_executable(&path).then_some(path)
    } else {
        find_binary_in_path(program)
    };

    match resolved {
        Some(path) => {
            DoctorCheck::pass("server", format!("found `{program}` at `{}`", path.display()))
        }
        None => DoctorCheck::fail(
            "server",
            format!("`{program}` is not an executable on PATH"),
            "Install the server or set server.program to its full path",
        ),
    }
}

fn check_logging(config: &Config) -> DoctorCheck {
    if !config.log.enabled {
        return DoctorCheck::warning(
            "logging",
            "logging is disabled",
            "Set log.enabled = true to see reload and failure events",
        );
    }
    let target = match &config.log.file {
        Some(path) => format!("`{}`", path.display()),
        None => "stdout".to_string(),
    };
    DoctorCheck::pass(
        "logging",
        format!("{} logs at `{}` to {target}", config.log.format, config.log.level),
    )
}

fn find_binary_in_path(binary_name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(binary_name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|metadata| metadata.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

fn format_human(checks: &[DoctorCheck]) -> String {
    let use_color = std::io::stdout().is_terminal();
    let mut lines = Vec::new();

    for check in checks {
        let (symbol, color) = match check.status {
            DoctorStatus::Pass => ("✓", ANSI_GREEN),
            DoctorStatus::Warning => ("⚠", ANSI_YELLOW),
            DoctorStatus::Fail => ("✗", ANSI_RED),
        };
        let rendered_symbol =
            if use_color { format!("{color}{symbol}{ANSI_RESET}") } else { symbol.to_string() };
        lines.push(format!("{rendered_symbol} {}: {}", check.name, check.detail));
        if let Some(hint) = &check.hint {
            lines.push(format!("  hint: {hint}"));
        }
    }

    let count = |status| checks.iter().filter(|check| check.status == status).count();
    lines.push(String::new());
    lines.push(format!(
        "Summary: {} passed, {} warning(s), {} failed",
        count(DoctorStatus::Pass),
        count(DoctorStatus::Warning),
        count(DoctorStatus::Fail)
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_human_includes_summary_and_hints() {
        let checks = vec![
            DoctorCheck::pass("git", "git version 2.43.0"),
            DoctorCheck::warning("logging", "logging is disabled", "enable logging"),
            DoctorCheck::fail("checkout", "not a repository", "clone the site"),
        ];
        let rendered = format_human(&checks);
        assert!(rendered.contains("Summary: 1 passed, 1 warning(s), 1 failed"));
        assert!(rendered.contains("hint: clone the site"));
    }

    #[test]
    fn unparsable_config_fails_and_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[watch\n").unwrap();

        let (check, config) = check_config(Some(&path));
        assert_eq!(check.status, DoctorStatus::Fail);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn invalid_config_fails_with_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[watch]\ninterval = \"0s\"\n").unwrap();

        let (check, _) = check_config(Some(&path));
        assert_eq!(check.status, DoctorStatus::Fail);
        assert!(check.detail.contains("watch.interval"), "{}", check.detail);
    }

    #[test]
    fn missing_checkout_fails() {
        let dir = tempfile::tempdir().unwrap();
        let check = check_checkout(&dir.path().join("absent"));
        assert_eq!(check.status, DoctorStatus::Fail);
        assert!(check.detail.contains("not a directory"));
    }

    #[cfg(unix)]
    #[test]
    fn server_program_by_path_must_be_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("serve");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        let program = script.to_str().unwrap();

        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(check_server_program(program).status, DoctorStatus::Fail);

        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(check_server_program(program).status, DoctorStatus::Pass);
    }

    #[test]
    fn unknown_server_program_fails() {
        let check = check_server_program("sitewatch-no-such-server-binary");
        assert_eq!(check.status, DoctorStatus::Fail);
    }

    #[test]
    fn disabled_logging_is_a_warning() {
        let mut config = Config::default();
        config.log.enabled = false;
        assert_eq!(check_logging(&config).status, DoctorStatus::Warning);

        config.log.enabled = true;
        assert_eq!(check_logging(&config).status, DoctorStatus::Pass);
    }
}
