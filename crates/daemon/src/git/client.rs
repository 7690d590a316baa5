use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sitewatch_common::status::{parse_status, StatusParseError};
use sitewatch_common::StatusReport;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("failed to run `{command}`: {message}")]
    SpawnFailed { command: String, message: String },
    #[error("`{command}` failed with code {code:?}: {}", .stderr.trim())]
    CommandFailed { command: String, code: Option<i32>, stderr: String },
    #[error("could not classify `git status` output: {0}")]
    Status(#[from] StatusParseError),
    #[error("repository operation did not complete: {0}")]
    Interrupted(String),
}

/// Synchronous operations against the tracked repository.
pub trait RepositoryClient: Send + Sync + 'static {
    fn fetch(&self) -> Result<(), RepositoryError>;
    fn status(&self) -> Result<StatusReport, RepositoryError>;
    fn merge(&self, remote_ref: &str) -> Result<(), RepositoryError>;

    /// Abort in-flight fetch and status calls and refuse new ones. Called once
    /// shutdown has begun; a merge already running is left to finish.
    fn cancel(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<CommandResult, std::io::Error>;

    /// Like `execute`, but the command is killed and reaped once `cancelled`
    /// is set, returning an `Interrupted` error.
    fn execute_cancellable(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        cancelled: &AtomicBool,
    ) -> Result<CommandResult, std::io::Error> {
        if cancelled.load(Ordering::SeqCst) {
            return Err(interrupted());
        }
        self.execute(program, args, cwd)
    }
}

/// How often a running child is checked for exit or cancellation.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs commands as child processes with a fixed C locale, so status output
/// stays parseable, and with terminal prompts disabled, so a missing
/// credential fails the command instead of hanging it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessCommandExecutor;

impl ProcessCommandExecutor {
    fn spawn(program: &str, args: &[String], cwd: &Path) -> io::Result<Child> {
        Command::new(program)
            .args(args)
            .current_dir(cwd)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

impl CommandExecutor for ProcessCommandExecutor {
    fn execute(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<CommandResult, std::io::Error> {
        let output = Self::spawn(program, args, cwd)?.wait_with_output()?;
        Ok(CommandResult {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn execute_cancellable(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        cancelled: &AtomicBool,
    ) -> Result<CommandResult, std::io::Error> {
        if cancelled.load(Ordering::SeqCst) {
            return Err(interrupted());
        }
        let mut child = Self::spawn(program, args, cwd)?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if cancelled.load(Ordering::SeqCst) {
                // Killed children are always reaped; the drain threads end
                // when the pipes close.
                let _ = child.kill();
                child.wait()?;
                return Err(interrupted());
            }
            thread::sleep(CHILD_POLL_INTERVAL);
        };

        Ok(CommandResult {
            success: status.success(),
            code: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }
}

fn interrupted() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "cancelled by shutdown")
}

/// Read a child pipe to the end on its own thread so a chatty command
/// never blocks on a full pipe while it is being polled.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(reader: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    let bytes = reader.and_then(|handle| handle.join().ok()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// `RepositoryClient` backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitRepositoryClient<E = ProcessCommandExecutor> {
    repo_path: PathBuf,
    executor: E,
    cancelled: Arc<AtomicBool>,
}

impl GitRepositoryClient<ProcessCommandExecutor> {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self::with_executor(repo_path, ProcessCommandExecutor)
    }
}

impl<E: CommandExecutor> GitRepositoryClient<E> {
    pub fn with_executor(repo_path: impl Into<PathBuf>, executor: E) -> Self {
        Self { repo_path: repo_path.into(), executor, cancelled: Arc::default() }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Raw `git status` output, unparsed.
    pub fn raw_status(&self) -> Result<String, RepositoryError> {
        self.run_cancellable(vec!["status".to_string()])
    }

    /// Path of the upstream ref for the current branch, e.g. `origin/main`.
    pub fn upstream(&self) -> Result<String, RepositoryError> {
        self.run(vec![
            "rev-parse".to_string(),
            "--abbrev-ref".to_string(),
            "--symbolic-full-name".to_string(),
            "@{u}".to_string(),
        ])
        .map(|stdout| stdout.trim().to_string())
    }

    fn run(&self, args: Vec<String>) -> Result<String, RepositoryError> {
        let result = self.executor.execute("git", &args, &self.repo_path);
        Self::finish(args, result)
    }

    fn run_cancellable(&self, args: Vec<String>) -> Result<String, RepositoryError> {
        let result =
            self.executor.execute_cancellable("git", &args, &self.repo_path, &self.cancelled);
        Self::finish(args, result)
    }

    fn finish(
        args: Vec<String>,
        result: Result<CommandResult, std::io::Error>,
    ) -> Result<String, RepositoryError> {
        let command = format!("git {}", args.join(" "));
        let result = result.map_err(|error| match error.kind() {
            io::ErrorKind::Interrupted => {
                RepositoryError::Interrupted(format!("`{command}` {error}"))
            }
            _ => RepositoryError::SpawnFailed {
                command: command.clone(),
                message: error.to_string(),
            },
        })?;

        if result.success {
            return Ok(result.stdout);
        }

        let stderr = if result.stderr.trim().is_empty() { result.stdout } else { result.stderr };

        Err(RepositoryError::CommandFailed { command, code: result.code, stderr })
    }
}

impl<E: CommandExecutor + 'static> RepositoryClient for GitRepositoryClient<E> {
    fn fetch(&self) -> Result<(), RepositoryError> {
        self.run_cancellable(vec!["fetch".to_string()]).map(|_| ())
    }

    fn status(&self) -> Result<StatusReport, RepositoryError> {
        let raw = self.raw_status()?;
        Ok(parse_status(&raw)?)
    }

    fn merge(&self, remote_ref: &str) -> Result<(), RepositoryError> {
        self.run(vec!["merge".to_string(), remote_ref.to_string()]).map(|_| ())
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitewatch_common::SyncState;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Invocation {
        program: String,
        args: Vec<String>,
        cwd: PathBuf,
    }

    #[derive(Clone)]
    struct MockExecutor {
        calls: Arc<Mutex<Vec<Invocation>>>,
        responses: Arc<Mutex<VecDeque<Result<CommandResult, std::io::Error>>>>,
    }

    impl MockExecutor {
        fn new(responses: Vec<Result<CommandResult, std::io::Error>>) -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            }
        }

        fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().expect("mock calls lock poisoned").clone()
        }
    }

    impl CommandExecutor for MockExecutor {
        fn execute(
            &self,
            program: &str,
            args: &[String],
            cwd: &Path,
        ) -> Result<CommandResult, std::io::Error> {
            self.calls.lock().expect("mock calls lock poisoned").push(Invocation {
                program: program.to_string(),
                args: args.to_vec(),
                cwd: cwd.to_path_buf(),
            });

            self.responses
                .lock()
                .expect("mock responses lock poisoned")
                .pop_front()
                .expect("missing mock response")
        }
    }

    fn ok(stdout: &str) -> Result<CommandResult, std::io::Error> {
        Ok(CommandResult {
            success: true,
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    #[test]
    fn fetch_runs_git_fetch_in_repo() {
        let mock = MockExecutor::new(vec![ok("")]);
        let client = GitRepositoryClient::with_executor("/srv/docs", mock.clone());

        client.fetch().expect("fetch should succeed");

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "git");
        assert_eq!(calls[0].args, vec!["fetch"]);
        assert_eq!(calls[0].cwd, PathBuf::from("/srv/docs"));
    }

    #[test]
    fn status_parses_behind_output() {
        let mock = MockExecutor::new(vec![ok(
            "On branch main\nYour branch is behind 'origin/main' by 2 commits, and can be fast-forwarded.\n",
        )]);
        let client = GitRepositoryClient::with_executor("/srv/docs", mock.clone());

        let report = client.status().expect("status should parse");
        assert_eq!(report.sync_state, SyncState::Behind);
        assert_eq!(report.remote_ref, "origin/main");
        assert_eq!(report.local_branch.as_deref(), Some("main"));
        assert_eq!(mock.calls()[0].args, vec!["status"]);
    }

    #[test]
    fn status_surfaces_unclassifiable_output() {
        let mock = MockExecutor::new(vec![ok("On branch main\nnothing to commit\n")]);
        let client = GitRepositoryClient::with_executor("/srv/docs", mock);

        let error = client.status().expect_err("status without upstream should fail");
        assert!(matches!(error, RepositoryError::Status(StatusParseError::NoUpstream { .. })));
    }

    #[test]
    fn merge_passes_remote_ref_as_single_argument() {
        let mock = MockExecutor::new(vec![ok("Fast-forward\n")]);
        let client = GitRepositoryClient::with_executor("/srv/docs", mock.clone());

        client.merge("origin/main").expect("merge should succeed");
        assert_eq!(mock.calls()[0].args, vec!["merge", "origin/main"]);
    }

    #[test]
    fn merge_failure_carries_command_and_stderr() {
        let mock = MockExecutor::new(vec![Ok(CommandResult {
            success: false,
            code: Some(128),
            stdout: String::new(),
            stderr: "fatal: refusing to merge unrelated histories\n".to_string(),
        })]);
        let client = GitRepositoryClient::with_executor("/srv/docs", mock);

        let error = client.merge("origin/main").expect_err("merge should fail");
        assert_eq!(
            error,
            RepositoryError::CommandFailed {
                command: "git merge origin/main".to_string(),
                code: Some(128),
                stderr: "fatal: refusing to merge unrelated histories\n".to_string(),
            }
        );
        assert!(error.to_string().ends_with("refusing to merge unrelated histories"));
    }

    #[test]
    fn failure_falls_back_to_stdout_when_stderr_is_empty() {
        let mock = MockExecutor::new(vec![Ok(CommandResult {
            success: false,
            code: Some(1),
            stdout: "CONFLICT (content): Merge conflict in index.md\n".to_string(),
            stderr: "  \n".to_string(),
        })]);
        let client = GitRepositoryClient::with_executor("/srv/docs", mock);

        match client.merge("origin/main") {
            Err(RepositoryError::CommandFailed { stderr, .. }) => {
                assert!(stderr.contains("Merge conflict"));
            }
            other => panic!("expected command failure, got {other:?}"),
        }
    }

    #[test]
    fn spawn_failure_is_reported() {
        let mock = MockExecutor::new(vec![Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "git not found",
        ))]);
        let client = GitRepositoryClient::with_executor("/srv/docs", mock);

        let error = client.fetch().expect_err("fetch should fail");
        assert_eq!(
            error,
            RepositoryError::SpawnFailed {
                command: "git fetch".to_string(),
                message: "git not found".to_string(),
            }
        );
    }

    #[test]
    fn upstream_trims_rev_parse_output() {
        let mock = MockExecutor::new(vec![ok("origin/main\n")]);
        let client = GitRepositoryClient::with_executor("/srv/docs", mock.clone());

        assert_eq!(client.upstream().expect("upstream should resolve"), "origin/main");
        assert_eq!(
            mock.calls()[0].args,
            vec!["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"]
        );
    }

    #[test]
    fn cancelled_client_refuses_fetch_and_status_but_still_merges() {
        let mock = MockExecutor::new(vec![ok("Fast-forward\n")]);
        let client = GitRepositoryClient::with_executor("/srv/docs", mock.clone());
        client.cancel();

        assert!(matches!(client.fetch(), Err(RepositoryError::Interrupted(_))));
        assert!(matches!(client.status(), Err(RepositoryError::Interrupted(_))));
        assert!(mock.calls().is_empty());

        client.merge("origin/main").expect("merge is never cancelled");
        assert_eq!(mock.calls()[0].args, vec!["merge", "origin/main"]);
    }

    #[cfg(unix)]
    #[test]
    fn cancelling_kills_and_reaps_the_running_command() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let started = std::time::Instant::now();
        let runner = thread::spawn(move || {
            ProcessCommandExecutor.execute_cancellable(
                "sleep",
                &["30".to_string()],
                Path::new("/"),
                &flag,
            )
        });

        thread::sleep(Duration::from_millis(100));
        cancelled.store(true, Ordering::SeqCst);
        let error = runner.join().unwrap().expect_err("command should be interrupted");

        assert_eq!(error.kind(), io::ErrorKind::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn cancellable_command_captures_output_when_left_alone() {
        let cancelled = AtomicBool::new(false);
        let result = ProcessCommandExecutor
            .execute_cancellable(
                "sh",
                &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
                Path::new("/"),
                &cancelled,
            )
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.code, Some(3));
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
    }
}
