// Core domain types shared by the watcher, the supervisor and the CLI.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Relationship between the local branch and its remote tracking branch
/// after a fetch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    UpToDate,
    Behind,
    Ahead,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpToDate => "up-to-date",
            Self::Behind => "behind",
            Self::Ahead => "ahead",
        }
    }
}

impl Display for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed result of one repository status query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    /// Checked-out branch, `None` on a detached HEAD.
    pub local_branch: Option<String>,
    /// Remote tracking ref the state is relative to, e.g. `origin/main`.
    pub remote_ref: String,
    pub sync_state: SyncState,
}

/// Event emitted by the repository watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryEvent {
    /// A behind-state was resolved by a successful merge.
    Update,
}

impl RepositoryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Update => "update",
        }
    }
}

/// Command consumed by the process supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorCommand {
    /// Terminate the current generation and launch a new one.
    Reload,
}

impl SupervisorCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reload => "reload",
        }
    }
}

impl From<RepositoryEvent> for SupervisorCommand {
    fn from(event: RepositoryEvent) -> Self {
        match event {
            RepositoryEvent::Update => Self::Reload,
        }
    }
}
