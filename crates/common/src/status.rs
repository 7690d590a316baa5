// Classification of `git status` output into a sync state.
//
// Expects the long format produced under `LC_ALL=C`. Only the branch header
// is inspected; working tree details are ignored.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::types::{StatusReport, SyncState};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusParseError {
    #[error("local branch and `{remote_ref}` have diverged")]
    Diverged { remote_ref: String },
    #[error("branch {} has no remote tracking branch", .local_branch.as_deref().unwrap_or("(detached HEAD)"))]
    NoUpstream { local_branch: Option<String> },
    #[error("no branch header in `git status` output: {excerpt:?}")]
    Unrecognised { excerpt: String },
}

/// Longest prefix of unrecognised output kept for the error message.
const EXCERPT_LEN: usize = 80;

struct Patterns {
    local_branch: Regex,
    up_to_date: Regex,
    behind: Regex,
    ahead: Regex,
    diverged: Regex,
    detached: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        local_branch: Regex::new(r"(?m)^On branch (\S+)\s*$")
            .expect("local branch pattern should compile"),
        up_to_date: Regex::new(r"Your branch is up[ -]to[ -]date with '([^']+)'")
            .expect("up-to-date pattern should compile"),
        behind: Regex::new(r"Your branch is behind '([^']+)'")
            .expect("behind pattern should compile"),
        ahead: Regex::new(r"Your branch is ahead of '([^']+)'")
            .expect("ahead pattern should compile"),
        diverged: Regex::new(r"Your branch and '([^']+)' have diverged")
            .expect("diverged pattern should compile"),
        detached: Regex::new(r"(?m)^HEAD detached (?:at|from) ")
            .expect("detached pattern should compile"),
    })
}

fn capture(pattern: &Regex, raw: &str) -> Option<String> {
    pattern.captures(raw).and_then(|caps| caps.get(1)).map(|m| m.as_str().to_string())
}

/// Parse the local branch name from `git status` output.
pub fn parse_local_branch(raw: &str) -> Option<String> {
    capture(&patterns().local_branch, raw)
}

/// Classify `git status` output.
///
/// When several headers match, up-to-date wins over behind, and behind over
/// ahead.
pub fn parse_status(raw: &str) -> Result<StatusReport, StatusParseError> {
    let p = patterns();
    let local_branch = parse_local_branch(raw);

    let classified = [
        (&p.up_to_date, SyncState::UpToDate),
        (&p.behind, SyncState::Behind),
        (&p.ahead, SyncState::Ahead),
    ]
    .into_iter()
    .find_map(|(pattern, state)| capture(pattern, raw).map(|remote_ref| (state, remote_ref)));

    if let Some((sync_state, remote_ref)) = classified {
        return Ok(StatusReport { local_branch, remote_ref, sync_state });
    }

    if let Some(remote_ref) = capture(&p.diverged, raw) {
        return Err(StatusParseError::Diverged { remote_ref });
    }

    if local_branch.is_some() || p.detached.is_match(raw) {
        return Err(StatusParseError::NoUpstream { local_branch });
    }

    let excerpt = raw.trim().chars().take(EXCERPT_LEN).collect();
    Err(StatusParseError::Unrecognised { excerpt })
}
