// Consistent exit codes for the sitewatch CLI.
//
//   0  = success (including shutdown by signal or clean-exit request)
//   1  = general error (fatal worker error, startup failure)
//   2  = usage/configuration error

use std::process;

use sitewatch_daemon::config::ConfigError;
use sitewatch_daemon::ExitReason;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Short machine-readable label used in JSON error output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Success => "OK",
            Self::Error => "ERROR",
            Self::Usage => "INVALID_CONFIG",
        }
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        if err.chain().any(|cause| cause.downcast_ref::<ConfigError>().is_some()) {
            return Self::Usage;
        }
        Self::Error
    }

    pub fn from_exit_reason(reason: &ExitReason) -> Self {
        if reason.is_success() {
            Self::Success
        } else {
            Self::Error
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
