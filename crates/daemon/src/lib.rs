// sitewatch-daemon: keeps a documentation server running against a git
// checkout and restarts it whenever the checkout fast-forwards.

pub mod config;
pub mod fatal;
pub mod git;
pub mod process;
pub mod runtime;
pub mod shutdown;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use runtime::{Coordinator, CoordinatorSettings, ExitReason, ProcessSignal};
