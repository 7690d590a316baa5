// Git sync: repository client and the polling watcher built on it.

pub mod client;
pub mod watcher;

pub use client::{GitRepositoryClient, RepositoryClient, RepositoryError};
pub use watcher::{RepositoryWatcher, TickOutcome};
