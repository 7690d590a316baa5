// sitewatch-common: shared types and pure helpers for the sitewatch workspace

pub mod duration;
pub mod status;
pub mod types;

pub use types::{RepositoryEvent, StatusReport, SupervisorCommand, SyncState};
