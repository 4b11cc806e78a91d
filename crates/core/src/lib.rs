//! post-review core library.
//!
//! This crate provides the pieces needed to turn a pending change into a
//! unified diff a review server accepts: configuration, a client for the
//! DTR WebDAV protocol, the diff synthesizer, and adapters for the
//! command-line source control tools.

pub mod config;
pub mod diff;
pub mod dtr;
pub mod errors;
pub mod exec;
pub mod scm;

// Re-exports for convenience.
pub use config::AppConfig;
pub use diff::Synthesizer;
pub use dtr::DtrClient;
pub use errors::CoreError;
pub use scm::{ChangeSummary, DiffResult, RepositoryInfo, ScmClient};
