//! Source-control backends.
//!
//! Every backend implements [`ScmClient`]: it describes the repository it
//! works against and turns a change identifier (an activity name, a change
//! number, a list of files) into a unified diff. The configured backend is
//! picked by [`from_config`]; nothing here inspects the working directory to
//! guess it.

pub mod cvs;
pub mod dtr;
pub mod git;
pub mod mercurial;
pub mod perforce;
pub mod svn;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::config::{AppConfig, Backend};
use crate::diff::Synthesizer;
use crate::dtr::DtrClient;
use crate::errors::{CoreError, ScmError};

/// Branch label for a change that names no branch.
pub const NO_BRANCH: &str = "(none)";

/// Where a backend's changes live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryInfo {
    pub path: String,
    pub base_path: Option<String>,
    pub supports_changesets: bool,
    pub supports_parent_diffs: bool,
}

impl RepositoryInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the base path, forcing a leading slash.
    pub fn set_base_path(&mut self, base_path: &str) {
        let base_path = if base_path.starts_with('/') {
            base_path.to_string()
        } else {
            format!("/{}", base_path)
        };
        self.base_path = Some(base_path);
    }
}

impl std::fmt::Display for RepositoryInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Path: {}, Base path: {}, Supports changesets: {}",
            self.path,
            self.base_path.as_deref().unwrap_or("-"),
            self.supports_changesets
        )
    }
}

/// A generated diff, the diff of its parent branch where the backend has
/// one, and a branch label where the backend can name one.
///
/// Diffs are raw bytes: file content passes through in whatever encoding
/// the files use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub diff: Vec<u8>,
    pub parent_diff: Option<Vec<u8>>,
    pub branch: Option<String>,
}

/// A change the current user could submit for review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub id: String,
    pub description: String,
    pub branch: Option<String>,
}

#[async_trait]
pub trait ScmClient: Send + Sync {
    /// Short backend name, as used in configuration.
    fn name(&self) -> &'static str;

    /// Describe the repository, or `None` when the backend finds none.
    async fn repository_info(&self) -> Result<Option<RepositoryInfo>, CoreError>;

    async fn diff(&self, args: &[String]) -> Result<DiffResult, CoreError>;

    /// Diff between two revisions written `a:b`.
    async fn diff_between_revisions(
        &self,
        _revision_range: &str,
        _args: &[String],
    ) -> Result<Vec<u8>, CoreError> {
        Err(ScmError::Unsupported {
            backend: self.name(),
            operation: "revision range diffs",
        }
        .into())
    }

    async fn get_open_changes(
        &self,
        _include_submitted: bool,
    ) -> Result<Vec<ChangeSummary>, CoreError> {
        Ok(Vec::new())
    }
}

/// Build the backend named in the configuration.
pub fn from_config(config: &AppConfig) -> Box<dyn ScmClient> {
    let backend = config.scm.backend;
    info!(%backend, "selected scm backend");
    match backend {
        Backend::Dtr => Box::new(dtr::DtrScm::new(
            DtrClient::from_config(&config.dtr),
            Synthesizer::from_config(config),
            config.scm.effective_user(),
            config.scm.max_activity_age_days,
        )),
        Backend::Perforce => Box::new(perforce::PerforceScm::new(
            config.perforce.client.clone(),
            config.perforce.port.clone(),
            config.scm.effective_user(),
            config.scm.max_changes,
            Synthesizer::from_config(config),
        )),
        Backend::Svn => Box::new(svn::SvnScm::new(config.svn.repository_url.clone())),
        Backend::Cvs => Box::new(cvs::CvsScm::new()),
        Backend::Mercurial => Box::new(mercurial::MercurialScm::new()),
        Backend::Git => Box::new(git::GitScm::new(config.git.parent_branch.clone())),
    }
}
