//! CVS backend.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{DiffResult, RepositoryInfo, ScmClient};
use crate::errors::CoreError;
use crate::exec::{self, ExecOptions};

/// Repository path from the contents of `CVS/Root`, without the user part.
pub fn parse_cvs_root(contents: &str) -> String {
    let root = contents.trim();
    match root.find('@') {
        Some(at) => root[at + 1..].to_string(),
        None => root.to_string(),
    }
}

/// `-r` pairs for a `a:b` revision range.
pub fn revision_args(revision_range: &str) -> Vec<String> {
    revision_range
        .split(':')
        .flat_map(|rev| ["-r".to_string(), rev.to_string()])
        .collect()
}

pub struct CvsScm {
    root_file: PathBuf,
}

impl CvsScm {
    pub fn new() -> Self {
        Self {
            root_file: PathBuf::from("CVS").join("Root"),
        }
    }

    async fn do_diff(&self, params: &[String]) -> Result<Vec<u8>, CoreError> {
        let mut args = vec!["diff", "-uN"];
        args.extend(params.iter().map(String::as_str));
        // cvs exits 1 when it found differences.
        Ok(exec::run_command_bytes("cvs", &args, &ExecOptions::tolerating(&[1])).await?)
    }
}

impl Default for CvsScm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScmClient for CvsScm {
    fn name(&self) -> &'static str {
        "cvs"
    }

    async fn repository_info(&self) -> Result<Option<RepositoryInfo>, CoreError> {
        if !exec::is_available("cvs", &["--version"]).await {
            return Ok(None);
        }
        let contents = match tokio::fs::read_to_string(&self.root_file).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.root_file.display(), "no CVS/Root here");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(RepositoryInfo::new(parse_cvs_root(&contents))))
    }

    async fn diff(&self, args: &[String]) -> Result<DiffResult, CoreError> {
        Ok(DiffResult {
            diff: self.do_diff(args).await?,
            parent_diff: None,
            branch: None,
        })
    }

    async fn diff_between_revisions(
        &self,
        revision_range: &str,
        _args: &[String],
    ) -> Result<Vec<u8>, CoreError> {
        self.do_diff(&revision_args(revision_range)).await
    }
}
