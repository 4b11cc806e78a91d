//! Mercurial backend, including clones managed by hgsubversion.

use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex_lite::Regex;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{DiffResult, RepositoryInfo, ScmClient};
use crate::errors::{CoreError, ScmError};
use crate::exec::{self, ExecOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HgFlavor {
    Plain,
    /// A clone of a Subversion repository through hgsubversion.
    Svn,
}

fn credentials_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(svn\+ssh|http|https)://([-a-zA-Z0-9.]*@)(.*)$").expect("url user regex")
    })
}

fn default_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^default\s+=\s+(.+)$").expect("hgrc default regex"))
}

fn strip_user(url: &str) -> String {
    match credentials_pattern().captures(url) {
        Some(caps) => format!("{}://{}", &caps[1], &caps[3]),
        None => url.to_string(),
    }
}

fn field<'a>(output: &'a str, key: &str) -> Option<&'a str> {
    output
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .map(str::trim)
}

/// Repository info from `hg svn info`, with any `user@` removed from the
/// URLs.
pub fn parse_hg_svn_info(output: &str) -> Option<RepositoryInfo> {
    let root = strip_user(field(output, "Repository Root: ")?);
    let url = strip_user(field(output, "URL: ")?);
    let base_path = match url.strip_prefix(root.as_str()) {
        Some("") | None => "/".to_string(),
        Some(rest) => rest.to_string(),
    };
    Some(RepositoryInfo {
        base_path: Some(base_path),
        supports_parent_diffs: true,
        ..RepositoryInfo::new(root)
    })
}

/// Repository info for a plain clone: the `default` path from `.hg/hgrc`,
/// or the local root when there is none.
pub fn plain_repository_info(root: &str, hgrc: Option<&str>) -> RepositoryInfo {
    let default = hgrc
        .and_then(|text| default_path_pattern().captures(text))
        .map(|caps| caps[1].trim().to_string());
    let (path, base_path) = match default {
        Some(path) => (path, ""),
        None => (root.to_string(), "/"),
    };
    RepositoryInfo {
        base_path: Some(base_path.to_string()),
        supports_parent_diffs: true,
        ..RepositoryInfo::new(path)
    }
}

pub struct MercurialScm {
    detected: OnceCell<Option<(HgFlavor, RepositoryInfo)>>,
}

impl MercurialScm {
    pub fn new() -> Self {
        Self {
            detected: OnceCell::new(),
        }
    }

    async fn detect(&self) -> Result<Option<(HgFlavor, RepositoryInfo)>, CoreError> {
        if !exec::is_available("hg", &["--help"]).await {
            return Ok(None);
        }
        let root = exec::run_command("hg", &["root"], &ExecOptions::ignoring_errors()).await?;
        let root = root.trim();
        if root.is_empty() || root.starts_with("abort:") {
            return Ok(None);
        }

        let svn =
            exec::run_command("hg", &["svn", "info"], &ExecOptions::ignoring_errors()).await?;
        if svn.contains("Repository Root:") {
            debug!("hgsubversion clone");
            return Ok(parse_hg_svn_info(&svn).map(|info| (HgFlavor::Svn, info)));
        }

        let hgrc_path = Path::new(root).join(".hg").join("hgrc");
        let hgrc = tokio::fs::read_to_string(&hgrc_path).await.ok();
        Ok(Some((
            HgFlavor::Plain,
            plain_repository_info(root, hgrc.as_deref()),
        )))
    }

    async fn flavor(&self) -> Result<HgFlavor, CoreError> {
        let detected = self.detected.get_or_try_init(|| self.detect()).await?;
        match detected {
            Some((flavor, _)) => Ok(*flavor),
            None => Err(ScmError::NoRepository("mercurial").into()),
        }
    }
}

impl Default for MercurialScm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScmClient for MercurialScm {
    fn name(&self) -> &'static str {
        "mercurial"
    }

    async fn repository_info(&self) -> Result<Option<RepositoryInfo>, CoreError> {
        let detected = self.detected.get_or_try_init(|| self.detect()).await?;
        Ok(detected.as_ref().map(|(_, info)| info.clone()))
    }

    async fn diff(&self, args: &[String]) -> Result<DiffResult, CoreError> {
        let diff = match self.flavor().await? {
            HgFlavor::Svn => {
                exec::run_command_bytes("hg", &["svn", "diff"], &ExecOptions::default()).await?
            }
            HgFlavor::Plain => {
                let mut cmd = vec!["diff"];
                cmd.extend(args.iter().map(String::as_str));
                exec::run_command_bytes("hg", &cmd, &ExecOptions::default()).await?
            }
        };
        Ok(DiffResult {
            diff,
            parent_diff: None,
            branch: None,
        })
    }

    async fn diff_between_revisions(
        &self,
        revision_range: &str,
        _args: &[String],
    ) -> Result<Vec<u8>, CoreError> {
        if self.flavor().await? != HgFlavor::Plain {
            return Err(ScmError::Unsupported {
                backend: "mercurial",
                operation: "revision range diffs on hgsubversion clones",
            }
            .into());
        }
        let (r1, r2) = revision_range.split_once(':').ok_or_else(|| {
            ScmError::MissingArgument(format!(
                "revision range must be written as <rev1>:<rev2>, got '{}'",
                revision_range
            ))
        })?;
        Ok(
            exec::run_command_bytes("hg", &["diff", "-r", r1, "-r", r2], &ExecOptions::default())
                .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hg_svn_info_strips_user() {
        let out = "Path: .\n\
                   URL: https://joe@svn.example.com/repo/trunk\n\
                   Repository Root: https://joe@svn.example.com/repo\n\
                   Revision: 40\n";
        let info = parse_hg_svn_info(out).unwrap();
        assert_eq!(info.path, "https://svn.example.com/repo");
        assert_eq!(info.base_path.as_deref(), Some("/trunk"));
        assert!(info.supports_parent_diffs);

        assert!(parse_hg_svn_info("abort: no such command\n").is_none());
    }

    #[test]
    fn test_plain_repository_info() {
        let hgrc = "[paths]\ndefault = https://hg.example.com/proj \n";
        let info = plain_repository_info("/home/joe/proj", Some(hgrc));
        assert_eq!(info.path, "https://hg.example.com/proj");
        assert_eq!(info.base_path.as_deref(), Some(""));

        let info = plain_repository_info("/home/joe/proj", Some("[ui]\nusername = joe\n"));
        assert_eq!(info.path, "/home/joe/proj");
        assert_eq!(info.base_path.as_deref(), Some("/"));

        let info = plain_repository_info("/home/joe/proj", None);
        assert_eq!(info.path, "/home/joe/proj");
    }
}
