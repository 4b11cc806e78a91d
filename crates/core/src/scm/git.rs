//! Git backend. Clones made with `git svn` get their diffs rewritten into
//! the shape `svn diff` prints.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex_lite::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::{DiffResult, RepositoryInfo, ScmClient};
use crate::diff::INDEX_RULE_WIDTH;
use crate::errors::{CoreError, ScmError};
use crate::exec::{self, ExecOptions};

const MIN_GIT_SVN_VERSION: (u32, u32, u32) = (1, 5, 4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitFlavor {
    Git,
    Svn,
}

#[derive(Debug, Clone)]
pub struct GitRepository {
    pub flavor: GitFlavor,
    pub info: RepositoryInfo,
    /// Top of the work tree; every command runs from here.
    pub work_tree: PathBuf,
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"version (\d+)\.(\d+)\.(\d+)").expect("version regex"))
}

fn origin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"URL: (.+)").expect("origin url regex"))
}

/// `(major, minor, micro)` from `git svn --version`.
pub fn parse_git_svn_version(output: &str) -> Option<(u32, u32, u32)> {
    let caps = version_pattern().captures(output)?;
    Some((
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    ))
}

/// Root and base path from `git svn info`.
pub fn parse_git_svn_info(output: &str) -> Option<RepositoryInfo> {
    let field = |key: &str| {
        output
            .lines()
            .find_map(|line| line.strip_prefix(key))
            .map(str::trim)
    };
    let root = field("Repository Root: ")?;
    let url = field("URL: ")?;
    let base_path = match url.strip_prefix(root) {
        Some("") | None => "/",
        Some(rest) => rest,
    };
    Some(RepositoryInfo {
        base_path: Some(base_path.to_string()),
        supports_parent_diffs: true,
        ..RepositoryInfo::new(root)
    })
}

pub fn parse_origin_url(output: &str) -> Option<String> {
    let caps = origin_pattern().captures(output)?;
    let url = caps[1].trim().trim_end_matches('/');
    (!url.is_empty()).then(|| url.to_string())
}

/// Rewrite `git diff --no-prefix` output the way `svn diff` prints it, with
/// `rev` as the revision of every old file. Only header lines are read as
/// text; hunk lines are copied byte for byte.
pub fn to_svn_format(diff: &[u8], rev: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(diff.len());
    let mut new_file = false;

    for line in diff.split_inclusive(|b| *b == b'\n') {
        if line.starts_with(b"diff ") {
            // diff --git path/to/file path/to/file
            let header = String::from_utf8_lossy(line);
            let file = header.split(' ').nth(2).unwrap_or_default().trim_end();
            out.extend_from_slice(
                format!("Index: {}\n{}\n", file, "=".repeat(INDEX_RULE_WIDTH)).as_bytes(),
            );
        } else if line.starts_with(b"index ") {
            continue;
        } else if line.trim_ascii() == b"--- /dev/null" {
            new_file = true;
        } else if let Some(old) = line.strip_prefix(b"--- ") {
            new_file = false;
            let old = String::from_utf8_lossy(old);
            out.extend_from_slice(format!("--- {}\t(revision {})\n", old.trim(), rev).as_bytes());
        } else if let Some(new) = line.strip_prefix(b"+++ ") {
            let new = String::from_utf8_lossy(new);
            let file = new.trim();
            if new_file {
                out.extend_from_slice(format!("--- {}\t(revision 0)\n", file).as_bytes());
                out.extend_from_slice(format!("+++ {}\t(revision 0)\n", file).as_bytes());
            } else {
                out.extend_from_slice(format!("+++ {}\t(working copy)\n", file).as_bytes());
            }
        } else {
            out.extend_from_slice(line);
        }
    }
    out
}

pub struct GitScm {
    parent_branch: String,
    detected: OnceCell<Option<GitRepository>>,
}

impl GitScm {
    pub fn new(parent_branch: impl Into<String>) -> Self {
        Self {
            parent_branch: parent_branch.into(),
            detected: OnceCell::new(),
        }
    }

    #[instrument(skip(self))]
    async fn detect(&self) -> Result<Option<GitRepository>, CoreError> {
        if !exec::is_available("git", &["--help"]).await {
            return Ok(None);
        }
        let git_dir = exec::run_command(
            "git",
            &["rev-parse", "--git-dir"],
            &ExecOptions::ignoring_errors(),
        )
        .await?;
        let git_dir = git_dir.trim();
        if git_dir.is_empty() || git_dir.starts_with("fatal:") {
            return Ok(None);
        }
        if !tokio::fs::metadata(git_dir).await.map_or(false, |m| m.is_dir()) {
            return Ok(None);
        }
        let work_tree = match Path::new(git_dir).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let opts = ExecOptions {
            cwd: Some(work_tree.clone()),
            ignore_errors: true,
            ..ExecOptions::default()
        };

        let svn_info = exec::run_command("git", &["svn", "info"], &opts).await?;
        if let Some(info) = parse_git_svn_info(&svn_info) {
            info!(%info, "git-svn clone");
            return Ok(Some(GitRepository {
                flavor: GitFlavor::Svn,
                info,
                work_tree,
            }));
        }

        let version = exec::run_command("git", &["svn", "--version"], &opts).await?;
        let svn_remote =
            exec::run_command("git", &["config", "--get", "svn-remote.svn.url"], &opts).await?;
        if let Some(found) = parse_git_svn_version(&version) {
            if found < MIN_GIT_SVN_VERSION && !svn_remote.trim().is_empty() {
                return Err(ScmError::Unsupported {
                    backend: "git",
                    operation: "git-svn older than 1.5.4; please upgrade it",
                }
                .into());
            }
        }

        let origin = exec::run_command("git", &["remote", "show", "origin"], &opts).await?;
        Ok(parse_origin_url(&origin).map(|url| GitRepository {
            flavor: GitFlavor::Git,
            info: RepositoryInfo {
                base_path: Some(String::new()),
                supports_parent_diffs: true,
                ..RepositoryInfo::new(url)
            },
            work_tree,
        }))
    }

    async fn repository(&self) -> Result<&GitRepository, CoreError> {
        self.detected
            .get_or_try_init(|| self.detect())
            .await?
            .as_ref()
            .ok_or_else(|| ScmError::NoRepository("git").into())
    }

    async fn make_diff(
        &self,
        repo: &GitRepository,
        parent: &str,
        source: &str,
    ) -> Result<Vec<u8>, CoreError> {
        let opts = ExecOptions {
            cwd: Some(repo.work_tree.clone()),
            ..ExecOptions::default()
        };
        let range = format!("{}..{}", parent, source);
        match repo.flavor {
            GitFlavor::Svn => {
                let diff = exec::run_command_bytes(
                    "git",
                    &["diff", "--no-color", "--no-prefix", "-r", "-u", range.as_str()],
                    &opts,
                )
                .await?;
                let rev =
                    exec::run_command("git", &["svn", "find-rev", "master"], &opts).await?;
                let rev = rev.trim();
                if rev.is_empty() {
                    return Err(ScmError::NoRepository("git-svn").into());
                }
                Ok(to_svn_format(&diff, rev))
            }
            GitFlavor::Git => {
                let target = if source.is_empty() { parent } else { range.as_str() };
                Ok(exec::run_command_bytes("git", &["diff", "--no-color", target], &opts).await?)
            }
        }
    }
}

#[async_trait]
impl ScmClient for GitScm {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn repository_info(&self) -> Result<Option<RepositoryInfo>, CoreError> {
        let detected = self.detected.get_or_try_init(|| self.detect()).await?;
        Ok(detected.as_ref().map(|repo| repo.info.clone()))
    }

    async fn diff(&self, _args: &[String]) -> Result<DiffResult, CoreError> {
        let repo = self.repository().await?;
        let parent = self.parent_branch.as_str();
        let diff = self.make_diff(repo, parent, "").await?;
        let parent_diff = if parent != "master" {
            debug!(parent, "diffing parent branch against master");
            Some(self.make_diff(repo, "master", parent).await?)
        } else {
            None
        };
        Ok(DiffResult {
            diff,
            parent_diff,
            branch: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_svn_format() {
        let diff = "diff --git src/a.c src/a.c\n\
                    index 83db48f..bf269f4 100644\n\
                    --- src/a.c\n\
                    +++ src/a.c\n\
                    @@ -1 +1 @@\n\
                    -old\n\
                    +new\n\
                    diff --git src/new.c src/new.c\n\
                    new file mode 100644\n\
                    index 0000000..e69de29\n\
                    --- /dev/null\n\
                    +++ src/new.c\n\
                    @@ -0,0 +1 @@\n\
                    +hello\n";
        let out = String::from_utf8(to_svn_format(diff.as_bytes(), "1234")).unwrap();
        let rule = "=".repeat(67);
        let expected = format!(
            "Index: src/a.c\n{rule}\n\
             --- src/a.c\t(revision 1234)\n\
             +++ src/a.c\t(working copy)\n\
             @@ -1 +1 @@\n\
             -old\n\
             +new\n\
             Index: src/new.c\n{rule}\n\
             new file mode 100644\n\
             --- src/new.c\t(revision 0)\n\
             +++ src/new.c\t(revision 0)\n\
             @@ -0,0 +1 @@\n\
             +hello\n"
        );
        assert_eq!(out, expected);
        assert!(!out.contains("index "));
    }

    #[test]
    fn test_to_svn_format_keeps_hunk_bytes() {
        let diff = b"diff --git a.c a.c\n\
                     index 83db48f..bf269f4 100644\n\
                     --- a.c\n\
                     +++ a.c\n\
                     @@ -1 +1 @@\n\
                     -caf\xe9\n\
                     +caf\xe8\n";
        let out = to_svn_format(diff, "7");
        assert!(out.ends_with(b"+++ a.c\t(working copy)\n@@ -1 +1 @@\n-caf\xe9\n+caf\xe8\n"));
    }

    #[test]
    fn test_parse_git_svn_info() {
        let out = "Path: .\nURL: svn://svn.example.com/repo/trunk\n\
                   Repository Root: svn://svn.example.com/repo\n";
        let info = parse_git_svn_info(out).unwrap();
        assert_eq!(info.path, "svn://svn.example.com/repo");
        assert_eq!(info.base_path.as_deref(), Some("/trunk"));
        assert!(parse_git_svn_info("Unable to determine upstream SVN information\n").is_none());
    }

    #[test]
    fn test_parse_origin_url_and_version() {
        let out = "* remote origin\n  Fetch URL: git://example.com/proj.git/\n";
        assert_eq!(parse_origin_url(out).as_deref(), Some("git://example.com/proj.git"));
        assert!(parse_origin_url("fatal: 'origin' does not appear\n").is_none());

        assert_eq!(
            parse_git_svn_version("git-svn version 1.5.3 (svn 1.4.6)\n"),
            Some((1, 5, 3))
        );
        assert!(parse_git_svn_version("1.5.3").is_none());
        assert!((1, 5, 3) < MIN_GIT_SVN_VERSION);
        assert!((1, 6, 0) >= MIN_GIT_SVN_VERSION);
    }
}
