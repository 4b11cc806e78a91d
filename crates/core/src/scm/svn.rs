//! Subversion backend.
//!
//! `svn diff` output is post-processed in two passes. Files that came from
//! `svn cp`/`svn mv` get their `---` line pointed back at the copy source,
//! and every `Index:`/`---`/`+++` path is made absolute within the
//! repository. Both passes are plain functions over the diff lines; the
//! `svn info` lookups they need are gathered first. Content lines that are
//! not UTF-8 are set aside before the passes and put back afterwards, so
//! file bytes reach the output unchanged.

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex_lite::Regex;
use tracing::{debug, instrument, warn};

use super::{DiffResult, RepositoryInfo, ScmClient};
use crate::errors::{CoreError, ScmError};
use crate::exec::{self, ExecOptions};

/// `svn info` output as key/value pairs.
pub type InfoMap = HashMap<String, String>;

pub fn parse_info_map(output: &str) -> InfoMap {
    output
        .lines()
        .filter_map(|line| line.trim().split_once(": "))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Repository root, base path and UUID from `svn info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvnRepository {
    pub info: RepositoryInfo,
    pub uuid: String,
}

pub fn parse_repository_info(output: &str) -> Option<SvnRepository> {
    let info = parse_info_map(output);
    let root = info.get("Repository Root")?;
    let url = info.get("URL")?;
    let uuid = info.get("Repository UUID")?;

    let base_path = match url.strip_prefix(root.as_str()) {
        Some("") | None => "/",
        Some(rest) => rest,
    };
    Some(SvnRepository {
        info: RepositoryInfo {
            base_path: Some(base_path.to_string()),
            ..RepositoryInfo::new(root.as_str())
        },
        uuid: uuid.clone(),
    })
}

fn space_run() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r" {2,}").expect("space run regex"))
}

/// Split a `---`/`+++` header body into the file name and the rest of the
/// line. The rest starts with a tab, or is just the newline when the header
/// carries no revision part.
pub fn parse_filename_header(s: &str) -> (String, String) {
    if let Some((file, rest)) = s.split_once('\t') {
        return (file.to_string(), format!("\t{}", rest));
    }
    if let Some(m) = space_run().find(s) {
        return (s[..m.start()].to_string(), format!("\t{}", &s[m.end()..]));
    }
    let file = s.split('\n').next().unwrap_or_default();
    (file.to_string(), "\n".to_string())
}

/// Decode `%XX` escapes. Malformed escapes are kept as they are.
pub fn unquote(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn relative_to_root(info: &InfoMap, key: &str) -> Option<String> {
    let url = info.get(key)?;
    let root = info.get("Repository Root")?;
    url.strip_prefix(root.as_str()).map(unquote)
}

fn join_path(base: &str, file: &str) -> String {
    if file.starts_with('/') || base.is_empty() {
        file.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, file)
    } else {
        format!("{}/{}", base, file)
    }
}

/// Files named on `+++` lines.
pub fn copied_file_candidates(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("+++ "))
        .map(|rest| parse_filename_header(rest).0)
        .collect()
}

/// Rewrite the `---` line before each `+++` line whose file `copy_source`
/// maps to an original path.
pub fn apply_renames<F>(lines: Vec<String>, copy_source: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = Vec::with_capacity(lines.len());
    let mut from_line: Option<String> = None;
    for line in lines {
        if line.starts_with("--- ") {
            if let Some(held) = from_line.replace(line) {
                result.push(held);
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(held) = from_line.take() {
                let (to_file, _) = parse_filename_header(rest);
                match copy_source(&to_file) {
                    Some(from_file) => {
                        debug!(%to_file, %from_file, "copied file");
                        result.push(held.replace(&to_file, &from_file));
                    }
                    None => result.push(held),
                }
            }
        } else if let Some(held) = from_line.take() {
            result.push(held);
        }
        result.push(line);
    }
    result.extend(from_line);
    result
}

fn split_header(line: &str) -> Option<(&str, &str)> {
    if line.starts_with("+++ ") || line.starts_with("--- ") || line.starts_with("Index: ") {
        line.split_once(' ')
    } else {
        None
    }
}

/// Relative files named on `Index:`/`---`/`+++` lines.
pub fn relative_header_files(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| split_header(line))
        .filter(|(_, rest)| !rest.starts_with('/'))
        .map(|(_, rest)| parse_filename_header(rest).0)
        .collect()
}

/// Replace relative header paths with what `absolute` maps them to. Lines
/// it has no answer for are left alone.
pub fn to_absolute_paths<F>(lines: Vec<String>, absolute: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    lines
        .into_iter()
        .map(|line| {
            let Some((front, rest)) = split_header(&line) else {
                return line;
            };
            if rest.starts_with('/') {
                return line;
            }
            let (file, tail) = parse_filename_header(rest);
            match absolute(&file) {
                Some(path) => format!("{} {}{}", front, path, tail),
                None => {
                    warn!(%file, "could not resolve repository path");
                    line
                }
            }
        })
        .collect()
}

/// Diff output as text lines, with the lines that cannot be text held
/// back. Each held line is stood in for by a marker that no header pass
/// touches.
#[derive(Debug, Default)]
pub struct TextLines {
    pub lines: Vec<String>,
    held: Vec<Vec<u8>>,
}

const HELD_MARKER: char = '\0';

impl TextLines {
    pub fn split(output: &[u8]) -> Self {
        let mut split = Self::default();
        for line in output.split_inclusive(|b| *b == b'\n') {
            let text = match std::str::from_utf8(line) {
                Ok(text) if !text.starts_with(HELD_MARKER) => text.to_string(),
                // Header paths come from svn itself and are read as text.
                _ if split_header(&String::from_utf8_lossy(line)).is_some() => {
                    String::from_utf8_lossy(line).into_owned()
                }
                _ => {
                    let marker = format!("{}{}\n", HELD_MARKER, split.held.len());
                    split.held.push(line.to_vec());
                    marker
                }
            };
            split.lines.push(text);
        }
        split
    }

    pub fn join(self) -> Vec<u8> {
        let mut out = Vec::new();
        for line in &self.lines {
            let held = line
                .strip_prefix(HELD_MARKER)
                .and_then(|index| index.trim_end().parse::<usize>().ok())
                .and_then(|index| self.held.get(index));
            match held {
                Some(bytes) => out.extend_from_slice(bytes),
                None => out.extend_from_slice(line.as_bytes()),
            }
        }
        out
    }
}

enum PathSource<'a> {
    WorkingCopy,
    Url { base_path: &'a str },
}

pub struct SvnScm {
    repository_url: Option<String>,
}

impl SvnScm {
    pub fn new(repository_url: Option<String>) -> Self {
        Self { repository_url }
    }

    async fn svn_info(&self, path: &str) -> Result<InfoMap, ScmError> {
        let output = exec::run_command("svn", &["info", path], &ExecOptions::default()).await?;
        Ok(parse_info_map(&output))
    }

    async fn info_for(&self, files: Vec<String>) -> Result<HashMap<String, InfoMap>, ScmError> {
        let mut infos = HashMap::new();
        for file in files {
            if !infos.contains_key(&file) {
                let info = self.svn_info(&file).await?;
                infos.insert(file, info);
            }
        }
        Ok(infos)
    }

    async fn run_diff(&self, args: &[&str], paths: PathSource<'_>) -> Result<Vec<u8>, CoreError> {
        let output = exec::run_command_bytes("svn", args, &ExecOptions::default()).await?;
        let mut text = TextLines::split(&output);
        let mut lines = std::mem::take(&mut text.lines);

        match paths {
            PathSource::WorkingCopy => {
                let infos = self.info_for(copied_file_candidates(&lines)).await?;
                lines = apply_renames(lines, |file| {
                    infos
                        .get(file)
                        .filter(|info| info.contains_key("Copied From URL"))
                        .and_then(|info| relative_to_root(info, "Copied From URL"))
                });

                let infos = self.info_for(relative_header_files(&lines)).await?;
                lines = to_absolute_paths(lines, |file| {
                    infos.get(file).and_then(|info| relative_to_root(info, "URL"))
                });
            }
            PathSource::Url { base_path } => {
                lines = to_absolute_paths(lines, |file| Some(unquote(&join_path(base_path, file))));
            }
        }
        text.lines = lines;
        Ok(text.join())
    }
}

#[async_trait]
impl ScmClient for SvnScm {
    fn name(&self) -> &'static str {
        "svn"
    }

    async fn repository_info(&self) -> Result<Option<RepositoryInfo>, CoreError> {
        if !exec::is_available("svn", &["help"]).await {
            return Ok(None);
        }
        let mut args = vec!["info"];
        if let Some(url) = &self.repository_url {
            args.push(url);
        }
        let output = exec::run_command("svn", &args, &ExecOptions::ignoring_errors()).await?;
        let repo = parse_repository_info(&output);
        if let Some(repo) = &repo {
            debug!(info = %repo.info, uuid = %repo.uuid, "subversion repository");
        }
        Ok(repo.map(|r| r.info))
    }

    #[instrument(skip(self))]
    async fn diff(&self, args: &[String]) -> Result<DiffResult, CoreError> {
        let mut cmd = vec!["diff"];
        cmd.extend(args.iter().map(String::as_str));
        let diff = self.run_diff(&cmd, PathSource::WorkingCopy).await?;
        Ok(DiffResult {
            diff,
            parent_diff: None,
            branch: None,
        })
    }

    #[instrument(skip(self))]
    async fn diff_between_revisions(
        &self,
        revision_range: &str,
        args: &[String],
    ) -> Result<Vec<u8>, CoreError> {
        if self.repository_url.is_none() {
            return self
                .run_diff(&["diff", "-r", revision_range], PathSource::WorkingCopy)
                .await;
        }

        let mut info = self
            .repository_info()
            .await?
            .ok_or(ScmError::NoRepository("subversion"))?;
        if let Some(path) = args.first() {
            info.set_base_path(path);
        }
        let base_path = info.base_path.clone().unwrap_or_else(|| "/".to_string());

        let (old, new) = revision_range
            .split_once(':')
            .unwrap_or((revision_range, "HEAD"));
        let url = format!("{}{}", info.path, base_path);
        let old_url = format!("{}@{}", url, old);
        let new_url = format!("{}@{}", url, new);
        self.run_diff(
            &["diff", old_url.as_str(), new_url.as_str()],
            PathSource::Url {
                base_path: &base_path,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.split_inclusive('\n').map(str::to_string).collect()
    }

    const INFO: &str = "Path: .\n\
URL: http://svn.example.com/repo/trunk/proj\n\
Repository Root: http://svn.example.com/repo\n\
Repository UUID: 0c5a0e4f-1111-2222-3333-444455556666\n\
Revision: 120\n";

    #[test]
    fn test_parse_repository_info() {
        let repo = parse_repository_info(INFO).unwrap();
        assert_eq!(repo.info.path, "http://svn.example.com/repo");
        assert_eq!(repo.info.base_path.as_deref(), Some("/trunk/proj"));
        assert_eq!(repo.uuid, "0c5a0e4f-1111-2222-3333-444455556666");

        let at_root = INFO.replace("/repo/trunk/proj", "/repo");
        let repo = parse_repository_info(&at_root).unwrap();
        assert_eq!(repo.info.base_path.as_deref(), Some("/"));

        assert!(parse_repository_info("svn: E155007: not a working copy\n").is_none());
    }

    #[test]
    fn test_parse_filename_header() {
        assert_eq!(
            parse_filename_header("src/a.c\t(revision 12)\n"),
            ("src/a.c".to_string(), "\t(revision 12)\n".to_string())
        );
        assert_eq!(
            parse_filename_header("src/my file.c   (working copy)\n"),
            ("src/my file.c".to_string(), "\t(working copy)\n".to_string())
        );
        assert_eq!(
            parse_filename_header("src/a.c\n"),
            ("src/a.c".to_string(), "\n".to_string())
        );
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("/trunk/my%20file.c"), "/trunk/my file.c");
        assert_eq!(unquote("/a%2"), "/a%2");
        assert_eq!(unquote("/a%zz"), "/a%zz");
        assert_eq!(unquote("%C3%A9"), "é");
    }

    #[test]
    fn test_apply_renames_rewrites_copied_files() {
        let diff = lines(
            "Index: new.c\n\
             ===================================================================\n\
             --- new.c\t(revision 3)\n\
             +++ new.c\t(working copy)\n\
             @@ -1 +1 @@\n\
             Index: plain.c\n\
             --- plain.c\t(revision 3)\n\
             +++ plain.c\t(working copy)\n",
        );
        assert_eq!(copied_file_candidates(&diff), vec!["new.c", "plain.c"]);

        let out = apply_renames(diff.clone(), |file| {
            (file == "new.c").then(|| "trunk/old.c".to_string())
        });
        assert_eq!(out.len(), diff.len());
        assert_eq!(out[2], "--- trunk/old.c\t(revision 3)\n");
        assert_eq!(out[3], "+++ new.c\t(working copy)\n");
        assert_eq!(out[6], "--- plain.c\t(revision 3)\n");
    }

    #[test]
    fn test_to_absolute_paths() {
        let diff = lines(
            "Index: src/a.c\n\
             --- src/a.c\t(revision 3)\n\
             +++ src/a.c\t(working copy)\n\
             --- /already/abs.c\t(revision 3)\n\
             -removed line\n",
        );
        assert_eq!(relative_header_files(&diff), vec!["src/a.c"; 3]);

        let out = to_absolute_paths(diff, |file| Some(format!("/trunk/proj/{}", file)));
        assert_eq!(out[0], "Index: /trunk/proj/src/a.c\n");
        assert_eq!(out[1], "--- /trunk/proj/src/a.c\t(revision 3)\n");
        assert_eq!(out[2], "+++ /trunk/proj/src/a.c\t(working copy)\n");
        assert_eq!(out[3], "--- /already/abs.c\t(revision 3)\n");
        assert_eq!(out[4], "-removed line\n");
    }

    #[test]
    fn test_text_lines_hold_back_non_utf8_content() {
        let output = b"Index: a.c\n\
                       --- a.c\t(revision 3)\n\
                       +++ a.c\t(working copy)\n\
                       @@ -1 +1 @@\n\
                       -caf\xe9\n\
                       +caf\xe8\n";
        let mut text = TextLines::split(output);
        assert_eq!(text.lines.len(), 6);
        assert!(!text.lines[4].starts_with('-'));

        text.lines = to_absolute_paths(std::mem::take(&mut text.lines), |file| {
            Some(format!("/trunk/{}", file))
        });
        let out = text.join();
        assert_eq!(
            out,
            b"Index: /trunk/a.c\n\
              --- /trunk/a.c\t(revision 3)\n\
              +++ /trunk/a.c\t(working copy)\n\
              @@ -1 +1 @@\n\
              -caf\xe9\n\
              +caf\xe8\n"
                .to_vec()
        );
    }

    #[test]
    fn test_relative_to_root_and_join() {
        let mut info = parse_info_map(INFO);
        assert_eq!(relative_to_root(&info, "URL").as_deref(), Some("/trunk/proj"));
        assert!(relative_to_root(&info, "Copied From URL").is_none());
        info.insert(
            "Copied From URL".into(),
            "http://svn.example.com/repo/trunk/old%20name.c".into(),
        );
        assert_eq!(
            relative_to_root(&info, "Copied From URL").as_deref(),
            Some("/trunk/old name.c")
        );

        assert_eq!(join_path("/trunk", "a.c"), "/trunk/a.c");
        assert_eq!(join_path("/", "a.c"), "/a.c");
        assert_eq!(join_path("/trunk", "/x/a.c"), "/x/a.c");
    }
}
