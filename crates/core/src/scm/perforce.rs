//! Perforce backend driving the `p4` command-line client.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex_lite::Regex;
use tracing::{debug, info, instrument};

use super::{ChangeSummary, DiffResult, RepositoryInfo, ScmClient, NO_BRANCH};
use crate::diff::{ChangeKind, FileChange, HeaderStyle, SynthesisReport, Synthesizer};
use crate::errors::{ContentUnavailableError, CoreError, ScmError};
use crate::exec::{self, ExecOptions};

const MULTIPLE_BRANCHES: &str = "(multiple branches)";

fn affected_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\.\.\. ([^#]+)#(\d+) (add|edit|delete|integrate|branch)")
            .expect("affected file regex")
    })
}

fn branch_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\.\.\. //[^/]+/([^/]+)/([^/]+)/").expect("branch regex"))
}

fn change_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Change (\d+)").expect("change regex"))
}

fn description_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\t(.[^\r\n]+)").expect("description regex"))
}

fn server_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^Server address: (.+)$").expect("server regex"))
}

/// What `p4 describe` says happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum P4Action {
    Add,
    Edit,
    Delete,
    Integrate,
    Branch,
}

impl P4Action {
    fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "add" => Self::Add,
            "edit" => Self::Edit,
            "delete" => Self::Delete,
            "integrate" => Self::Integrate,
            "branch" => Self::Branch,
            _ => return None,
        })
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Add | Self::Branch => ChangeKind::Added,
            Self::Edit | Self::Integrate => ChangeKind::Modified,
            Self::Delete => ChangeKind::Deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffectedFile {
    pub depot_path: String,
    pub revision: i64,
    pub action: P4Action,
}

/// Parse one `... //depot/path#rev action` line.
pub fn parse_affected_line(line: &str) -> Option<AffectedFile> {
    let caps = affected_pattern().captures(line)?;
    Some(AffectedFile {
        depot_path: caps[1].to_string(),
        revision: caps[2].parse().ok()?,
        action: P4Action::parse(&caps[3])?,
    })
}

/// A parsed `p4 describe -s` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDescription {
    pub pending: bool,
    pub files: Vec<AffectedFile>,
    pub branch: String,
}

pub fn parse_describe(lines: &[String]) -> Result<ChangeDescription, ScmError> {
    let pending = lines.first().map_or(false, |l| l.contains("*pending*"));
    let start = lines
        .iter()
        .position(|l| l.contains("Affected files ..."))
        .ok_or(ScmError::NoAffectedFiles)?;

    let mut files = Vec::new();
    let mut branches = BranchTracker::default();
    for line in lines.iter().skip(start + 2) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let file =
            parse_affected_line(line).ok_or_else(|| ScmError::UnsupportedLine(line.to_string()))?;
        branches.observe(line);
        files.push(file);
    }

    Ok(ChangeDescription {
        pending,
        files,
        branch: branches.label(),
    })
}

/// Derives a branch label from `//depot/<project>/<branch>/...` paths.
///
/// Once two branches are seen the label stays `(multiple branches)`.
#[derive(Debug, Default)]
pub struct BranchTracker {
    project: Option<String>,
    branch: Option<String>,
    multiple_projects: bool,
    multiple_branches: bool,
}

impl BranchTracker {
    pub fn observe(&mut self, line: &str) {
        if self.multiple_branches {
            return;
        }
        let Some(caps) = branch_pattern().captures(line) else {
            return;
        };
        let (project, branch) = (&caps[1], &caps[2]);

        let same_branch = self.branch.as_deref().map_or(true, |b| b == branch);
        let same_project = self.project.as_deref().map_or(true, |p| p == project);
        if !same_branch {
            self.multiple_branches = true;
        } else if !same_project {
            self.multiple_projects = true;
        } else {
            self.project = Some(project.to_string());
            self.branch = Some(branch.to_string());
        }
    }

    pub fn label(&self) -> String {
        if self.multiple_branches {
            return MULTIPLE_BRANCHES.to_string();
        }
        match (&self.branch, &self.project) {
            (Some(branch), _) if self.multiple_projects => {
                format!("{}/(multiple projects)", branch)
            }
            (Some(branch), Some(project)) => format!("{}/{}", branch, project),
            _ => NO_BRANCH.to_string(),
        }
    }
}

/// Parse `p4 changes -L` output into `(change number, description)` pairs.
/// Description lines are joined with spaces; changes without one are
/// skipped.
pub fn parse_changes(lines: &[String]) -> Vec<(String, String)> {
    let mut result = Vec::new();
    let mut current: Option<String> = None;
    let mut description: Option<String> = None;

    for line in lines {
        if let Some(caps) = change_pattern().captures(line) {
            if let (Some(id), Some(desc)) = (current.take(), description.take()) {
                result.push((id, desc));
            }
            description = None;
            current = Some(caps[1].to_string());
        } else if let Some(caps) = description_pattern().captures(line) {
            description = Some(match description.take() {
                Some(desc) => format!("{} {}", desc, &caps[1]),
                None => caps[1].to_string(),
            });
        }
    }
    if let (Some(id), Some(desc)) = (current, description) {
        result.push((id, desc));
    }
    result
}

/// Local file named by `p4 where` output: the third field of the last line.
pub fn parse_where(output: &str) -> Option<String> {
    let last = output.lines().filter(|l| !l.trim().is_empty()).last()?;
    last.trim()
        .split(' ')
        .nth(2)
        .map(|field| field.trim_end().to_string())
}

pub fn parse_server_address(info: &str) -> Option<String> {
    server_pattern()
        .captures(info)
        .map(|caps| caps[1].trim().to_string())
}

pub struct PerforceScm {
    client: Option<String>,
    port: Option<String>,
    user: String,
    max_changes: u32,
    synthesizer: Synthesizer,
}

impl PerforceScm {
    pub fn new(
        client: Option<String>,
        port: Option<String>,
        user: impl Into<String>,
        max_changes: u32,
        synthesizer: Synthesizer,
    ) -> Self {
        Self {
            client,
            port,
            user: user.into(),
            max_changes,
            synthesizer,
        }
    }

    fn options(&self) -> ExecOptions {
        let mut options = ExecOptions::default();
        if let Some(client) = &self.client {
            options.env.push(("P4CLIENT".into(), client.clone()));
        }
        if let Some(port) = &self.port {
            options.env.push(("P4PORT".into(), port.clone()));
        }
        options
    }

    async fn p4(&self, args: &[&str]) -> Result<String, ScmError> {
        exec::run_command("p4", args, &self.options()).await
    }

    async fn describe(&self, change: &str) -> Result<Vec<String>, ScmError> {
        exec::run_command_lines("p4", &["describe", "-s", change], &self.options()).await
    }

    async fn print(&self, depot_path: &str) -> Result<Vec<u8>, ScmError> {
        debug!(depot_path, "printing depot file");
        exec::run_command_bytes("p4", &["print", "-q", depot_path], &self.options()).await
    }

    async fn read_local(&self, depot_path: &str) -> Result<Vec<u8>, CoreError> {
        let output = self.p4(&["where", depot_path]).await?;
        let path = parse_where(&output)
            .ok_or_else(|| ScmError::UnsupportedLine(output.trim().to_string()))?;
        debug!(depot_path, local = %path, "reading pending file");
        let data = tokio::fs::read(&path)
            .await
            .map_err(|source| ContentUnavailableError::LocalRead { path, source })?;
        Ok(data)
    }

    async fn change_for(
        &self,
        file: &AffectedFile,
        pending: bool,
    ) -> Result<FileChange, CoreError> {
        let base_revision = if pending {
            file.revision
        } else {
            file.revision - 1
        };
        let kind = file.action.kind();
        let versioned = |rev: i64| format!("{}#{}", file.depot_path, rev);

        let old = match kind {
            ChangeKind::Added => Vec::new(),
            ChangeKind::Modified | ChangeKind::Deleted => {
                self.print(&versioned(base_revision)).await?
            }
        };
        let new = match (kind, pending) {
            (ChangeKind::Deleted, _) => Vec::new(),
            (_, true) => self.read_local(&file.depot_path).await?,
            (ChangeKind::Modified, false) => self.print(&versioned(base_revision + 1)).await?,
            (ChangeKind::Added, false) => self.print(&file.depot_path).await?,
        };

        Ok(FileChange {
            depot_path: file.depot_path.clone(),
            base_revision,
            kind,
            local_path: file.depot_path.clone(),
            index_path: file.depot_path.clone(),
            old,
            new,
        })
    }
}

#[async_trait]
impl ScmClient for PerforceScm {
    fn name(&self) -> &'static str {
        "perforce"
    }

    async fn repository_info(&self) -> Result<Option<RepositoryInfo>, CoreError> {
        if !exec::is_available("p4", &["help"]).await {
            return Ok(None);
        }
        let mut options = self.options();
        options.ignore_errors = true;
        let info = exec::run_command("p4", &["info"], &options).await?;
        Ok(parse_server_address(&info).map(|path| RepositoryInfo {
            supports_changesets: true,
            ..RepositoryInfo::new(path)
        }))
    }

    #[instrument(skip(self))]
    async fn diff(&self, args: &[String]) -> Result<DiffResult, CoreError> {
        let [change] = args else {
            return Err(ScmError::MissingArgument(
                "specify the change number of a pending changeset".into(),
            )
            .into());
        };
        let number: u64 = change
            .trim()
            .parse()
            .map_err(|_| ScmError::InvalidChangeNumber(change.clone()))?;
        debug!(number, "generating diff for change");

        let description = parse_describe(&self.describe(&number.to_string()).await?)?;
        let mut report = SynthesisReport::new(HeaderStyle::Plain);
        for file in &description.files {
            info!(action = ?file.action, depot_path = %file.depot_path, "processing");
            let change = self.change_for(file, description.pending).await?;
            report.push(self.synthesizer.synthesize(change).await?);
        }

        Ok(DiffResult {
            diff: report.render(),
            parent_diff: None,
            branch: Some(description.branch),
        })
    }

    #[instrument(skip(self))]
    async fn get_open_changes(
        &self,
        include_submitted: bool,
    ) -> Result<Vec<ChangeSummary>, CoreError> {
        let user = self.user.to_lowercase();
        let max = self.max_changes.to_string();
        let mut args = vec!["changes", "-L"];
        if !include_submitted {
            args.extend(["-s", "pending"]);
        }
        args.extend(["-m", max.as_str(), "-u", user.as_str()]);

        let lines = exec::run_command_lines("p4", &args, &self.options()).await?;
        let mut changes = Vec::new();
        for (id, description) in parse_changes(&lines) {
            let mut branches = BranchTracker::default();
            for line in self.describe(&id).await? {
                branches.observe(&line);
            }
            changes.push(ChangeSummary {
                id,
                description,
                branch: Some(branches.label()),
            });
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_affected_line() {
        let file = parse_affected_line("... //depot/proj/main/src/a.c#4 edit").unwrap();
        assert_eq!(file.depot_path, "//depot/proj/main/src/a.c");
        assert_eq!(file.revision, 4);
        assert_eq!(file.action, P4Action::Edit);
        assert_eq!(file.action.kind(), ChangeKind::Modified);

        assert_eq!(
            parse_affected_line("... //depot/x#1 branch").unwrap().action.kind(),
            ChangeKind::Added
        );
        assert!(parse_affected_line("... //depot/x#1 move/add").is_none());
    }

    #[test]
    fn test_parse_describe_pending() {
        let out = lines(
            "Change 1234 by joe@ws on 2009/01/01 12:00:00 *pending*\n\
             \n\
             \tFix the thing\n\
             \n\
             Affected files ...\n\
             \n\
             ... //depot/proj/main/a.c#3 edit\n\
             ... //depot/proj/main/b.c#1 add\n\
             \n",
        );
        let desc = parse_describe(&out).unwrap();
        assert!(desc.pending);
        assert_eq!(desc.files.len(), 2);
        assert_eq!(desc.branch, "main/proj");
    }

    #[test]
    fn test_parse_describe_errors() {
        let out = lines("Change 1 by joe@ws on 2009/01/01\n\n\tdesc\n");
        assert!(matches!(parse_describe(&out), Err(ScmError::NoAffectedFiles)));

        let out = lines("Change 1\nAffected files ...\n\n... //depot/a#1 purge\n");
        assert!(matches!(
            parse_describe(&out),
            Err(ScmError::UnsupportedLine(line)) if line.contains("purge")
        ));
    }

    #[test]
    fn test_branch_tracker_labels() {
        let mut tracker = BranchTracker::default();
        assert_eq!(tracker.label(), "(none)");

        tracker.observe("... //depot/proj/main/a.c#1 edit");
        assert_eq!(tracker.label(), "main/proj");

        tracker.observe("... //depot/other/main/b.c#1 edit");
        assert_eq!(tracker.label(), "main/(multiple projects)");
        tracker.observe("... //depot/proj/main/c.c#1 edit");
        assert_eq!(tracker.label(), "main/(multiple projects)");

        tracker.observe("... //depot/proj/rel1/d.c#1 edit");
        assert_eq!(tracker.label(), "(multiple branches)");
        tracker.observe("... //depot/proj/main/e.c#1 edit");
        assert_eq!(tracker.label(), "(multiple branches)");
    }

    #[test]
    fn test_parse_changes_joins_descriptions() {
        let out = lines(
            "Change 12 on 2009/01/02 by joe@ws *pending*\n\
             \n\
             \tFirst line\n\
             \tsecond line\n\
             \n\
             Change 11 on 2009/01/01 by joe@ws\n\
             \n\
             Change 10 on 2009/01/01 by joe@ws\n\
             \n\
             \tOlder change\n",
        );
        assert_eq!(
            parse_changes(&out),
            vec![
                ("12".to_string(), "First line second line".to_string()),
                ("10".to_string(), "Older change".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_where_uses_last_line() {
        let out = "-//depot/main/x //ws/x /home/joe/ws/x\n\
                   //depot/main/testing //joe:test05:home/testing /home/joe/versioned/testing\n";
        assert_eq!(parse_where(out).as_deref(), Some("/home/joe/versioned/testing"));
        assert!(parse_where("").is_none());
    }

    #[test]
    fn test_parse_server_address() {
        let info = "User name: joe\nServer address: perforce:1666\nServer root: /p4\n";
        assert_eq!(parse_server_address(info).as_deref(), Some("perforce:1666"));
        assert!(parse_server_address("User name: joe\n").is_none());
    }

    #[tokio::test]
    async fn test_diff_rejects_bad_change_number() {
        let scratch = tempfile::tempdir().unwrap();
        let scm = PerforceScm::new(
            None,
            None,
            "joe",
            25,
            Synthesizer::new(Box::new(crate::diff::BuiltinDiff), scratch.path()),
        );
        let err = scm.diff(&["abc".to_string()]).await.unwrap_err();
        assert!(matches!(err, CoreError::Scm(ScmError::InvalidChangeNumber(_))));

        let err = scm.diff(&[]).await.unwrap_err();
        assert!(matches!(err, CoreError::Scm(ScmError::MissingArgument(_))));
    }
}
