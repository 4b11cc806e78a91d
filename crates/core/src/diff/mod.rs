//! Diff synthesis: turning per-file old/new contents into one patch.
//!
//! Backends classify each changed file and fetch its two sides; the
//! [`Synthesizer`] writes both sides to scratch files, runs a
//! [`DiffPrimitive`] over them and rewrites the headers so they name the
//! repository path and base revision instead of the scratch files. A
//! [`SynthesisReport`] collects the per-file sections in order.

mod header;
pub mod primitive;
pub mod scratch;

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::AppConfig;
use crate::errors::CoreError;

pub use header::normalize_timestamp;
pub use primitive::{BuiltinDiff, DiffPrimitive, ExternalDiff};

/// Rule printed under each `Index:` line.
pub const INDEX_RULE_WIDTH: usize = 67;

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Single-letter marker used in synthetic headers.
    pub fn marker(&self) -> char {
        match self {
            Self::Added => 'A',
            Self::Modified => 'M',
            Self::Deleted => 'D',
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self {
            Self::Added => "add",
            Self::Modified => "edit",
            Self::Deleted => "delete",
        };
        f.write_str(word)
    }
}

/// How file sections are introduced in the final patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeaderStyle {
    /// Sections follow each other directly.
    #[default]
    Plain,
    /// Each section starts with `Index: <path>` and a rule.
    Indexed,
}

/// One changed file, with both sides already fetched.
#[derive(Debug, Clone)]
pub struct FileChange {
    /// Repository-side name shown in headers.
    pub depot_path: String,
    pub base_revision: i64,
    pub kind: ChangeKind,
    /// Name shown on the `---`/`+++` lines.
    pub local_path: String,
    /// Name shown on the `Index:` line.
    pub index_path: String,
    pub old: Vec<u8>,
    pub new: Vec<u8>,
}

/// Per-file result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub depot_path: String,
    pub base_revision: i64,
    pub kind: ChangeKind,
    pub local_path: String,
    pub index_path: String,
    pub diff: Vec<u8>,
    pub binary: bool,
    pub unmodified: bool,
}

/// A file listed as changed whose contents did not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialChangeWarning {
    pub local_path: String,
}

impl fmt::Display for PartialChangeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in your changeset is unmodified", self.local_path)
    }
}

/// Ordered file sections of one patch.
#[derive(Debug, Clone, Default)]
pub struct SynthesisReport {
    pub style: HeaderStyle,
    pub records: Vec<ChangeRecord>,
    pub warnings: Vec<PartialChangeWarning>,
}

impl SynthesisReport {
    pub fn new(style: HeaderStyle) -> Self {
        Self {
            style,
            records: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn push(&mut self, record: ChangeRecord) {
        if record.unmodified {
            let warning = PartialChangeWarning {
                local_path: record.local_path.clone(),
            };
            warn!(path = %record.local_path, "{}", warning);
            self.warnings.push(warning);
        }
        self.records.push(record);
    }

    /// Concatenate every section into the final patch.
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for record in &self.records {
            if self.style == HeaderStyle::Indexed {
                let header = format!(
                    "Index: {}\n{}\n",
                    record.index_path,
                    "=".repeat(INDEX_RULE_WIDTH)
                );
                out.extend_from_slice(header.as_bytes());
            }
            out.extend_from_slice(&record.diff);
        }
        out
    }
}

/// Runs the diff primitive over scratch copies of each file change.
pub struct Synthesizer {
    primitive: Box<dyn DiffPrimitive>,
    scratch_dir: PathBuf,
}

impl Synthesizer {
    pub fn new(primitive: Box<dyn DiffPrimitive>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            primitive,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(primitive::from_config(&config.diff), config.scratch_dir())
    }

    /// Diff one file. Scratch files are gone when this returns, whether it
    /// succeeds or not.
    #[instrument(skip(self, change), fields(path = %change.local_path, kind = %change.kind))]
    pub async fn synthesize(&self, change: FileChange) -> Result<ChangeRecord, CoreError> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        let old = scratch::write_scratch(&self.scratch_dir, &change.old)?;
        let new = scratch::write_scratch(&self.scratch_dir, &change.new)?;
        let old_name = old.path().display().to_string();
        let new_name = new.path().display().to_string();

        let output = self.primitive.diff(old.path(), new.path()).await?;
        let rewritten = header::rewrite(&output, &old_name, &new_name, &change)?;
        debug!(
            primitive = self.primitive.name(),
            binary = rewritten.binary,
            unmodified = rewritten.unmodified,
            "synthesized file diff"
        );

        Ok(ChangeRecord {
            depot_path: change.depot_path,
            base_revision: change.base_revision,
            kind: change.kind,
            local_path: change.local_path,
            index_path: change.index_path,
            diff: rewritten.text,
            binary: rewritten.binary,
            unmodified: rewritten.unmodified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;

    fn change(kind: ChangeKind, old: &[u8], new: &[u8]) -> FileChange {
        FileChange {
            depot_path: "/dtr/ws/p/sc_c/dev/active/src/a.txt".into(),
            base_revision: 41,
            kind,
            local_path: "a.txt".into(),
            index_path: "/src/a.txt".into(),
            old: old.to_vec(),
            new: new.to_vec(),
        }
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    struct GarbagePrimitive;

    #[async_trait]
    impl DiffPrimitive for GarbagePrimitive {
        fn name(&self) -> &str {
            "garbage"
        }

        async fn diff(&self, _old: &Path, _new: &Path) -> Result<Vec<u8>, CoreError> {
            Ok(b"--- x\n+++ y with no time\n@@ -1 +1 @@\n".to_vec())
        }
    }

    #[tokio::test]
    async fn test_edit_rewrites_headers_and_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let synth = Synthesizer::new(Box::new(BuiltinDiff), scratch.path());

        let record = synth
            .synthesize(change(ChangeKind::Modified, b"a\nb\n", b"a\nc\n"))
            .await
            .unwrap();
        let text = String::from_utf8(record.diff.clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "--- a.txt\t/dtr/ws/p/sc_c/dev/active/src/a.txt#41");
        assert!(lines[1].starts_with("+++ a.txt\t"));
        assert!(lines[2].starts_with("@@"));
        assert!(!record.binary && !record.unmodified);
        assert!(dir_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_latin1_edit_keeps_its_bytes() {
        let scratch = tempfile::tempdir().unwrap();
        let synth = Synthesizer::new(Box::new(BuiltinDiff), scratch.path());

        let record = synth
            .synthesize(change(
                ChangeKind::Modified,
                b"// caf\xe9\nint a;\n",
                b"// caf\xe9\nint b;\n",
            ))
            .await
            .unwrap();
        assert!(!record.binary);
        assert!(record
            .diff
            .starts_with(b"--- a.txt\t/dtr/ws/p/sc_c/dev/active/src/a.txt#41\n+++ a.txt\t"));
        let lines: Vec<&[u8]> = record.diff.split(|b| *b == b'\n').collect();
        assert!(lines.contains(&&b" // caf\xe9"[..]));
        assert!(lines.contains(&&b"+int b;"[..]));
        assert!(dir_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_binary_pair_yields_one_marker_line() {
        let scratch = tempfile::tempdir().unwrap();
        let synth = Synthesizer::new(Box::new(BuiltinDiff), scratch.path());

        let record = synth
            .synthesize(change(ChangeKind::Added, b"", b"\x89PNG\x00\x01"))
            .await
            .unwrap();
        assert!(record.binary);
        let text = String::from_utf8(record.diff).unwrap();
        let markers = text
            .lines()
            .filter(|l| l.starts_with("Binary files ") && l.ends_with(" differ"))
            .count();
        assert_eq!(markers, 1);
        assert!(!text.contains("@@"));
        assert!(text.starts_with("==== /dtr/ws/p/sc_c/dev/active/src/a.txt#41 ==A== a.txt ====\n"));
    }

    #[tokio::test]
    async fn test_unmodified_file_warns_and_continues() {
        let scratch = tempfile::tempdir().unwrap();
        let synth = Synthesizer::new(Box::new(BuiltinDiff), scratch.path());
        let mut report = SynthesisReport::new(HeaderStyle::Indexed);

        report.push(
            synth
                .synthesize(change(ChangeKind::Modified, b"same\n", b"same\n"))
                .await
                .unwrap(),
        );
        report.push(
            synth
                .synthesize(change(ChangeKind::Modified, b"x\n", b"y\n"))
                .await
                .unwrap(),
        );

        assert_eq!(report.records.len(), 2);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(
            report.warnings[0].to_string(),
            "a.txt in your changeset is unmodified"
        );
        let patch = String::from_utf8(report.render()).unwrap();
        assert_eq!(patch.matches("Index: /src/a.txt\n").count(), 2);
        assert!(patch.contains(&format!("Index: /src/a.txt\n{}\n====", "=".repeat(67))));
    }

    #[tokio::test]
    async fn test_parse_failure_still_removes_scratch_files() {
        let scratch = tempfile::tempdir().unwrap();
        let synth = Synthesizer::new(Box::new(GarbagePrimitive), scratch.path());
        let err = synth
            .synthesize(change(ChangeKind::Modified, b"1\n", b"2\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Parse(_)));
        assert!(dir_is_empty(scratch.path()));
    }

    #[test]
    fn test_plain_style_has_no_index_lines() {
        let mut report = SynthesisReport::new(HeaderStyle::Plain);
        report.push(ChangeRecord {
            depot_path: "//depot/a".into(),
            base_revision: 1,
            kind: ChangeKind::Deleted,
            local_path: "//depot/a".into(),
            index_path: "//depot/a".into(),
            diff: b"--- a\n+++ a\n".to_vec(),
            binary: false,
            unmodified: false,
        });
        assert_eq!(report.render(), b"--- a\n+++ a\n");
    }
}
