//! Line-diff engines that compare two files on disk.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tracing::debug;

use crate::config::{DiffConfig, DiffTool};
use crate::errors::CoreError;
use crate::exec::{self, ExecOptions};

/// Produces unified-diff text for two files.
///
/// Output follows `diff -u` conventions: `---`/`+++` file headers followed
/// by `@@` hunks, a single `Files <old> and <new> differ` line for non-text
/// input, and nothing at all when the files are identical. Hunk lines carry
/// the file bytes as they are, whatever their encoding.
#[async_trait]
pub trait DiffPrimitive: Send + Sync {
    fn name(&self) -> &str;

    async fn diff(&self, old: &Path, new: &Path) -> Result<Vec<u8>, CoreError>;
}

/// Build the primitive the configuration asks for.
pub fn from_config(config: &DiffConfig) -> Box<dyn DiffPrimitive> {
    match config.tool {
        DiffTool::Builtin => Box::new(BuiltinDiff),
        DiffTool::External => Box::new(ExternalDiff::new(config.program.clone())),
    }
}

/// In-process diff using `diffy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinDiff;

/// `diff` treats a file as binary when it holds a NUL byte; any other
/// encoding is diffed line by line.
fn is_binary(bytes: &[u8]) -> bool {
    bytes.contains(&0)
}

async fn header_time(path: &Path) -> Result<String, CoreError> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    let local: DateTime<Local> = modified.into();
    Ok(local.format("%Y-%m-%d %H:%M:%S%.9f %z").to_string())
}

#[async_trait]
impl DiffPrimitive for BuiltinDiff {
    fn name(&self) -> &str {
        "builtin"
    }

    async fn diff(&self, old: &Path, new: &Path) -> Result<Vec<u8>, CoreError> {
        let old_bytes = tokio::fs::read(old).await?;
        let new_bytes = tokio::fs::read(new).await?;
        if old_bytes == new_bytes {
            return Ok(Vec::new());
        }

        if is_binary(&old_bytes) || is_binary(&new_bytes) {
            debug!("non-text input, reporting files as differing");
            let marker = format!("Files {} and {} differ\n", old.display(), new.display());
            return Ok(marker.into_bytes());
        }

        let patch = diffy::create_patch_bytes(&old_bytes, &new_bytes).to_bytes();
        let hunks: Vec<u8> = patch
            .split_inclusive(|b| *b == b'\n')
            .skip_while(|line| !line.starts_with(b"@@"))
            .flatten()
            .copied()
            .collect();
        if hunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = format!(
            "--- {}\t{}\n+++ {}\t{}\n",
            old.display(),
            header_time(old).await?,
            new.display(),
            header_time(new).await?,
        )
        .into_bytes();
        out.extend_from_slice(&hunks);
        Ok(out)
    }
}

/// A `diff -urNp` compatible program on `$PATH`.
#[derive(Debug, Clone)]
pub struct ExternalDiff {
    program: String,
}

impl ExternalDiff {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DiffPrimitive for ExternalDiff {
    fn name(&self) -> &str {
        &self.program
    }

    async fn diff(&self, old: &Path, new: &Path) -> Result<Vec<u8>, CoreError> {
        let old = old.to_string_lossy().into_owned();
        let new = new.to_string_lossy().into_owned();
        // Exit status 1 means differences were found.
        let output = exec::run_command_bytes(
            &self.program,
            &["-urNp", old.as_str(), new.as_str()],
            &ExecOptions::tolerating(&[1, 2]),
        )
        .await?;
        Ok(output)
    }
}
