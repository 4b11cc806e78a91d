//! Running external source-control tools.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::ScmError;

/// How a command's exit status is judged.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory; the current one when unset.
    pub cwd: Option<PathBuf>,
    /// Non-zero exit codes that still count as success.
    pub tolerated_exit_codes: Vec<i32>,
    /// Accept any exit status.
    pub ignore_errors: bool,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl ExecOptions {
    pub fn tolerating(codes: &[i32]) -> Self {
        Self {
            tolerated_exit_codes: codes.to_vec(),
            ..Self::default()
        }
    }

    pub fn ignoring_errors() -> Self {
        Self {
            ignore_errors: true,
            ..Self::default()
        }
    }

    fn accepts(&self, code: i32) -> bool {
        self.ignore_errors || code == 0 || self.tolerated_exit_codes.contains(&code)
    }
}

/// Run `program` with `args` under an English UTF-8 locale and return its
/// standard output untouched.
pub async fn run_command_bytes(
    program: &str,
    args: &[&str],
    options: &ExecOptions,
) -> Result<Vec<u8>, ScmError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .env("LC_ALL", "en_US.UTF-8")
        .env("LANGUAGE", "en_US.UTF-8")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &options.cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }

    let command_line = format!("{} {}", program, args.join(" "));
    debug!(cmd = %command_line, "running command");
    let output = cmd.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ScmError::BinaryNotFound(program.to_string())
        } else {
            ScmError::IoError(e)
        }
    })?;

    let exit_code = output.status.code().unwrap_or(-1);
    if !options.accepts(exit_code) {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let stdout = String::from_utf8_lossy(&output.stdout);
        warn!(exit_code, %stderr, "command failed");
        return Err(ScmError::CommandFailed {
            command: command_line,
            exit_code,
            output: format!("{}{}", stdout, stderr),
        });
    }
    Ok(output.stdout)
}

/// Like [`run_command_bytes`], for tools whose output is read as text.
pub async fn run_command(
    program: &str,
    args: &[&str],
    options: &ExecOptions,
) -> Result<String, ScmError> {
    let stdout = run_command_bytes(program, args, options).await?;
    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

/// Run a command and split its output into lines.
pub async fn run_command_lines(
    program: &str,
    args: &[&str],
    options: &ExecOptions,
) -> Result<Vec<String>, ScmError> {
    let output = run_command(program, args, options).await?;
    Ok(output.lines().map(str::to_string).collect())
}

/// Whether `program` can be started at all.
pub async fn is_available(program: &str, check_args: &[&str]) -> bool {
    !matches!(
        run_command(program, check_args, &ExecOptions::ignoring_errors()).await,
        Err(ScmError::BinaryNotFound(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_acceptance() {
        assert!(ExecOptions::default().accepts(0));
        assert!(!ExecOptions::default().accepts(1));
        assert!(ExecOptions::tolerating(&[1]).accepts(1));
        assert!(!ExecOptions::tolerating(&[1]).accepts(2));
        assert!(ExecOptions::ignoring_errors().accepts(128));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = run_command("post-review-no-such-tool", &[], &ExecOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScmError::BinaryNotFound(name) if name == "post-review-no-such-tool"));
        assert!(!is_available("post-review-no-such-tool", &["--version"]).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout_and_tolerates_codes() {
        let out = run_command("sh", &["-c", "echo hello"], &ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "hello\n");

        let out = run_command("sh", &["-c", "echo diff; exit 1"], &ExecOptions::tolerating(&[1]))
            .await
            .unwrap();
        assert_eq!(out, "diff\n");

        let err = run_command("sh", &["-c", "echo oops >&2; exit 3"], &ExecOptions::default())
            .await
            .unwrap_err();
        match err {
            ScmError::CommandFailed { exit_code, output, .. } => {
                assert_eq!(exit_code, 3);
                assert!(output.contains("oops"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bytes_output_is_not_reencoded() {
        let out = run_command_bytes("printf", &["caf\\351\\n"], &ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(out, b"caf\xe9\n");
    }
}
