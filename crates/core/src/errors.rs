//! Error types for the post-review core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    ContentUnavailable(#[from] ContentUnavailableError),

    #[error(transparent)]
    Scm(#[from] ScmError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Scratch file handling failed.
    #[error("scratch file error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// DTR protocol errors
// ---------------------------------------------------------------------------

/// Errors from the DTR request/response transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The server answered with a status outside the 2xx range.
    #[error("received bad response from {server}: {status} {reason}")]
    BadStatus {
        server: String,
        status: u16,
        reason: String,
    },

    /// The server dropped the persistent connection before a status line
    /// could be read.
    #[error("connection to {server} dropped: {detail}")]
    ConnectionDropped { server: String, detail: String },

    /// Any other HTTP-level failure (DNS, TLS, body read).
    #[error("DTR HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The request could not be built.
    #[error("invalid DTR request {method} {path}: {detail}")]
    InvalidRequest {
        method: String,
        path: String,
        detail: String,
    },
}

impl ProtocolError {
    /// Whether this failure is the server silently closing a kept-alive
    /// connection, which warrants one reconnect.
    pub fn is_connection_drop(&self) -> bool {
        matches!(self, Self::ConnectionDropped { .. })
    }
}

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

/// Errors from decoding server responses and diff tool output.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The response body is not well-formed XML.
    #[error("malformed XML response: {0}")]
    Xml(String),

    /// `x:resource-type` was missing or not one of the known kinds.
    #[error("unknown resource type: {}", .0.as_deref().unwrap_or("<missing>"))]
    UnknownResourceType(Option<String>),

    /// A numeric property did not hold an integer.
    #[error("invalid number in <{field}>: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    /// A date property did not match its expected format.
    #[error("invalid timestamp in <{field}>: '{value}'")]
    InvalidTimestamp { field: &'static str, value: String },

    /// The diff tool's file header carried no recognizable timestamp.
    #[error("unable to parse diff header: {0}")]
    DiffHeader(String),
}

// ---------------------------------------------------------------------------
// Content errors
// ---------------------------------------------------------------------------

/// Errors raised when the bytes of a changed file cannot be obtained.
#[derive(Debug, Error)]
pub enum ContentUnavailableError {
    /// The open activity lives on another machine; its current content is
    /// only on that machine's disk.
    #[error(
        "the open activity you are attempting to submit for review is located on another \
         machine ({owner_host}); please submit the change from that machine"
    )]
    WrongMachine {
        owner_host: String,
        local_host: String,
    },

    /// The activity has no client host/path recorded.
    #[error("activity {0} does not record the client it was opened on")]
    MissingClient(String),

    /// Historical content needs an integration sequence number.
    #[error("activity {0} has no integration to address historical content")]
    MissingIntegration(String),

    /// The activity's workspace was never resolved.
    #[error("activity {0} has no resolved workspace")]
    MissingWorkspace(String),

    /// The resource has no predecessor to use as a baseline.
    #[error("resource {0} has no predecessor")]
    MissingPredecessor(String),

    /// Reading a local file failed.
    #[error("failed to read {path}: {source}")]
    LocalRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// SCM command-line errors
// ---------------------------------------------------------------------------

/// Errors from backends that drive a native command-line tool.
#[derive(Debug, Error)]
pub enum ScmError {
    /// The tool binary was not found on `$PATH`.
    #[error("{0} binary not found")]
    BinaryNotFound(String),

    /// A command exited with a status that was not tolerated.
    #[error("failed to execute command: {command} (exit {exit_code})\n{output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// The command-line arguments do not name what the backend needs.
    #[error("{0}")]
    MissingArgument(String),

    /// `p4 describe` produced a line the adapter does not understand.
    #[error("unsupported line from p4: {0}")]
    UnsupportedLine(String),

    /// `p4 describe` listed no affected files.
    #[error("couldn't find any affected files for this change")]
    NoAffectedFiles,

    /// The change number is not an integer.
    #[error("you must enter a valid change number, got '{0}'")]
    InvalidChangeNumber(String),

    /// No repository of the backend's kind was found.
    #[error("no {0} repository found")]
    NoRepository(&'static str),

    /// The backend does not implement the requested operation.
    #[error("{backend} does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// Generic I/O wrapper.
    #[error("scm I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = ProtocolError::BadStatus {
            server: "dtr:50000".into(),
            status: 404,
            reason: "Not Found".into(),
        };
        assert_eq!(
            err.to_string(),
            "received bad response from dtr:50000: 404 Not Found"
        );

        let err = ParseError::UnknownResourceType(None);
        assert_eq!(err.to_string(), "unknown resource type: <missing>");

        let err = ContentUnavailableError::WrongMachine {
            owner_host: "BUILD01".into(),
            local_host: "laptop".into(),
        };
        assert!(err.to_string().contains("(BUILD01)"));

        let err = ScmError::Unsupported {
            backend: "git",
            operation: "revision ranges",
        };
        assert_eq!(err.to_string(), "git does not support revision ranges");
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = ParseError::Xml("eof".into()).into();
        assert!(matches!(core_err, CoreError::Parse(_)));

        let core_err: CoreError = ScmError::NoAffectedFiles.into();
        assert!(matches!(core_err, CoreError::Scm(_)));
    }

    #[test]
    fn test_connection_drop_classification() {
        let dropped = ProtocolError::ConnectionDropped {
            server: "dtr".into(),
            detail: "reset".into(),
        };
        assert!(dropped.is_connection_drop());

        let status = ProtocolError::BadStatus {
            server: "dtr".into(),
            status: 500,
            reason: "Internal Server Error".into(),
        };
        assert!(!status.is_connection_drop());
    }
}
