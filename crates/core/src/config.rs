//! TOML-based configuration for post-review.
//!
//! Sensitive values (the DTR password) are stored as `_env` fields that
//! reference environment variable names. The actual secrets are resolved at
//! runtime via [`AppConfig::resolve_env_vars`]. The file is only ever read;
//! `post-review init` is the single place that writes one.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend selection and listing behaviour.
    #[serde(default)]
    pub scm: ScmConfig,

    /// DTR server connection settings.
    #[serde(default)]
    pub dtr: DtrConfig,

    /// Perforce environment overrides.
    #[serde(default)]
    pub perforce: PerforceConfig,

    /// Subversion settings.
    #[serde(default)]
    pub svn: SvnConfig,

    /// Git settings.
    #[serde(default)]
    pub git: GitConfig,

    /// Diff primitive and scratch file settings.
    #[serde(default)]
    pub diff: DiffConfig,
}

// ---------------------------------------------------------------------------
// SCM selection
// ---------------------------------------------------------------------------

/// The source-control backend a change is read from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Dtr,
    Perforce,
    Svn,
    Cvs,
    Mercurial,
    Git,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dtr => write!(f, "dtr"),
            Self::Perforce => write!(f, "perforce"),
            Self::Svn => write!(f, "svn"),
            Self::Cvs => write!(f, "cvs"),
            Self::Mercurial => write!(f, "mercurial"),
            Self::Git => write!(f, "git"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dtr" => Ok(Self::Dtr),
            "perforce" | "p4" => Ok(Self::Perforce),
            "svn" | "subversion" => Ok(Self::Svn),
            "cvs" => Ok(Self::Cvs),
            "mercurial" | "hg" => Ok(Self::Mercurial),
            "git" => Ok(Self::Git),
            other => Err(ConfigError::InvalidValue {
                field: "scm.backend".into(),
                detail: format!("unknown backend '{}'", other),
            }),
        }
    }
}

/// Backend selection and open-change listing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScmConfig {
    /// Which backend to read changes from.
    #[serde(default)]
    pub backend: Backend,

    /// SCM user whose open changes are listed. Defaults to the login name.
    #[serde(default)]
    pub user: Option<String>,

    /// Include submitted changes when listing.
    #[serde(default)]
    pub show_submitted: bool,

    /// Maximum number of Perforce changelists listed.
    #[serde(default = "default_max_changes")]
    pub max_changes: u32,

    /// Maximum age in days of closed DTR activities that are listed.
    #[serde(default = "default_max_activity_age")]
    pub max_activity_age_days: u32,
}

fn default_max_changes() -> u32 {
    25
}
fn default_max_activity_age() -> u32 {
    90
}

impl Default for ScmConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            user: None,
            show_submitted: false,
            max_changes: default_max_changes(),
            max_activity_age_days: default_max_activity_age(),
        }
    }
}

impl ScmConfig {
    /// The configured SCM user, falling back to the login name of the
    /// current process.
    pub fn effective_user(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// DTR
// ---------------------------------------------------------------------------

/// DTR server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtrConfig {
    /// `host:port` (or full `http(s)://` URL) of the DTR server.
    #[serde(default = "default_dtr_server")]
    pub server: String,

    /// User name for HTTP Basic authentication.
    #[serde(default)]
    pub username: String,

    /// Environment variable holding the DTR password.
    #[serde(default = "default_dtr_password_env")]
    pub password_env: String,

    /// Host name compared against an open activity's client host. Defaults
    /// to this machine's name.
    #[serde(default)]
    pub local_host: Option<String>,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_dtr_server() -> String {
    "dtr:50000".into()
}
fn default_dtr_password_env() -> String {
    "DTR_PASSWORD".into()
}

impl Default for DtrConfig {
    fn default() -> Self {
        Self {
            server: default_dtr_server(),
            username: String::new(),
            password_env: default_dtr_password_env(),
            local_host: None,
            password: None,
        }
    }
}

impl DtrConfig {
    /// The configured local host, or this machine's host name.
    pub fn effective_local_host(&self) -> String {
        self.local_host.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }
}

// ---------------------------------------------------------------------------
// Perforce / Subversion / Git
// ---------------------------------------------------------------------------

/// Perforce environment overrides (exported as `P4CLIENT` / `P4PORT`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerforceConfig {
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub port: Option<String>,
}

/// Subversion settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SvnConfig {
    /// Diff against this repository URL instead of the working copy.
    #[serde(default)]
    pub repository_url: Option<String>,
}

/// Git settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Branch the change is diffed against.
    #[serde(default = "default_parent_branch")]
    pub parent_branch: String,
}

fn default_parent_branch() -> String {
    "master".into()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            parent_branch: default_parent_branch(),
        }
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Which diff primitive the synthesizer runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiffTool {
    /// In-process unified diff.
    #[default]
    Builtin,
    /// An external `diff -urNp` compatible program.
    External,
}

/// Diff primitive and scratch file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffConfig {
    #[serde(default)]
    pub tool: DiffTool,

    /// Program used when `tool = "external"`.
    #[serde(default = "default_diff_program")]
    pub program: String,

    /// Directory for scratch files. Defaults to the system temp directory.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

fn default_diff_program() -> String {
    "diff".into()
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            tool: DiffTool::default(),
            program: default_diff_program(),
            scratch_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve `*_env` fields from environment variables.
    ///
    /// A missing variable logs a warning but does not fail; the DTR backend
    /// then authenticates with an empty password.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");
        self.dtr.password = resolve_optional_env(&self.dtr.password_env, "dtr.password_env");
        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that the fields the selected backend needs are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scm.backend == Backend::Dtr {
            if self.dtr.server.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "dtr.server".into(),
                    detail: "DTR server must not be empty".into(),
                });
            }
            if self.dtr.username.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "dtr.username".into(),
                    detail: "DTR username must not be empty".into(),
                });
            }
        }
        if self.scm.max_changes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scm.max_changes".into(),
                detail: "must be > 0".into(),
            });
        }
        if self.diff.tool == DiffTool::External && self.diff.program.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "diff.program".into(),
                detail: "an external diff tool needs a program".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Directory the synthesizer creates scratch files in.
    pub fn scratch_dir(&self) -> PathBuf {
        self.diff
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
