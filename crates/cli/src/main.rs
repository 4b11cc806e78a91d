//! post-review command-line tool.
//!
//! Turns a pending change in the configured source-control backend into a
//! unified diff, lists the changes the current user could submit, and
//! generates / validates configuration files.

mod style;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use postreview_core::config::{AppConfig, Backend};
use postreview_core::scm::{self, ChangeSummary, NO_BRANCH};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// post-review command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "post-review",
    version,
    about = "Generate review diffs from DTR, Perforce, Subversion, CVS, Mercurial and Git"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the backend named in the configuration.
    #[arg(short, long, global = true)]
    backend: Option<Backend>,

    /// Log backend commands and server requests.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the diff of a change.
    Diff {
        /// Change identifier: a DTR activity, a Perforce change number,
        /// or files for the file-based backends.
        args: Vec<String>,

        /// Diff between two revisions written `a:b` instead.
        #[arg(short, long)]
        revision_range: Option<String>,

        /// Write the diff here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the parent branch diff here, when the backend produces one.
        #[arg(long)]
        parent_output: Option<PathBuf>,
    },

    /// List the changes the current user could submit for review.
    Changes {
        /// Include already submitted changes.
        #[arg(long)]
        include_submitted: bool,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show the repository the backend works against.
    Info,

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("postreview_core=debug,post_review=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::failure(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    match cli.command {
        Commands::Init { output } => cmd_init(&output.unwrap_or(config_path)),
        Commands::Validate => cmd_validate(&config_path, cli.backend),
        Commands::Diff {
            args,
            revision_range,
            output,
            parent_output,
        } => {
            let config = load_config(&config_path, cli.config.is_some(), cli.backend)?;
            cmd_diff(
                &config,
                &args,
                revision_range.as_deref(),
                output.as_deref(),
                parent_output.as_deref(),
            )
            .await
        }
        Commands::Changes {
            include_submitted,
            json,
        } => {
            let config = load_config(&config_path, cli.config.is_some(), cli.backend)?;
            cmd_changes(&config, include_submitted, json).await
        }
        Commands::Info => {
            let config = load_config(&config_path, cli.config.is_some(), cli.backend)?;
            cmd_info(&config).await
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("post-review")
        .join("config.toml")
}

/// Load the configuration. A missing file at the default location falls
/// back to built-in defaults; a missing file that was asked for is an error.
fn load_config(path: &Path, explicit: bool, backend: Option<Backend>) -> Result<AppConfig> {
    let mut config = if explicit || path.exists() {
        AppConfig::load_from_file(path).context("failed to load configuration file")?
    } else {
        tracing::debug!(path = %path.display(), "no configuration file, using defaults");
        AppConfig::default()
    };
    if let Some(backend) = backend {
        config.scm.backend = backend;
    }
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_diff(
    config: &AppConfig,
    args: &[String],
    revision_range: Option<&str>,
    output: Option<&Path>,
    parent_output: Option<&Path>,
) -> Result<()> {
    let client = scm::from_config(config);

    if let Some(range) = revision_range {
        let diff = client
            .diff_between_revisions(range, args)
            .await
            .with_context(|| format!("failed to diff revisions {}", range))?;
        return write_diff(&diff, "Diff", output);
    }

    let result = client.diff(args).await.context("failed to generate diff")?;
    if result.diff.is_empty() {
        eprintln!("{}", style::no_diff());
    }
    if let Some(branch) = &result.branch {
        eprintln!("{}", style::branch(branch));
    }
    write_diff(&result.diff, "Diff", output)?;

    match (&result.parent_diff, parent_output) {
        (Some(parent), Some(path)) => write_diff(parent, "Parent diff", Some(path))?,
        (Some(_), None) => eprintln!(
            "{}",
            style::hint("A parent diff was generated; pass --parent-output to save it.")
        ),
        _ => {}
    }
    Ok(())
}

/// Write diff bytes as they are; file content may be in any encoding.
fn write_diff(diff: &[u8], what: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, diff)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{}", style::written(what, path));
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(diff)
                .and_then(|()| stdout.flush())
                .context("failed to write diff to stdout")?;
        }
    }
    Ok(())
}

async fn cmd_changes(config: &AppConfig, include_submitted: bool, json: bool) -> Result<()> {
    let client = scm::from_config(config);
    let include_submitted = include_submitted || config.scm.show_submitted;
    let changes = client
        .get_open_changes(include_submitted)
        .await
        .context("failed to list changes")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
        return Ok(());
    }

    if changes.is_empty() {
        println!("{}", style::hint("No open changes."));
        return Ok(());
    }

    println!("{}", style::heading("Open changes", client.name()));
    println!("{}", changes_table(&changes));
    Ok(())
}

fn changes_table(changes: &[ChangeSummary]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Description", "Branch"]);

    for change in changes {
        table.add_row(vec![
            change.id.clone(),
            change.description.clone(),
            change.branch.clone().unwrap_or_else(|| NO_BRANCH.to_string()),
        ]);
    }
    table
}

async fn cmd_info(config: &AppConfig) -> Result<()> {
    let client = scm::from_config(config);
    match client
        .repository_info()
        .await
        .context("failed to inspect repository")?
    {
        Some(info) => {
            println!("{}", style::heading("Repository", client.name()));
            println!("  Path              : {}", info.path);
            println!(
                "  Base path         : {}",
                info.base_path.as_deref().unwrap_or("-")
            );
            println!("  Changesets        : {}", info.supports_changesets);
            println!("  Parent diffs      : {}", info.supports_parent_diffs);
            Ok(())
        }
        None => anyhow::bail!("no {} repository found", client.name()),
    }
}

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# post-review configuration

[scm]
# dtr, perforce, svn, cvs, mercurial or git
backend = "dtr"
# user = "jdoe"
show_submitted = false
max_changes = 25
max_activity_age_days = 90

[dtr]
server = "dtr.example.com:50000"
username = "dtr_user"
password_env = "DTR_PASSWORD"
# local_host = "WS-1234"

[perforce]
# client = "jdoe-ws"
# port = "perforce:1666"

[svn]
# repository_url = "https://svn.example.com/repo"

[git]
parent_branch = "master"

[diff]
# builtin or external
tool = "builtin"
program = "diff"
# scratch_dir = "/tmp/post-review"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("{}", style::written("Default configuration", output));
    println!();
    println!("Next steps:");
    println!("  1. Pick your backend and fill in its section");
    println!("  2. For DTR, export the password variable (DTR_PASSWORD by default)");
    println!(
        "  3. Validate with: post-review validate --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path, backend: Option<Backend>) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("{}", style::check(true, "TOML structure is valid"));

    if let Some(backend) = backend {
        config.scm.backend = backend;
    }

    // Missing variables are only warnings.
    let _ = config.resolve_env_vars();
    println!("{}", style::check(true, "Environment variable references processed"));

    match config.validate() {
        Ok(()) => {
            println!("{}", style::check(true, "All required fields are valid"));
        }
        Err(e) => {
            println!("{}", style::check(false, format!("Validation error: {}", e)));
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Backend       : {}", config.scm.backend);
    println!("  SCM user      : {}", config.scm.effective_user());
    if config.scm.backend == Backend::Dtr {
        println!("  DTR server    : {}", config.dtr.server);
        println!("  DTR user      : {}", config.dtr.username);
        println!(
            "  DTR password  : {}",
            if config.dtr.password.is_some() {
                "set"
            } else {
                "NOT SET"
            }
        );
        println!("  Local host    : {}", config.dtr.effective_local_host());
    }
    println!("  Diff tool     : {:?}", config.diff.tool);
    println!("  Scratch dir   : {}", config.scratch_dir().display());
    println!();
    println!("{}", style::check(true, "Configuration is valid."));

    Ok(())
}
