//! How post-review's messages look on a terminal. Diffs themselves are
//! written raw; only the notes around them go through here.

use std::fmt::Display;
use std::path::Path;

use console::Style;

/// Top-level failure, printed once before exiting.
pub fn failure(err: &anyhow::Error) -> String {
    format!("{} {:#}", Style::new().red().bold().apply_to("error:"), err)
}

/// The backend produced an empty diff.
pub fn no_diff() -> String {
    Style::new()
        .yellow()
        .apply_to("There don't seem to be any diffs.")
        .to_string()
}

/// Branch label a diff should be posted against.
pub fn branch(label: &str) -> String {
    format!(
        "{} {}",
        Style::new().dim().apply_to("Branch:"),
        Style::new().cyan().apply_to(label)
    )
}

/// Something was saved to `path`.
pub fn written(what: &str, path: &Path) -> String {
    format!(
        "{} {} written to {}",
        Style::new().green().apply_to("✓"),
        what,
        Style::new().bold().apply_to(path.display())
    )
}

/// Title above a listing or summary, naming the backend it came from.
pub fn heading(title: &str, backend: &str) -> String {
    format!(
        "{} {}",
        Style::new().bold().apply_to(title),
        Style::new().dim().apply_to(format!("({})", backend))
    )
}

pub fn hint(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// One line of `validate` output.
pub fn check(passed: bool, msg: impl Display) -> String {
    let mark = if passed {
        Style::new().green().apply_to("[OK]  ")
    } else {
        Style::new().red().apply_to("[FAIL]")
    };
    format!("  {} {}", mark, msg)
}
