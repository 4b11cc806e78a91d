//! Rewriting raw diff tool output into review-ready file sections.

use std::sync::OnceLock;

use regex_lite::Regex;

use crate::errors::ParseError;

use super::FileChange;

/// Raw primitive output after header rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Rewritten {
    pub text: Vec<u8>,
    pub binary: bool,
    pub unmodified: bool,
}

fn iso_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d{4}-\d\d-\d\d \d\d:\d\d:\d\d)").expect("iso timestamp regex")
    })
}

fn ctime_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\w+)\s+(\w+)\s+(\d+)\s+(\d\d:\d\d:\d\d)\s+(\d{4})")
            .expect("ctime timestamp regex")
    })
}

fn month_number(name: &str) -> Option<&'static str> {
    Some(match name {
        "Jan" => "01",
        "Feb" => "02",
        "Mar" => "03",
        "Apr" => "04",
        "May" => "05",
        "Jun" => "06",
        "Jul" => "07",
        "Aug" => "08",
        "Sep" => "09",
        "Oct" => "10",
        "Nov" => "11",
        "Dec" => "12",
        _ => return None,
    })
}

/// Pull the modification time out of a `+++` header line as
/// `YYYY-MM-DD HH:MM:SS`.
///
/// Accepts the ISO form GNU diff prints and the `Www Mmm D HH:MM:SS YYYY`
/// form older tools print.
pub fn normalize_timestamp(line: &str) -> Result<String, ParseError> {
    if let Some(caps) = iso_pattern().captures(line) {
        return Ok(caps[1].to_string());
    }

    let unparseable = || ParseError::DiffHeader(line.trim_end().to_string());
    let caps = ctime_pattern().captures(line).ok_or_else(unparseable)?;
    let month = month_number(&caps[2]).ok_or_else(unparseable)?;
    Ok(format!(
        "{}-{}-{:0>2} {}",
        &caps[5], month, &caps[3], &caps[4]
    ))
}

/// Apply the header rules to the primitive's output for one file.
///
/// `old_name` and `new_name` are the scratch paths the primitive was given.
/// Only the two header lines are read as text; hunk bytes pass through.
pub(crate) fn rewrite(
    output: &[u8],
    old_name: &str,
    new_name: &str,
    change: &FileChange,
) -> Result<Rewritten, ParseError> {
    let mut lines: Vec<Vec<u8>> = output
        .split_inclusive(|b| *b == b'\n')
        .map(<[u8]>::to_vec)
        .collect();

    let files_differ = format!("Files {} and {} differ", old_name, new_name);
    if lines.len() == 1 && lines[0].starts_with(files_differ.as_bytes()) {
        let marker = format!("Binary files {} and {} differ\n", old_name, new_name);
        lines = vec![marker.into_bytes()];
    }

    let unmodified = lines.is_empty();
    let binary = lines
        .first()
        .map_or(false, |l| l.starts_with(b"Binary files "));

    if unmodified || binary {
        lines.insert(
            0,
            format!(
                "==== {}#{} =={}== {} ====\n",
                change.depot_path,
                change.base_revision,
                change.kind.marker(),
                change.local_path
            )
            .into_bytes(),
        );
    } else {
        if lines.len() < 2 {
            let text = String::from_utf8_lossy(output);
            return Err(ParseError::DiffHeader(text.trim_end().to_string()));
        }
        let timestamp = normalize_timestamp(&String::from_utf8_lossy(&lines[1]))?;
        lines[0] = format!(
            "--- {}\t{}#{}\n",
            change.local_path, change.depot_path, change.base_revision
        )
        .into_bytes();
        lines[1] = format!("+++ {}\t{}\n", change.local_path, timestamp).into_bytes();
    }

    Ok(Rewritten {
        text: lines.concat(),
        binary,
        unmodified,
    })
}
