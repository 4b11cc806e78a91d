//! Short-lived files handed to the diff primitive.

use std::io::Write;
use std::path::Path;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

/// Hex prefix of the SHA-256 of `contents`, used to name scratch files.
pub fn content_tag(contents: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(contents));
    digest[..12].to_string()
}

/// Write `contents` to a new file in `dir`. The file is deleted when the
/// returned handle drops.
pub fn write_scratch(dir: &Path, contents: &[u8]) -> std::io::Result<NamedTempFile> {
    let prefix = format!("post-review-{}-", content_tag(contents));
    let mut file = tempfile::Builder::new().prefix(&prefix).tempfile_in(dir)?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(file)
}
