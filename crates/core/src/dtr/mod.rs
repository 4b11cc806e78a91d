//! DTR (Design Time Repository) support.
//!
//! DTR speaks a DeltaV-flavoured WebDAV dialect. An *activity* groups the
//! changes a developer makes; the [`client::DtrClient`] walks an activity's
//! integrations, versions and workspace so the diff synthesizer can produce
//! a patch for it.

pub mod client;
pub mod model;
pub mod parser;
pub mod transport;

use std::sync::OnceLock;

use regex_lite::Regex;

pub use client::{ActivityQuery, DtrClient};
pub use model::{Activity, ActivitySummary, Integration, Resource, Workspace};
pub use transport::{DtrMethod, DtrResponse, HttpTransport, Transport};

/// Activity hrefs all live under this collection.
pub const ACTIVITY_PREFIX: &str = "/dtr/act/";

fn workspace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/ws/([^/]+)/([^_/]+)_([^/]+)/([^/]+)/").expect("static regex")
    })
}

/// Branch label for a workspace path such as
/// `/ws/<project>/<vendor>_<component>/<branch>/...`, rendered as
/// `<project>_<branch>/<component>`.
pub fn branch_label(workspace_path: &str) -> Option<String> {
    let caps = workspace_pattern().captures(workspace_path)?;
    Some(format!("{}_{}/{}", &caps[1], &caps[4], &caps[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_label() {
        assert_eq!(
            branch_label("/ws/proj/sap.com_comp/dev/active/").as_deref(),
            Some("proj_dev/comp")
        );
        assert_eq!(
            branch_label("/dtr/ws/NW/sc_tools/cons/inactive/").as_deref(),
            Some("NW_cons/tools")
        );
        assert!(branch_label("/ws/flat/").is_none());
    }
}
