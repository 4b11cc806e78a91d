//! In-memory graph of an activity and everything reachable from it.
//!
//! The graph is built top-down for one submission and dropped afterwards.
//! Predecessor lists are one level deep: a predecessor never carries its own
//! predecessors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workspace and the WebDAV collection holding its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub path: String,
    pub history: String,
}

/// State of an activity's version set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionSetState {
    Open,
    Closed,
    #[default]
    Unknown,
}

impl VersionSetState {
    pub fn from_property(value: Option<&str>) -> Self {
        match value {
            Some("open") => Self::Open,
            Some("closed") => Self::Closed,
            _ => Self::Unknown,
        }
    }
}

/// Splits a `<client-path>:<host>` client id at its last colon.
///
/// Returns `(host, path)`, or `None` when the id is empty or has no colon.
pub fn split_client_id(client_id: &str) -> Option<(String, String)> {
    let (path, host) = client_id.rsplit_once(':')?;
    Some((host.to_string(), path.to_string()))
}

/// A record of an activity's changes being merged into a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub path: String,
    /// Href of the workspace the integration went into.
    pub workspace: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    /// Integration sequence number; -1 when the server did not send one.
    pub isn: i64,
}

/// A plain file or collection: no revision history of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub resource_path: String,
    pub name: String,
    pub path: String,
    pub directory: bool,
}

/// Shared shape of committed versions and in-progress working resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedResource {
    pub resource_path: String,
    pub name: String,
    pub path: String,
    pub revision: i64,
    pub deleted: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub directory: bool,
    pub predecessors: Vec<Resource>,
}

impl VersionedResource {
    /// The predecessor with the latest timestamp; the first one seen wins
    /// ties.
    pub fn most_recent_predecessor(&self) -> Option<&Resource> {
        let mut newest: Option<&Resource> = None;
        for candidate in &self.predecessors {
            match newest {
                Some(current) if candidate.timestamp() <= current.timestamp() => {}
                _ => newest = Some(candidate),
            }
        }
        newest
    }
}

/// Any resource an activity can reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resource {
    File(FileNode),
    Collection(FileNode),
    Version(VersionedResource),
    WorkingResource(VersionedResource),
}

impl Resource {
    pub fn resource_path(&self) -> &str {
        match self {
            Self::File(f) | Self::Collection(f) => &f.resource_path,
            Self::Version(v) | Self::WorkingResource(v) => &v.resource_path,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File(f) | Self::Collection(f) => &f.name,
            Self::Version(v) | Self::WorkingResource(v) => &v.name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::File(f) | Self::Collection(f) => &f.path,
            Self::Version(v) | Self::WorkingResource(v) => &v.path,
        }
    }

    pub fn revision(&self) -> i64 {
        match self {
            Self::File(_) | Self::Collection(_) => 1,
            Self::Version(v) | Self::WorkingResource(v) => v.revision,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::File(_) | Self::Collection(_) => None,
            Self::Version(v) | Self::WorkingResource(v) => v.timestamp,
        }
    }

    /// Whether the resource came into existence with this change.
    ///
    /// Committed versions encode a new file as an empty predecessor set;
    /// working resources encode it as revision 1.
    pub fn is_created(&self) -> bool {
        match self {
            Self::File(_) | Self::Collection(_) => true,
            Self::Version(v) => v.predecessors.is_empty(),
            Self::WorkingResource(v) => v.revision <= 1,
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            Self::File(_) | Self::Collection(_) => false,
            Self::Version(v) | Self::WorkingResource(v) => v.deleted,
        }
    }

    pub fn is_directory(&self) -> bool {
        match self {
            Self::File(f) | Self::Collection(f) => f.directory,
            Self::Version(v) | Self::WorkingResource(v) => v.directory,
        }
    }

    pub fn versioned(&self) -> Option<&VersionedResource> {
        match self {
            Self::Version(v) | Self::WorkingResource(v) => Some(v),
            Self::File(_) | Self::Collection(_) => None,
        }
    }

    pub fn most_recent_predecessor(&self) -> Option<&Resource> {
        self.versioned().and_then(|v| v.most_recent_predecessor())
    }
}

/// A named, server-tracked unit of in-progress change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    pub display_name: Option<String>,
    pub version_set_state: VersionSetState,
    pub client_host: Option<String>,
    pub client_path: Option<String>,
    pub originator: Option<String>,
    pub integrations: Vec<Integration>,
    pub version_set: Vec<Resource>,
    pub content_set: Vec<Resource>,
    /// Workspace href named on the activity itself.
    pub workspace_href: Option<String>,
    pub workspace: Option<Workspace>,
}

impl Activity {
    pub fn new(
        name: impl Into<String>,
        display_name: Option<String>,
        version_set_state: VersionSetState,
        client_id: Option<&str>,
        originator: Option<String>,
    ) -> Self {
        let (client_host, client_path) = match client_id.and_then(split_client_id) {
            Some((host, path)) => (Some(host), Some(path)),
            None => (None, None),
        };
        Self {
            name: name.into(),
            display_name,
            version_set_state,
            client_host,
            client_path,
            originator,
            integrations: Vec::new(),
            version_set: Vec::new(),
            content_set: Vec::new(),
            workspace_href: None,
            workspace: None,
        }
    }

    /// The integration with the earliest creation date; the first one seen
    /// wins ties and a missing date sorts first.
    pub fn oldest_integration(&self) -> Option<&Integration> {
        self.integrations.iter().min_by_key(|i| i.creation_date)
    }

    /// Every changed resource in the order diffs are emitted: the version
    /// set, then the content set.
    pub fn changes(&self) -> impl Iterator<Item = &Resource> {
        self.version_set.iter().chain(self.content_set.iter())
    }
}

/// One entry of an activity listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub href: String,
    pub display_name: Option<String>,
    pub workspace: Option<String>,
    pub client_host: String,
    pub client_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn versioned(revision: i64, predecessors: Vec<Resource>) -> VersionedResource {
        VersionedResource {
            resource_path: "/dtr/vh/1".into(),
            name: "Main.java".into(),
            path: "/src/Main.java".into(),
            revision,
            deleted: false,
            timestamp: None,
            directory: false,
            predecessors,
        }
    }

    fn at(day: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap())
    }

    fn integration(path: &str, created: Option<DateTime<Utc>>) -> Integration {
        Integration {
            path: path.into(),
            workspace: Some(format!("{}/ws", path)),
            creation_date: created,
            isn: 1,
        }
    }

    #[test]
    fn test_is_created_diverges_between_version_and_working_resource() {
        // Revision 2 with no predecessors: a committed version counts as new,
        // a working resource does not.
        let version = Resource::Version(versioned(2, Vec::new()));
        let working = Resource::WorkingResource(versioned(2, Vec::new()));
        assert!(version.is_created());
        assert!(!working.is_created());

        let first = Resource::WorkingResource(versioned(1, Vec::new()));
        assert!(first.is_created());

        let with_pred = Resource::Version(versioned(
            3,
            vec![Resource::Version(versioned(2, Vec::new()))],
        ));
        assert!(!with_pred.is_created());
    }

    #[test]
    fn test_file_nodes_are_created_and_never_deleted() {
        let file = Resource::File(FileNode {
            resource_path: "/dtr/f/1".into(),
            name: "a.txt".into(),
            path: "/a.txt".into(),
            directory: false,
        });
        assert!(file.is_created());
        assert!(!file.is_deleted());
        assert_eq!(file.revision(), 1);
        assert!(file.most_recent_predecessor().is_none());
    }

    #[test]
    fn test_oldest_integration_selection() {
        let mut act = Activity::new("/dtr/act/1", None, VersionSetState::Closed, None, None);
        act.integrations.push(integration("/i/3", at(3)));
        act.integrations.push(integration("/i/1", at(1)));
        act.integrations.push(integration("/i/2", at(2)));
        assert_eq!(act.oldest_integration().unwrap().path, "/i/1");
    }

    #[test]
    fn test_oldest_integration_tie_keeps_first_seen() {
        let mut act = Activity::new("/dtr/act/1", None, VersionSetState::Closed, None, None);
        act.integrations.push(integration("/i/a", at(1)));
        act.integrations.push(integration("/i/b", at(1)));
        assert_eq!(act.oldest_integration().unwrap().path, "/i/a");
    }

    #[test]
    fn test_oldest_integration_none_without_integrations() {
        let act = Activity::new("/dtr/act/1", None, VersionSetState::Open, None, None);
        assert!(act.oldest_integration().is_none());
    }

    #[test]
    fn test_most_recent_predecessor() {
        let mut older = versioned(1, Vec::new());
        older.resource_path = "/old".into();
        older.timestamp = at(1);
        let mut newer = versioned(2, Vec::new());
        newer.resource_path = "/new".into();
        newer.timestamp = at(5);
        let mut tie = versioned(3, Vec::new());
        tie.resource_path = "/tie".into();
        tie.timestamp = at(5);

        let wr = versioned(
            4,
            vec![
                Resource::Version(older),
                Resource::Version(newer),
                Resource::Version(tie),
            ],
        );
        assert_eq!(wr.most_recent_predecessor().unwrap().resource_path(), "/new");
    }

    #[test]
    fn test_client_id_split_at_last_colon() {
        let act = Activity::new(
            "/dtr/act/1",
            None,
            VersionSetState::Open,
            Some("C:/work/dev:WS-1234"),
            None,
        );
        assert_eq!(act.client_host.as_deref(), Some("WS-1234"));
        assert_eq!(act.client_path.as_deref(), Some("C:/work/dev"));

        let act = Activity::new("/dtr/act/2", None, VersionSetState::Open, Some(""), None);
        assert!(act.client_host.is_none());
    }

    #[test]
    fn test_version_set_state_from_property() {
        assert_eq!(VersionSetState::from_property(Some("open")), VersionSetState::Open);
        assert_eq!(VersionSetState::from_property(Some("closed")), VersionSetState::Closed);
        assert_eq!(VersionSetState::from_property(Some("weird")), VersionSetState::Unknown);
        assert_eq!(VersionSetState::from_property(None), VersionSetState::Unknown);
    }
}
