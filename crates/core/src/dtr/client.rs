//! Walks the activity graph on a DTR server and fetches file content.

use chrono::{Duration, Utc};
use quick_xml::escape::escape;
use tracing::{debug, info, instrument, warn};

use crate::config::DtrConfig;
use crate::dtr::model::{
    Activity, ActivitySummary, FileNode, Integration, Resource, VersionSetState, VersionedResource,
    Workspace,
};
use crate::dtr::parser::{self, ResourceKind, ResourceProps};
use crate::dtr::transport::{self, DtrMethod, HttpTransport, Transport};
use crate::errors::{ContentUnavailableError, CoreError, ProtocolError};

const XCM_NS: &str = "http://xml.sap.com/2002/12/dtr/xcm";
const XCM_CLIENT_NS: &str = "http://xml.sap.com/2002/12/dtr/xcm/client";

/// Filters for [`DtrClient::get_activities`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityQuery {
    pub open: bool,
    pub closed: bool,
    pub user: Option<String>,
    /// Lower bound on the integration date, in days; only honoured when
    /// listing closed activities alone.
    pub max_age_days: Option<u32>,
}

impl ActivityQuery {
    pub fn open_for(user: impl Into<String>) -> Self {
        Self {
            open: true,
            closed: false,
            user: Some(user.into()),
            max_age_days: None,
        }
    }

    /// Render the `XCM:activity-query` REPORT body.
    pub fn to_xml(&self) -> String {
        let mut where_clause = String::new();
        if !(self.open && self.closed) {
            if self.open {
                where_clause.push_str("\n<XCM:opened-activities-only/>\n");
            } else if self.closed {
                where_clause.push_str("\n<XCM:closed-activities-only/>\n");
            }
        }
        if let Some(user) = &self.user {
            where_clause.push_str(&format!("<XCM:user>{}</XCM:user>\n", escape(user.as_str())));
        }
        if let Some(days) = self.max_age_days.filter(|d| *d > 0) {
            if self.closed && !self.open {
                let since = Utc::now() - Duration::days(i64::from(days));
                where_clause.push_str(&format!(
                    "<XCM:integration-date><XCM:from>{}</XCM:from></XCM:integration-date>",
                    since.format("%a, %d %b %Y %H:%M:%S GMT")
                ));
            }
        }

        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
             <XCM:activity-query xmlns=\"DAV:\" xmlns:XCM=\"{XCM_NS}\" xmlns:XCM_CLIENT=\"{XCM_CLIENT_NS}\">\n\
             <XCM:select>\n\
             <property name=\"displayname\" namespace=\"DAV:\"/>\n\
             <property name=\"workspace\" namespace=\"DAV:\"><property name=\"href\" namespace=\"DAV:\"/></property>\n\
             <property name=\"client-id\" namespace=\"{XCM_CLIENT_NS}\"/>\n\
             </XCM:select>\n\
             <XCM:where>{where_clause}</XCM:where>\n\
             </XCM:activity-query>"
        )
    }
}

/// Client for one DTR server, generic over the transport so tests can run
/// against an in-memory server.
pub struct DtrClient<T: Transport> {
    transport: T,
    local_host: String,
}

impl DtrClient<HttpTransport> {
    /// Build a client over HTTP from resolved configuration.
    pub fn from_config(config: &DtrConfig) -> Self {
        let transport = HttpTransport::new(
            config.server.clone(),
            config.username.clone(),
            config.password.clone().unwrap_or_default(),
        );
        Self::new(transport, config.effective_local_host())
    }
}

impl<T: Transport> DtrClient<T> {
    pub fn new(transport: T, local_host: impl Into<String>) -> Self {
        let local_host = local_host.into();
        info!(server = %transport.server(), local_host = %local_host, "created DtrClient");
        Self {
            transport,
            local_host,
        }
    }

    pub fn server(&self) -> &str {
        self.transport.server()
    }

    pub fn local_host(&self) -> &str {
        &self.local_host
    }

    async fn fetch(
        &self,
        method: DtrMethod,
        path: &str,
        payload: Option<&str>,
    ) -> Result<Vec<u8>, ProtocolError> {
        let resp = transport::request(&self.transport, method, path, payload).await?;
        resp.bytes().await
    }

    async fn propfind(&self, path: &str) -> Result<Vec<u8>, ProtocolError> {
        self.fetch(DtrMethod::Propfind, path, None).await
    }

    /// Fetch an activity together with its integrations, changed resources
    /// (one level of predecessors each) and workspace.
    #[instrument(skip(self), fields(server = %self.server()))]
    pub async fn get_activity(&self, path: &str) -> Result<Activity, CoreError> {
        let body = self.propfind(path).await?;
        let props = parser::parse_activity(body.as_slice())?;

        let mut activity = Activity::new(
            path,
            props.display_name,
            VersionSetState::from_property(props.version_set_state.as_deref()),
            props.client_id.as_deref(),
            props.originator,
        );
        activity.workspace_href = props.workspace;

        debug!(count = props.integrations.len(), "fetching integrations");
        for href in &props.integrations {
            activity.integrations.push(self.get_integration(href).await?);
        }

        debug!(count = props.version_set.len(), "fetching versions");
        for href in &props.version_set {
            activity.version_set.push(self.get_resource(href, true).await?);
        }

        debug!(count = props.content_set.len(), "fetching content set");
        for href in &props.content_set {
            activity.content_set.push(self.get_resource(href, true).await?);
        }

        let workspace_href = match activity.oldest_integration() {
            Some(integration) => integration.workspace.clone(),
            None => activity.workspace_href.clone(),
        };
        if let Some(href) = workspace_href {
            activity.workspace = Some(self.get_workspace(&href).await?);
        }

        info!(
            activity = %activity.name,
            integrations = activity.integrations.len(),
            versions = activity.version_set.len(),
            content = activity.content_set.len(),
            "fetched activity"
        );
        Ok(activity)
    }

    #[instrument(skip(self))]
    pub async fn get_integration(&self, path: &str) -> Result<Integration, CoreError> {
        let body = self.propfind(path).await?;
        let props = parser::parse_integration(body.as_slice())?;
        Ok(Integration {
            path: path.to_string(),
            workspace: props.workspace,
            creation_date: props.creation_date,
            isn: props.isn,
        })
    }

    /// Fetch a resource. With `recursive`, versions and working resources
    /// also get their predecessors (or, lacking any, their base version),
    /// fetched without further recursion.
    #[instrument(skip(self))]
    pub async fn get_resource(&self, path: &str, recursive: bool) -> Result<Resource, CoreError> {
        let props = self.get_resource_props(path).await?;
        let versioned = matches!(
            props.kind,
            ResourceKind::Version | ResourceKind::WorkingResource
        );

        let mut predecessors = Vec::new();
        if versioned && recursive {
            let hrefs: Vec<String> = if props.predecessors.is_empty() {
                props.base_version.iter().cloned().collect()
            } else {
                props.predecessors.clone()
            };
            for href in &hrefs {
                debug!(predecessor = %href, "fetching predecessor");
                let pred = self.get_resource_props(href).await?;
                predecessors.push(build_resource(href, pred, Vec::new()));
            }
        }

        Ok(build_resource(path, props, predecessors))
    }

    async fn get_resource_props(&self, path: &str) -> Result<ResourceProps, CoreError> {
        let body = self.propfind(path).await?;
        Ok(parser::parse_resource(body.as_slice())?)
    }

    #[instrument(skip(self))]
    pub async fn get_workspace(&self, path: &str) -> Result<Workspace, CoreError> {
        let body = self.propfind(path).await?;
        let props = parser::parse_workspace(body.as_slice())?;
        Ok(Workspace {
            path: props.path.unwrap_or_default(),
            history: props.history.unwrap_or_default(),
        })
    }

    /// List activities matching `query`. Entries without a usable client id
    /// are dropped and logged.
    #[instrument(skip(self), fields(server = %self.server()))]
    pub async fn get_activities(
        &self,
        query: &ActivityQuery,
    ) -> Result<Vec<ActivitySummary>, CoreError> {
        let payload = query.to_xml();
        let body = self.fetch(DtrMethod::Report, "/dtr/", Some(&payload)).await?;
        let listing = parser::parse_activity_listing(body.as_slice())?;
        if listing.dropped > 0 {
            warn!(
                dropped = listing.dropped,
                "ignored activities without a valid client id"
            );
        }
        debug!(count = listing.activities.len(), "listed activities");
        Ok(listing.activities)
    }

    /// Bytes of `resource` as changed by `activity`, or of its baseline when
    /// `predecessor` is set. Line endings come back as `\n`.
    #[instrument(skip(self, activity, resource), fields(resource = %resource.resource_path()))]
    pub async fn fetch_content(
        &self,
        activity: &Activity,
        resource: &Resource,
        predecessor: bool,
    ) -> Result<Vec<u8>, CoreError> {
        let data = match resource {
            Resource::Version(version) => {
                let integration = activity.oldest_integration().ok_or_else(|| {
                    ContentUnavailableError::MissingIntegration(activity.name.clone())
                })?;
                let workspace = activity.workspace.as_ref().ok_or_else(|| {
                    ContentUnavailableError::MissingWorkspace(activity.name.clone())
                })?;
                let isn = if predecessor {
                    integration.isn - 1
                } else {
                    integration.isn
                };
                let path = format!(
                    "{}/byintegration/all/{}{}",
                    workspace.history, isn, version.path
                );
                self.fetch(DtrMethod::Get, &path, None).await?
            }
            _ if predecessor => {
                let pred = resource.most_recent_predecessor().ok_or_else(|| {
                    ContentUnavailableError::MissingPredecessor(
                        resource.resource_path().to_string(),
                    )
                })?;
                self.fetch(DtrMethod::Get, pred.resource_path(), None)
                    .await?
            }
            _ => self.read_local_copy(activity, resource).await?,
        };
        Ok(normalize_line_endings(data))
    }

    async fn read_local_copy(
        &self,
        activity: &Activity,
        resource: &Resource,
    ) -> Result<Vec<u8>, ContentUnavailableError> {
        let (host, client_path) = match (&activity.client_host, &activity.client_path) {
            (Some(host), Some(path)) => (host, path),
            _ => return Err(ContentUnavailableError::MissingClient(activity.name.clone())),
        };
        if !host.eq_ignore_ascii_case(&self.local_host) {
            return Err(ContentUnavailableError::WrongMachine {
                owner_host: host.clone(),
                local_host: self.local_host.clone(),
            });
        }

        let path = format!("{}/{}", client_path, resource.path());
        debug!(path = %path, "reading local copy");
        tokio::fs::read(&path)
            .await
            .map_err(|source| ContentUnavailableError::LocalRead { path, source })
    }

    /// Drop the server connection.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}

fn build_resource(path: &str, props: ResourceProps, predecessors: Vec<Resource>) -> Resource {
    let name = props.name.unwrap_or_default();
    let repo_path = props.path.unwrap_or_default();
    match props.kind {
        ResourceKind::File => Resource::File(FileNode {
            resource_path: path.to_string(),
            name,
            path: repo_path,
            directory: props.directory,
        }),
        ResourceKind::Collection => Resource::Collection(FileNode {
            resource_path: path.to_string(),
            name,
            path: repo_path,
            directory: true,
        }),
        ResourceKind::Version | ResourceKind::WorkingResource => {
            let versioned = VersionedResource {
                resource_path: path.to_string(),
                name,
                path: repo_path,
                revision: props.revision,
                deleted: props.deleted,
                timestamp: props.timestamp,
                directory: props.directory,
                predecessors,
            };
            if props.kind == ResourceKind::Version {
                Resource::Version(versioned)
            } else {
                Resource::WorkingResource(versioned)
            }
        }
    }
}

/// Convert `\r\n` line endings to `\n`.
pub fn normalize_line_endings(data: Vec<u8>) -> Vec<u8> {
    if !data.windows(2).any(|w| w == b"\r\n") {
        return data;
    }
    let mut out = Vec::with_capacity(data.len());
    let mut bytes = data.iter().copied().peekable();
    while let Some(b) = bytes.next() {
        if b == b'\r' && bytes.peek() == Some(&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}
