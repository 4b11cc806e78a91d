//! DTR backend: diffs an activity straight from the server.

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::{ChangeSummary, DiffResult, RepositoryInfo, ScmClient, NO_BRANCH};
use crate::diff::{ChangeKind, FileChange, HeaderStyle, SynthesisReport, Synthesizer};
use crate::dtr::{self, Activity, ActivityQuery, DtrClient, HttpTransport, Resource, Transport};
use crate::errors::{ContentUnavailableError, CoreError, ScmError};

/// How one changed resource appears in the patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub depot_path: String,
    pub base_revision: i64,
    pub kind: ChangeKind,
}

/// Classify `resource` and work out the repository path and base revision
/// its section is labelled with.
pub fn plan_change(
    activity: &Activity,
    resource: &Resource,
) -> Result<PlannedChange, ContentUnavailableError> {
    let workspace = activity
        .workspace
        .as_ref()
        .ok_or_else(|| ContentUnavailableError::MissingWorkspace(activity.name.clone()))?;
    let integration = activity.oldest_integration();

    let depot_path = match resource {
        Resource::Version(version) => {
            let integration = integration.ok_or_else(|| {
                ContentUnavailableError::MissingIntegration(activity.name.clone())
            })?;
            format!(
                "{}/byintegration/all/{}{}",
                workspace.history,
                integration.isn - 1,
                version.path
            )
        }
        Resource::File(node) | Resource::Collection(node) => {
            format!("{}{}", workspace.path, node.path)
        }
        Resource::WorkingResource(working) => match resource.most_recent_predecessor() {
            Some(pred) => format!(
                "{}#{}{}",
                pred.resource_path(),
                workspace.path,
                working.path
            ),
            None => format!("{}{}", workspace.path, working.path),
        },
    };

    let base_revision = match (integration, resource) {
        (Some(integration), _) => integration.isn - 1,
        (None, Resource::File(_) | Resource::Collection(_)) => resource.revision() - 1,
        (None, _) => resource
            .most_recent_predecessor()
            .map_or(0, |pred| pred.revision()),
    };

    let kind = if resource.is_created() {
        ChangeKind::Added
    } else if resource.is_deleted() {
        ChangeKind::Deleted
    } else {
        ChangeKind::Modified
    };

    Ok(PlannedChange {
        depot_path,
        base_revision,
        kind,
    })
}

/// Everything produced while diffing one activity.
#[derive(Debug)]
pub struct ActivityDiff {
    pub activity: Activity,
    pub report: SynthesisReport,
    pub branch: String,
}

pub struct DtrScm<T: Transport = HttpTransport> {
    client: DtrClient<T>,
    synthesizer: Synthesizer,
    user: String,
    max_activity_age_days: u32,
}

impl<T: Transport> DtrScm<T> {
    pub fn new(
        client: DtrClient<T>,
        synthesizer: Synthesizer,
        user: impl Into<String>,
        max_activity_age_days: u32,
    ) -> Self {
        Self {
            client,
            synthesizer,
            user: user.into(),
            max_activity_age_days,
        }
    }

    /// Fetch the activity named `name` and diff every file it touches.
    #[instrument(skip(self))]
    pub async fn diff_activity(&self, name: &str) -> Result<ActivityDiff, CoreError> {
        let activity = self
            .client
            .get_activity(&format!("{}{}", dtr::ACTIVITY_PREFIX, name))
            .await?;

        let branch = activity
            .workspace
            .as_ref()
            .and_then(|ws| dtr::branch_label(&ws.path))
            .unwrap_or_else(|| NO_BRANCH.to_string());
        debug!(oldest_integration = ?activity.oldest_integration(), %branch, "diffing activity");

        let mut report = SynthesisReport::new(HeaderStyle::Indexed);
        for resource in activity.changes() {
            if resource.is_directory() {
                info!(path = %resource.path(), "skipping directory");
                continue;
            }
            let plan = plan_change(&activity, resource)?;
            info!(kind = %plan.kind, depot_path = %plan.depot_path, "processing change");

            let (old, new) = match plan.kind {
                ChangeKind::Added => (
                    Vec::new(),
                    self.client.fetch_content(&activity, resource, false).await?,
                ),
                ChangeKind::Deleted => (
                    self.client.fetch_content(&activity, resource, true).await?,
                    Vec::new(),
                ),
                ChangeKind::Modified => (
                    self.client.fetch_content(&activity, resource, true).await?,
                    self.client.fetch_content(&activity, resource, false).await?,
                ),
            };

            let record = self
                .synthesizer
                .synthesize(FileChange {
                    depot_path: plan.depot_path,
                    base_revision: plan.base_revision,
                    kind: plan.kind,
                    local_path: resource.name().to_string(),
                    index_path: resource.path().to_string(),
                    old,
                    new,
                })
                .await?;
            report.push(record);
        }

        Ok(ActivityDiff {
            activity,
            report,
            branch,
        })
    }
}

#[async_trait]
impl<T: Transport + 'static> ScmClient for DtrScm<T> {
    fn name(&self) -> &'static str {
        "dtr"
    }

    async fn repository_info(&self) -> Result<Option<RepositoryInfo>, CoreError> {
        Ok(Some(RepositoryInfo::new(self.client.server())))
    }

    async fn diff(&self, args: &[String]) -> Result<DiffResult, CoreError> {
        let [name] = args else {
            return Err(ScmError::MissingArgument("specify the name of an activity".into()).into());
        };
        let result = self.diff_activity(name).await;
        self.client.close().await;
        let activity_diff = result?;
        Ok(DiffResult {
            diff: activity_diff.report.render(),
            parent_diff: None,
            branch: Some(activity_diff.branch),
        })
    }

    #[instrument(skip(self))]
    async fn get_open_changes(
        &self,
        include_submitted: bool,
    ) -> Result<Vec<ChangeSummary>, CoreError> {
        let query = ActivityQuery {
            open: true,
            closed: include_submitted,
            user: Some(self.user.to_uppercase()),
            max_age_days: include_submitted.then_some(self.max_activity_age_days),
        };
        let activities = self.client.get_activities(&query).await?;

        let local_host = self.client.local_host();
        let changes: Vec<ChangeSummary> = activities
            .into_iter()
            .filter(|act| act.client_host.eq_ignore_ascii_case(local_host))
            .map(|act| ChangeSummary {
                id: act
                    .href
                    .strip_prefix(dtr::ACTIVITY_PREFIX)
                    .unwrap_or(&act.href)
                    .to_string(),
                description: act.display_name.clone().unwrap_or_default(),
                branch: act.workspace.as_deref().and_then(dtr::branch_label),
            })
            .collect();
        debug!(count = changes.len(), "open activities on this machine");
        Ok(changes)
    }
}
