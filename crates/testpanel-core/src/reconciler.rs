use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::{CreateIssueRequest, CreateTagRequest, TrackerClient};
use crate::error::CoreError;
use crate::model::{Project, ProjectId, TagId, TEST_TAG_NAME};

pub const DEFAULT_CREATE_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PanelPhase {
    Init,
    Ready,
}

/// The remote call a failed row needs replayed on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowAction {
    CreateIssue,
    AttachTag,
    DetachTag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowSync {
    Idle,
    Failed { action: RowAction, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowState {
    pub checked: bool,
    pub sync: RowSync,
}

impl RowState {
    pub fn idle(checked: bool) -> Self {
        Self {
            checked,
            sync: RowSync::Idle,
        }
    }

    pub fn failed(checked: bool, action: RowAction, reason: String) -> Self {
        Self {
            checked,
            sync: RowSync::Failed { action, reason },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelState {
    pub phase: PanelPhase,
    pub projects: Vec<Project>,
    pub rows: BTreeMap<ProjectId, RowState>,
    pub tag_id: Option<TagId>,
}

impl PanelState {
    fn new() -> Self {
        Self {
            phase: PanelPhase::Init,
            projects: Vec::new(),
            rows: BTreeMap::new(),
            tag_id: None,
        }
    }
}

/// One UI row: a project plus its derived checked/sync state, in fetch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelRow {
    pub project: ProjectId,
    pub name: String,
    pub checked: bool,
    pub sync: RowSync,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelSnapshot {
    pub phase: PanelPhase,
    pub tag_resolved: bool,
    pub rows: Vec<PanelRow>,
}

/// Outcome of a per-row operation. Precondition rejections are outcomes, not
/// errors: the remote was never called and the caller decides how loudly to
/// report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Applied,
    TagNotResolved,
    UnknownProject,
    MissingSentinelIssue,
    NothingToRetry,
}

/// Aggregated result of one issue-reconciliation fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<ProjectId>,
    pub failed: Vec<(ProjectId, CoreError)>,
}

/// Results of a full reconciliation pass (tag, then issues).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    pub tag: Result<TagId, CoreError>,
    pub issues: Result<ReconcileReport, CoreError>,
}

/// The reconciliation controller: owns the panel state and brings remote
/// state in line with the two sentinel invariants (one "Test Run" issue per
/// project, one shared "to-be-tested" tag).
pub struct Reconciler {
    client: Arc<dyn TrackerClient>,
    create_concurrency: usize,
    state: PanelState,
}

impl Reconciler {
    pub fn new(client: Arc<dyn TrackerClient>) -> Self {
        Self::with_create_concurrency(client, DEFAULT_CREATE_CONCURRENCY)
    }

    pub fn with_create_concurrency(client: Arc<dyn TrackerClient>, create_concurrency: usize) -> Self {
        Self {
            client,
            create_concurrency: create_concurrency.max(1),
            state: PanelState::new(),
        }
    }

    pub fn state(&self) -> &PanelState {
        &self.state
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        let rows = self
            .state
            .projects
            .iter()
            .map(|project| {
                let row = self
                    .state
                    .rows
                    .get(&project.id)
                    .cloned()
                    .unwrap_or_else(|| RowState::idle(false));
                PanelRow {
                    project: project.id.clone(),
                    name: project.name.clone(),
                    checked: row.checked,
                    sync: row.sync,
                }
            })
            .collect();

        PanelSnapshot {
            phase: self.state.phase,
            tag_resolved: self.state.tag_id.is_some(),
            rows,
        }
    }

    /// Runs the initial reconciliation pass and moves the panel to `Ready`.
    /// Failures land in the returned outcome and the row state; the panel
    /// always becomes ready so the UI can surface them and offer retry.
    pub async fn initialize(&mut self) -> PassOutcome {
        let outcome = self.reconcile().await;
        self.state.phase = PanelPhase::Ready;
        outcome
    }

    /// One full pass: resolve the sentinel tag, then reconcile per-project
    /// sentinel issues.
    pub async fn reconcile(&mut self) -> PassOutcome {
        let tag = self.reconcile_tag().await;
        let issues = self.reconcile_issues().await;
        PassOutcome { tag, issues }
    }

    /// Replaces the in-memory project list. On error the prior list is
    /// retained (stale-but-available) and the error is returned.
    pub async fn fetch_projects(&mut self) -> Result<(), CoreError> {
        let projects = self.client.list_projects().await?;
        self.state.projects = projects;
        Ok(())
    }

    /// Resolves the sentinel tag id, creating the tag when absent. The id is
    /// immutable for the session once resolved.
    pub async fn reconcile_tag(&mut self) -> Result<TagId, CoreError> {
        if let Some(tag_id) = self.state.tag_id.clone() {
            return Ok(tag_id);
        }

        let tags = self.client.list_tags().await?;
        let tag_id = match tags.into_iter().find(|tag| tag.name == TEST_TAG_NAME) {
            Some(existing) => existing.id,
            None => {
                self.client
                    .create_tag(CreateTagRequest::to_be_tested())
                    .await?
                    .id
            }
        };

        self.state.tag_id = Some(tag_id.clone());
        Ok(tag_id)
    }

    /// Ensures every fetched project has a sentinel issue, creating missing
    /// ones with bounded concurrent fan-out, and rebuilds the row map
    /// wholesale from what was observed.
    pub async fn reconcile_issues(&mut self) -> Result<ReconcileReport, CoreError> {
        self.fetch_projects().await?;

        let mut rows = BTreeMap::new();
        let mut missing = Vec::new();
        for project in &self.state.projects {
            match project.test_run_issue() {
                Some(issue) => {
                    rows.insert(
                        project.id.clone(),
                        RowState::idle(issue.has_tag_named(TEST_TAG_NAME)),
                    );
                }
                None => missing.push(project.id.clone()),
            }
        }

        let client = Arc::clone(&self.client);
        let results: Vec<(ProjectId, Result<(), CoreError>)> =
            stream::iter(missing.into_iter().map(|project| {
                let client = Arc::clone(&client);
                async move {
                    let result = client
                        .create_issue(CreateIssueRequest::test_run(project.clone()))
                        .await
                        .map(|_| ());
                    (project, result)
                }
            }))
            .buffer_unordered(self.create_concurrency)
            .collect()
            .await;

        let mut report = ReconcileReport::default();
        for (project, result) in results {
            match result {
                Ok(()) => {
                    rows.insert(project.clone(), RowState::idle(false));
                    report.created.push(project);
                }
                Err(error) => {
                    rows.insert(
                        project.clone(),
                        RowState::failed(false, RowAction::CreateIssue, error.to_string()),
                    );
                    report.failed.push((project, error));
                }
            }
        }

        self.state.rows = rows;

        // Refresh so newly created issues show up in the projection. The
        // refresh is confirmation, not the source of the report: its failure
        // keeps the prior list.
        if let Err(error) = self.fetch_projects().await {
            warn!(error = %error, "project refresh after issue reconciliation failed");
        }

        Ok(report)
    }

    /// Attaches or detaches the sentinel tag on a project's sentinel issue.
    /// The row is patched optimistically, rolled back on remote failure, and
    /// confirmed by a full re-fetch on success.
    pub async fn toggle(
        &mut self,
        project_id: &ProjectId,
        desired: bool,
    ) -> Result<RowOutcome, CoreError> {
        let Some(tag_id) = self.state.tag_id.clone() else {
            warn!(
                project = project_id.as_str(),
                "toggle rejected: sentinel tag is not resolved yet"
            );
            return Ok(RowOutcome::TagNotResolved);
        };
        let Some(project) = self
            .state
            .projects
            .iter()
            .find(|project| project.id == *project_id)
        else {
            return Ok(RowOutcome::UnknownProject);
        };
        let Some(issue) = project.test_run_issue() else {
            return Ok(RowOutcome::MissingSentinelIssue);
        };
        let issue_id = issue.id.clone();

        let previous = self.state.rows.get(project_id).cloned();
        self.state
            .rows
            .insert(project_id.clone(), RowState::idle(desired));

        let result = if desired {
            self.client.add_issue_tag(&issue_id, &tag_id).await
        } else {
            self.client.remove_issue_tag(&issue_id, &tag_id).await
        };

        if let Err(error) = result {
            let prior_checked = previous.map(|row| row.checked).unwrap_or(false);
            let action = if desired {
                RowAction::AttachTag
            } else {
                RowAction::DetachTag
            };
            self.state.rows.insert(
                project_id.clone(),
                RowState::failed(prior_checked, action, error.to_string()),
            );
            return Err(error);
        }

        if let Err(error) = self.fetch_projects().await {
            warn!(error = %error, "project refresh after toggle failed");
        }
        Ok(RowOutcome::Applied)
    }

    /// Replays the failed remote call recorded on a row.
    pub async fn retry(&mut self, project_id: &ProjectId) -> Result<RowOutcome, CoreError> {
        let action = match self.state.rows.get(project_id) {
            Some(RowState {
                sync: RowSync::Failed { action, .. },
                ..
            }) => *action,
            _ => return Ok(RowOutcome::NothingToRetry),
        };

        match action {
            RowAction::CreateIssue => {
                match self
                    .client
                    .create_issue(CreateIssueRequest::test_run(project_id.clone()))
                    .await
                {
                    Ok(_) => {
                        self.state
                            .rows
                            .insert(project_id.clone(), RowState::idle(false));
                        if let Err(error) = self.fetch_projects().await {
                            warn!(error = %error, "project refresh after issue retry failed");
                        }
                        Ok(RowOutcome::Applied)
                    }
                    Err(error) => {
                        self.state.rows.insert(
                            project_id.clone(),
                            RowState::failed(false, RowAction::CreateIssue, error.to_string()),
                        );
                        Err(error)
                    }
                }
            }
            RowAction::AttachTag => self.toggle(project_id, true).await,
            RowAction::DetachTag => self.toggle(project_id, false).await,
        }
    }
}
