use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::OsString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;

use crate::client::{CreateIssueRequest, CreateTagRequest, TrackerClient};
use crate::error::CoreError;
use crate::model::{Issue, IssueId, Project, ProjectId, Tag, TagId};

static ENV_VAR_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
thread_local! {
    static ENV_VAR_LOCK_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct EnvVarScope {
    _guard: Option<MutexGuard<'static, ()>>,
}

impl EnvVarScope {
    fn enter() -> Self {
        let depth_before = ENV_VAR_LOCK_DEPTH.with(|depth| {
            let current = depth.get();
            depth.set(current.saturating_add(1));
            current
        });

        if depth_before > 0 {
            return Self { _guard: None };
        }

        let lock = ENV_VAR_LOCK.get_or_init(|| Mutex::new(()));
        let guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Self {
            _guard: Some(guard),
        }
    }
}

impl Drop for EnvVarScope {
    fn drop(&mut self) {
        ENV_VAR_LOCK_DEPTH.with(|depth| {
            let current = depth.get();
            depth.set(current.saturating_sub(1));
        });
    }
}

struct EnvVarRestore {
    key: String,
    original: Option<OsString>,
}

impl EnvVarRestore {
    fn new(key: &str, value: Option<&str>) -> Self {
        let original = std::env::var_os(key);
        match value {
            Some(value) => unsafe {
                std::env::set_var(key, value);
            },
            None => unsafe {
                std::env::remove_var(key);
            },
        }

        Self {
            key: key.to_owned(),
            original,
        }
    }
}

impl Drop for EnvVarRestore {
    fn drop(&mut self) {
        match self.original.take() {
            Some(original) => unsafe {
                std::env::set_var(&self.key, original);
            },
            None => unsafe {
                std::env::remove_var(&self.key);
            },
        }
    }
}

pub fn with_env_var<R>(key: &str, value: Option<&str>, run: impl FnOnce() -> R) -> R {
    with_env_vars(&[(key, value)], run)
}

pub fn with_env_vars<R>(vars: &[(&str, Option<&str>)], run: impl FnOnce() -> R) -> R {
    let _scope = EnvVarScope::enter();
    let _restores: Vec<_> = vars
        .iter()
        .map(|(key, value)| EnvVarRestore::new(key, *value))
        .collect();
    run()
}

/// Remote call observed by the recording tracker, in invocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCall {
    HealthCheck,
    ListProjects,
    CreateIssue { project: ProjectId, summary: String },
    ListTags,
    CreateTag { name: String },
    AddIssueTag { issue: IssueId, tag: TagId },
    RemoveIssueTag { issue: IssueId, tag: TagId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerOp {
    HealthCheck,
    ListProjects,
    CreateIssue,
    ListTags,
    CreateTag,
    AddIssueTag,
    RemoveIssueTag,
}

/// In-memory `TrackerClient` that records every call, mutates its own state
/// the way the remote would, and fails scripted operations until cleared.
#[derive(Default)]
pub struct RecordingTracker {
    calls: Mutex<Vec<TrackerCall>>,
    projects: Mutex<Vec<Project>>,
    tags: Mutex<Vec<Tag>>,
    failures: Mutex<HashMap<TrackerOp, CoreError>>,
    next_id: AtomicU64,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_project(&self, id: &str, name: &str, issues: &[(&str, &str, &[(&str, &str)])]) {
        let issues = issues
            .iter()
            .map(|(issue_id, summary, tags)| Issue {
                id: IssueId::from(*issue_id),
                summary: (*summary).to_owned(),
                tags: tags
                    .iter()
                    .map(|(tag_id, tag_name)| Tag {
                        id: TagId::from(*tag_id),
                        name: (*tag_name).to_owned(),
                    })
                    .collect(),
            })
            .collect();

        self.projects
            .lock()
            .expect("recording tracker projects lock")
            .push(Project {
                id: ProjectId::from(id),
                name: name.to_owned(),
                issues,
            });
    }

    pub fn put_tag(&self, id: &str, name: &str) {
        self.tags
            .lock()
            .expect("recording tracker tags lock")
            .push(Tag {
                id: TagId::from(id),
                name: name.to_owned(),
            });
    }

    /// Makes every subsequent call of `op` fail with `error` until cleared.
    pub fn fail_with(&self, op: TrackerOp, error: CoreError) {
        self.failures
            .lock()
            .expect("recording tracker failures lock")
            .insert(op, error);
    }

    pub fn clear_failure(&self, op: TrackerOp) {
        self.failures
            .lock()
            .expect("recording tracker failures lock")
            .remove(&op);
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        self.calls
            .lock()
            .expect("recording tracker calls lock")
            .clone()
    }

    pub fn calls_of(&self, op: TrackerOp) -> Vec<TrackerCall> {
        self.calls()
            .into_iter()
            .filter(|call| op_of(call) == op)
            .collect()
    }

    fn record(&self, call: TrackerCall) -> Result<(), CoreError> {
        let op = op_of(&call);
        self.calls
            .lock()
            .expect("recording tracker calls lock")
            .push(call);
        let failures = self
            .failures
            .lock()
            .expect("recording tracker failures lock");
        match failures.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let counter = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{counter}")
    }
}

fn op_of(call: &TrackerCall) -> TrackerOp {
    match call {
        TrackerCall::HealthCheck => TrackerOp::HealthCheck,
        TrackerCall::ListProjects => TrackerOp::ListProjects,
        TrackerCall::CreateIssue { .. } => TrackerOp::CreateIssue,
        TrackerCall::ListTags => TrackerOp::ListTags,
        TrackerCall::CreateTag { .. } => TrackerOp::CreateTag,
        TrackerCall::AddIssueTag { .. } => TrackerOp::AddIssueTag,
        TrackerCall::RemoveIssueTag { .. } => TrackerOp::RemoveIssueTag,
    }
}

#[async_trait]
impl TrackerClient for RecordingTracker {
    async fn health_check(&self) -> Result<(), CoreError> {
        self.record(TrackerCall::HealthCheck)
    }

    async fn list_projects(&self) -> Result<Vec<Project>, CoreError> {
        self.record(TrackerCall::ListProjects)?;
        Ok(self
            .projects
            .lock()
            .expect("recording tracker projects lock")
            .clone())
    }

    async fn create_issue(&self, request: CreateIssueRequest) -> Result<Issue, CoreError> {
        self.record(TrackerCall::CreateIssue {
            project: request.project.clone(),
            summary: request.summary.clone(),
        })?;

        let issue = Issue {
            id: IssueId::from(self.fresh_id("issue")),
            summary: request.summary,
            tags: Vec::new(),
        };

        let mut projects = self
            .projects
            .lock()
            .expect("recording tracker projects lock");
        let project = projects
            .iter_mut()
            .find(|project| project.id == request.project)
            .ok_or_else(|| {
                CoreError::dependency_unavailable(format!(
                    "issue create rejected: unknown project '{}'",
                    request.project.as_str()
                ))
            })?;
        project.issues.push(issue.clone());
        Ok(issue)
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, CoreError> {
        self.record(TrackerCall::ListTags)?;
        Ok(self
            .tags
            .lock()
            .expect("recording tracker tags lock")
            .clone())
    }

    async fn create_tag(&self, request: CreateTagRequest) -> Result<Tag, CoreError> {
        self.record(TrackerCall::CreateTag {
            name: request.name.clone(),
        })?;

        let tag = Tag {
            id: TagId::from(self.fresh_id("tag")),
            name: request.name,
        };
        self.tags
            .lock()
            .expect("recording tracker tags lock")
            .push(tag.clone());
        Ok(tag)
    }

    async fn add_issue_tag(&self, issue: &IssueId, tag: &TagId) -> Result<(), CoreError> {
        self.record(TrackerCall::AddIssueTag {
            issue: issue.clone(),
            tag: tag.clone(),
        })?;

        let known_tag = self
            .tags
            .lock()
            .expect("recording tracker tags lock")
            .iter()
            .find(|candidate| candidate.id == *tag)
            .cloned()
            .ok_or_else(|| {
                CoreError::dependency_unavailable(format!(
                    "tag attach rejected: unknown tag '{}'",
                    tag.as_str()
                ))
            })?;

        let mut projects = self
            .projects
            .lock()
            .expect("recording tracker projects lock");
        let target = projects
            .iter_mut()
            .flat_map(|project| project.issues.iter_mut())
            .find(|candidate| candidate.id == *issue)
            .ok_or_else(|| {
                CoreError::dependency_unavailable(format!(
                    "tag attach rejected: unknown issue '{}'",
                    issue.as_str()
                ))
            })?;
        // Add-by-id is idempotent, matching the remote contract.
        if !target.tags.iter().any(|existing| existing.id == *tag) {
            target.tags.push(known_tag);
        }
        Ok(())
    }

    async fn remove_issue_tag(&self, issue: &IssueId, tag: &TagId) -> Result<(), CoreError> {
        self.record(TrackerCall::RemoveIssueTag {
            issue: issue.clone(),
            tag: tag.clone(),
        })?;

        let mut projects = self
            .projects
            .lock()
            .expect("recording tracker projects lock");
        let target = projects
            .iter_mut()
            .flat_map(|project| project.issues.iter_mut())
            .find(|candidate| candidate.id == *issue)
            .ok_or_else(|| {
                CoreError::dependency_unavailable(format!(
                    "tag detach rejected: unknown issue '{}'",
                    issue.as_str()
                ))
            })?;
        target.tags.retain(|existing| existing.id != *tag);
        Ok(())
    }
}
