use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{Issue, IssueId, Project, ProjectId, Tag, TagId, TEST_RUN_SUMMARY, TEST_TAG_NAME};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIssueRequest {
    pub project: ProjectId,
    pub summary: String,
}

impl CreateIssueRequest {
    /// The sentinel-issue creation request for a project.
    pub fn test_run(project: ProjectId) -> Self {
        Self {
            project,
            summary: TEST_RUN_SUMMARY.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
}

impl CreateTagRequest {
    pub fn to_be_tested() -> Self {
        Self {
            name: TEST_TAG_NAME.to_owned(),
        }
    }
}

/// The injected tracker REST collaborator. Implementations own transport,
/// authentication, and wire decoding; callers see domain types and
/// `CoreError` only.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn health_check(&self) -> Result<(), CoreError>;
    async fn list_projects(&self) -> Result<Vec<Project>, CoreError>;
    async fn create_issue(&self, request: CreateIssueRequest) -> Result<Issue, CoreError>;
    async fn list_tags(&self) -> Result<Vec<Tag>, CoreError>;
    async fn create_tag(&self, request: CreateTagRequest) -> Result<Tag, CoreError>;
    async fn add_issue_tag(&self, issue: &IssueId, tag: &TagId) -> Result<(), CoreError>;
    async fn remove_issue_tag(&self, issue: &IssueId, tag: &TagId) -> Result<(), CoreError>;
}

#[cfg(test)]
mod tests {
    use super::{CreateIssueRequest, CreateTagRequest};
    use crate::model::ProjectId;

    #[test]
    fn test_run_request_carries_sentinel_summary() {
        let request = CreateIssueRequest::test_run(ProjectId::from("P1"));
        assert_eq!(request.project.as_str(), "P1");
        assert_eq!(request.summary, "Test Run");
    }

    #[test]
    fn to_be_tested_request_carries_sentinel_name() {
        assert_eq!(CreateTagRequest::to_be_tested().name, "to-be-tested");
    }
}
