use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use testpanel_core::{
    CoreError, CreateIssueRequest, CreateTagRequest, Issue, IssueId, Project, ProjectId, Tag,
    TagId, TrackerClient,
};

pub const ENV_YOUTRACK_URL: &str = "TESTPANEL_YOUTRACK_URL";
pub const ENV_YOUTRACK_TOKEN: &str = "TESTPANEL_YOUTRACK_TOKEN";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;
const PROJECT_FIELDS: &str = "id,name,issues(id,summary,tags(name,id))";
const TAG_FIELDS: &str = "id,name";

#[derive(Clone, PartialEq, Eq)]
pub struct YouTrackConfig {
    pub base_url: String,
    pub token: String,
    pub request_timeout_secs: u64,
}

impl fmt::Debug for YouTrackConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("YouTrackConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl YouTrackConfig {
    pub fn from_settings(
        base_url: impl Into<String>,
        token: impl Into<String>,
        request_timeout_secs: u64,
    ) -> Result<Self, CoreError> {
        let base_url = base_url.into().trim().to_owned();
        if base_url.is_empty() {
            return Err(CoreError::Configuration(
                "YouTrack base URL is empty. Set TESTPANEL_YOUTRACK_URL or youtrack.base_url."
                    .to_owned(),
            ));
        }

        let token = token.into().trim().to_owned();
        if token.is_empty() {
            return Err(CoreError::Configuration(
                "TESTPANEL_YOUTRACK_TOKEN is empty. Provide a non-empty API token.".to_owned(),
            ));
        }

        let request_timeout_secs = if request_timeout_secs == 0 {
            DEFAULT_REQUEST_TIMEOUT_SECS
        } else {
            request_timeout_secs
        };

        Ok(Self {
            base_url,
            token,
            request_timeout_secs,
        })
    }

    pub fn from_env() -> Result<Self, CoreError> {
        let base_url = required_env(ENV_YOUTRACK_URL)?;
        let token = required_env(ENV_YOUTRACK_TOKEN)?;
        Self::from_settings(base_url, token, DEFAULT_REQUEST_TIMEOUT_SECS)
    }
}

fn required_env(name: &str) -> Result<String, CoreError> {
    let value = std::env::var(name).map_err(|_| {
        CoreError::Configuration(format!(
            "{name} is not set. Export a valid value before using integration-youtrack."
        ))
    })?;
    let value = value.trim().to_owned();
    if value.is_empty() {
        return Err(CoreError::Configuration(format!(
            "{name} is empty. Provide a non-empty value."
        )));
    }
    Ok(value)
}

#[derive(Clone)]
pub struct YouTrackClient {
    config: YouTrackConfig,
    client: Client,
}

impl YouTrackClient {
    pub fn new(config: YouTrackConfig) -> Result<Self, CoreError> {
        let mut headers = header::HeaderMap::new();
        let bearer = header::HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|error| {
                CoreError::Configuration(format!("TESTPANEL_YOUTRACK_TOKEN is invalid: {error}"))
            })?;
        headers.insert(header::AUTHORIZATION, bearer);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|error| {
                CoreError::Configuration(format!("failed to build YouTrack HTTP client: {error}"))
            })?;

        Ok(Self { config, client })
    }

    pub fn from_env() -> Result<Self, CoreError> {
        Self::new(YouTrackConfig::from_env()?)
    }

    pub fn scaffold_default() -> Self {
        let config = YouTrackConfig::from_settings(
            "https://scaffold.youtrack.example/api",
            "scaffold-token",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )
        .expect("construct default youtrack config");
        Self::new(config).expect("construct default youtrack client")
    }

    pub fn config(&self) -> &YouTrackConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let suffix = path.trim_start_matches('/');
        format!("{base}/{suffix}")
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, CoreError> {
        let response = request.send().await.map_err(|error| {
            CoreError::DependencyUnavailable(format!("YouTrack API request failed: {error}"))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            CoreError::DependencyUnavailable(format!("YouTrack API response read failed: {error}"))
        })?;

        if !status.is_success() {
            return Err(CoreError::DependencyUnavailable(format!(
                "YouTrack API request failed with status {status}: {body}"
            )));
        }

        serde_json::from_str(&body).map_err(|error| {
            CoreError::DependencyUnavailable(format!(
                "YouTrack API response was malformed JSON: {error}"
            ))
        })
    }

    async fn request_status_only(&self, request: reqwest::RequestBuilder) -> Result<(), CoreError> {
        let response = request.send().await.map_err(|error| {
            CoreError::DependencyUnavailable(format!("YouTrack API request failed: {error}"))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            CoreError::DependencyUnavailable(format!("YouTrack API response read failed: {error}"))
        })?;

        if status.is_success() {
            Ok(())
        } else {
            Err(CoreError::DependencyUnavailable(format!(
                "YouTrack API request failed with status {status}: {body}"
            )))
        }
    }
}

#[async_trait]
impl TrackerClient for YouTrackClient {
    async fn health_check(&self) -> Result<(), CoreError> {
        let _tags: Vec<TagRecord> = self
            .request_json(
                self.client
                    .get(self.endpoint("tags"))
                    .query(&[("fields", TAG_FIELDS)]),
            )
            .await?;
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, CoreError> {
        let records: Vec<ProjectRecord> = self
            .request_json(
                self.client
                    .get(self.endpoint("admin/projects"))
                    .query(&[("fields", PROJECT_FIELDS)]),
            )
            .await?;
        Ok(records.into_iter().map(ProjectRecord::into_project).collect())
    }

    async fn create_issue(&self, request: CreateIssueRequest) -> Result<Issue, CoreError> {
        let summary = request.summary.trim();
        if summary.is_empty() {
            return Err(CoreError::Configuration(
                "YouTrack issue summary cannot be empty.".to_owned(),
            ));
        }

        let payload = json!({
            "project": { "id": request.project.as_str() },
            "summary": summary,
        });
        let record: IssueRecord = self
            .request_json(self.client.post(self.endpoint("issues")).json(&payload))
            .await?;
        Ok(record.into_issue())
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, CoreError> {
        let records: Vec<TagRecord> = self
            .request_json(
                self.client
                    .get(self.endpoint("tags"))
                    .query(&[("fields", TAG_FIELDS)]),
            )
            .await?;
        Ok(records.into_iter().map(TagRecord::into_tag).collect())
    }

    async fn create_tag(&self, request: CreateTagRequest) -> Result<Tag, CoreError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(CoreError::Configuration(
                "YouTrack tag name cannot be empty.".to_owned(),
            ));
        }

        let record: TagRecord = self
            .request_json(
                self.client
                    .post(self.endpoint("tags"))
                    .json(&json!({ "name": name })),
            )
            .await?;
        Ok(record.into_tag())
    }

    async fn add_issue_tag(&self, issue: &IssueId, tag: &TagId) -> Result<(), CoreError> {
        let request = self
            .client
            .post(self.endpoint(&format!("issues/{}/tags", issue.as_str())))
            .query(&[("fields", TAG_FIELDS)])
            .json(&json!({ "id": tag.as_str() }));
        self.request_status_only(request).await
    }

    async fn remove_issue_tag(&self, issue: &IssueId, tag: &TagId) -> Result<(), CoreError> {
        let request = self.client.delete(self.endpoint(&format!(
            "issues/{}/tags/{}",
            issue.as_str(),
            tag.as_str()
        )));
        self.request_status_only(request).await
    }
}

// YouTrack serializes entity ids as strings but tolerating numeric ids keeps
// decoding robust against proxies that re-encode payloads.
fn json_value_to_non_empty_string(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => {
            let normalized = raw.trim();
            if normalized.is_empty() {
                None
            } else {
                Some(normalized.to_owned())
            }
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn deserialize_required_stringish<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    json_value_to_non_empty_string(&value)
        .ok_or_else(|| serde::de::Error::custom("expected non-empty string or numeric id"))
}

#[derive(Debug, Deserialize, Clone)]
struct ProjectRecord {
    #[serde(deserialize_with = "deserialize_required_stringish")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    issues: Vec<IssueRecord>,
}

impl ProjectRecord {
    fn into_project(self) -> Project {
        Project {
            id: ProjectId::from(self.id),
            name: self.name.unwrap_or_default(),
            issues: self
                .issues
                .into_iter()
                .map(IssueRecord::into_issue)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
struct IssueRecord {
    #[serde(deserialize_with = "deserialize_required_stringish")]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    tags: Vec<TagRecord>,
}

impl IssueRecord {
    fn into_issue(self) -> Issue {
        Issue {
            id: IssueId::from(self.id),
            summary: self.summary.unwrap_or_default(),
            tags: self.tags.into_iter().map(TagRecord::into_tag).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
struct TagRecord {
    #[serde(deserialize_with = "deserialize_required_stringish")]
    id: String,
    #[serde(default)]
    name: Option<String>,
}

impl TagRecord {
    fn into_tag(self) -> Tag {
        Tag {
            id: TagId::from(self.id),
            name: self.name.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ProjectRecord, TagRecord, YouTrackClient, YouTrackConfig};
    use serde_json::json;

    #[test]
    fn config_debug_redacts_the_token() {
        let config = YouTrackConfig::from_settings(
            "https://example.youtrack.cloud/api",
            "perm:super-secret-token",
            20,
        )
        .expect("config");

        let debug = format!("{config:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("perm:super-secret-token"));
    }

    #[test]
    fn from_settings_trims_and_rejects_empty_values() {
        let config =
            YouTrackConfig::from_settings("  https://example.youtrack.cloud/api  ", " tok ", 0)
                .expect("config");
        assert_eq!(config.base_url, "https://example.youtrack.cloud/api");
        assert_eq!(config.token, "tok");
        assert_eq!(config.request_timeout_secs, 20, "zero timeout falls back");

        assert!(YouTrackConfig::from_settings("", "tok", 20).is_err());
        assert!(YouTrackConfig::from_settings("https://x.example", "   ", 20).is_err());
    }

    #[test]
    fn endpoint_joining_normalizes_slashes() {
        let client = YouTrackClient::scaffold_default();
        assert_eq!(
            client.endpoint("admin/projects"),
            "https://scaffold.youtrack.example/api/admin/projects"
        );
        assert_eq!(
            client.endpoint("/issues/I-1/tags"),
            "https://scaffold.youtrack.example/api/issues/I-1/tags"
        );
    }

    #[test]
    fn project_record_decodes_nested_issues_and_tags() {
        let payload = json!({
            "id": "P1",
            "name": "Alpha",
            "issues": [
                {
                    "id": "I1",
                    "summary": "Test Run",
                    "tags": [{ "id": "T1", "name": "to-be-tested" }]
                }
            ]
        });

        let record: ProjectRecord = serde_json::from_value(payload).expect("decode project");
        let project = record.into_project();
        assert_eq!(project.id.as_str(), "P1");
        assert_eq!(project.name, "Alpha");
        assert_eq!(project.issues.len(), 1);
        assert!(project.issues[0].has_tag_named("to-be-tested"));
    }

    #[test]
    fn project_record_tolerates_numeric_ids_and_missing_fields() {
        let payload = json!({ "id": 42 });
        let record: ProjectRecord = serde_json::from_value(payload).expect("decode project");
        let project = record.into_project();
        assert_eq!(project.id.as_str(), "42");
        assert_eq!(project.name, "");
        assert!(project.issues.is_empty());
    }

    #[test]
    fn tag_record_rejects_a_missing_id() {
        let payload = json!({ "name": "to-be-tested" });
        assert!(serde_json::from_value::<TagRecord>(payload).is_err());
    }
}
