use serde::{Deserialize, Serialize};

/// Summary of the per-project sentinel issue.
pub const TEST_RUN_SUMMARY: &str = "Test Run";
/// Name of the globally shared sentinel tag.
pub const TEST_TAG_NAME: &str = "to-be-tested";

macro_rules! string_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

string_id!(ProjectId);
string_id!(IssueId);
string_id!(TagId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Issue {
    pub fn has_tag_named(&self, name: &str) -> bool {
        self.tags.iter().any(|tag| tag.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl Project {
    /// The project's sentinel issue, matched by exact summary.
    pub fn test_run_issue(&self) -> Option<&Issue> {
        self.issues
            .iter()
            .find(|issue| issue.summary == TEST_RUN_SUMMARY)
    }
}
