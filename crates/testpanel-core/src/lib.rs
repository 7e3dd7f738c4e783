pub mod client;
pub mod commands;
pub mod error;
pub mod model;
pub mod reconciler;
pub mod test_support;

pub use client::{CreateIssueRequest, CreateTagRequest, TrackerClient};
pub use commands::{PanelCommand, PanelHandle};
pub use error::CoreError;
pub use model::{
    Issue, IssueId, Project, ProjectId, Tag, TagId, TEST_RUN_SUMMARY, TEST_TAG_NAME,
};
pub use reconciler::{
    PanelPhase, PanelRow, PanelSnapshot, PassOutcome, Reconciler, ReconcileReport, RowAction,
    RowOutcome, RowState, RowSync, DEFAULT_CREATE_CONCURRENCY,
};
