//! The remote imagery service, as seen by a run.
use crate::export_config::DateRange;
use crate::export_request::ExportRequest;
use crate::geometry::Point;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionQuery {
    pub collection_id: String,
    pub point: Point,
    pub dates: DateRange,
    pub cloud_cover_property: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetadata {
    pub id: String,
    pub acquired: Option<DateTime<Utc>>,
    pub cloud_cover: Option<f64>,
    pub bands: Vec<String>,
}

/// Handle to a queued export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTask {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_) | Self::Cancelled)
    }
}

pub trait ImageryApi {
    type Session;

    async fn initialize(self: &Self, credentials: &Path) -> Result<Self::Session>;

    /// Images of the collection intersecting the point within the date range, in the
    /// order the service lists them.
    async fn list_images(
        self: &Self,
        session: &Self::Session,
        query: &CollectionQuery,
    ) -> Result<Vec<ImageMetadata>>;

    async fn submit_export(
        self: &Self,
        session: &Self::Session,
        request: &ExportRequest,
    ) -> Result<ExportTask>;

    async fn task_status(self: &Self, session: &Self::Session, task: &ExportTask)
        -> Result<TaskState>;
}
