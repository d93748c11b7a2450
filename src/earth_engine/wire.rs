//! Response bodies of the Earth Engine REST API.
use crate::imagery::{ImageMetadata, TaskState};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListImagesResponse {
    #[serde(default)]
    pub images: Vec<EeImage>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EeImage {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub bands: Vec<EeBand>,
}

#[derive(Deserialize, Debug)]
pub struct EeBand {
    pub id: String,
}

impl EeImage {
    pub fn into_metadata(self, cloud_cover_property: &str) -> ImageMetadata {
        let cloud_cover = self
            .properties
            .get(cloud_cover_property)
            .and_then(Value::as_f64);
        // Asset names look like projects/<project>/assets/<id>
        let id = self.id.unwrap_or_else(|| match self.name.split_once("/assets/") {
            Some((_, id)) => id.to_string(),
            None => self.name.clone(),
        });
        ImageMetadata {
            id,
            acquired: self.start_time,
            cloud_cover,
            bands: self.bands.into_iter().map(|b| b.id).collect(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<Status>,
    #[serde(default)]
    pub metadata: Option<OperationMetadata>,
}

#[derive(Deserialize, Debug)]
pub struct Status {
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize, Debug)]
pub struct OperationMetadata {
    #[serde(default)]
    pub state: Option<String>,
}

impl Operation {
    pub fn task_state(&self) -> TaskState {
        let failure = || {
            self.error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "no error message reported".to_string())
        };

        let state = self.metadata.as_ref().and_then(|m| m.state.as_deref());
        match state {
            Some("PENDING") => TaskState::Pending,
            Some("RUNNING") | Some("CANCELLING") => TaskState::Running,
            Some("SUCCEEDED") => TaskState::Succeeded,
            Some("CANCELLED") => TaskState::Cancelled,
            Some("FAILED") => TaskState::Failed(failure()),
            _ if self.done && self.error.is_some() => TaskState::Failed(failure()),
            _ if self.done => TaskState::Succeeded,
            _ => TaskState::Pending,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Turns a non-success response body into a readable error.
pub fn format_api_error(status: StatusCode, url: &str, body: &str) -> anyhow::Error {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => anyhow!(
            "Earth Engine request failed: HTTP {} {} for {}: {}",
            status.as_u16(),
            envelope.error.status.unwrap_or_default(),
            url,
            envelope.error.message
        ),
        Err(_) => anyhow!(
            "Earth Engine request failed: HTTP {} for {}: {}",
            status.as_u16(),
            url,
            body.trim()
        ),
    }
}
