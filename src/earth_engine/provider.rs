use super::wire::{format_api_error, ListImagesResponse, Operation, TokenResponse};
use crate::credentials::{ServiceAccountKey, EARTH_ENGINE_SCOPES};
use crate::export_request::ExportRequest;
use crate::imagery::{CollectionQuery, ExportTask, ImageMetadata, ImageryApi, TaskState};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://earthengine.googleapis.com/";
const PUBLIC_CATALOG_PROJECT: &str = "earthengine-public";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const PAGE_SIZE: u32 = 100;

pub struct Session {
    project: String,
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl Session {
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        if Utc::now() >= self.expires_at() {
            return Err(anyhow!("Earth Engine access token expired at {}", self.expires_at()));
        }
        Ok(request.bearer_auth(&self.access_token))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("project", &self.project)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

pub struct EarthEngine {
    http: reqwest::Client,
    base_url: Url,
    project: Option<String>,
}

impl EarthEngine {
    pub fn new() -> Result<Self> {
        let base_url = Url::parse(DEFAULT_BASE_URL)?;
        Ok(Self::with_base_url(base_url))
    }

    pub fn with_base_url(base_url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            project: None,
        }
    }

    /// Bill exports to `project` rather than the key's own project.
    pub fn with_project(mut self, project: Option<String>) -> Self {
        self.project = project;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("invalid Earth Engine endpoint {path}"))?;
        Ok(url)
    }
}

fn midnight_utc(date: NaiveDate) -> String {
    format!("{date}T00:00:00Z")
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let url = response.url().to_string();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
        return Err(format_api_error(status, &url, &body));
    }
    let value = response
        .json::<T>()
        .await
        .with_context(|| format!("unexpected response body from {url}"))?;
    Ok(value)
}

impl ImageryApi for EarthEngine {
    type Session = Session;

    async fn initialize(self: &Self, credentials: &Path) -> Result<Session> {
        let key = ServiceAccountKey::read(credentials)?;
        let now = Utc::now();
        let assertion = key.assertion(&EARTH_ENGINE_SCOPES, now)?;

        debug!(client_email = %key.client_email, token_uri = %key.token_uri, "Requesting access token");
        let response = self
            .http
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let token: TokenResponse = read_json(response).await?;

        let project = self.project.clone().unwrap_or(key.project_id);
        let session = Session {
            project,
            access_token: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        };
        info!(
            project = %session.project(),
            expires_at = %session.expires_at(),
            "Initialized Earth Engine session"
        );
        Ok(session)
    }

    async fn list_images(
        self: &Self,
        session: &Session,
        query: &CollectionQuery,
    ) -> Result<Vec<ImageMetadata>> {
        let path = format!(
            "v1/projects/{}/assets/{}:listImages",
            PUBLIC_CATALOG_PROJECT, query.collection_id
        );
        let region = query.point.to_geojson().to_string();
        let start = midnight_utc(query.dates.start());
        // listImages treats endTime as exclusive
        let end = midnight_utc(query.dates.end_exclusive());

        let mut images = vec![];
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.endpoint(&path)?;
            {
                let mut pairs = url.query_pairs_mut();
                pairs
                    .append_pair("startTime", &start)
                    .append_pair("endTime", &end)
                    .append_pair("region", &region)
                    .append_pair("view", "FULL")
                    .append_pair("pageSize", &PAGE_SIZE.to_string());
                if let Some(token) = &page_token {
                    pairs.append_pair("pageToken", token);
                }
            }

            let response = session.authorize(self.http.get(url))?.send().await?;
            let page: ListImagesResponse = read_json(response).await?;
            debug!(count = page.images.len(), "Listed page of images");

            images.extend(
                page.images
                    .into_iter()
                    .map(|image| image.into_metadata(&query.cloud_cover_property)),
            );

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(images)
    }

    async fn submit_export(
        self: &Self,
        session: &Session,
        request: &ExportRequest,
    ) -> Result<ExportTask> {
        let url = self.endpoint(&format!("v1/projects/{}/image:export", session.project()))?;
        let response = session
            .authorize(self.http.post(url))?
            .json(&request.to_body())
            .send()
            .await?;
        let operation: Operation = read_json(response).await?;
        Ok(ExportTask {
            name: operation.name,
        })
    }

    async fn task_status(self: &Self, session: &Session, task: &ExportTask) -> Result<TaskState> {
        let url = self.endpoint(&format!("v1/{}", task.name))?;
        let response = session.authorize(self.http.get(url))?.send().await?;
        let operation: Operation = read_json(response).await?;
        Ok(operation.task_state())
    }
}
