//! HTTP client for the issue API plus the view-side helpers built on it:
//! debounced search and the duplicate-review browser.

pub mod browser;
pub mod search;

use crate::models::counts::IssueCounts;
use crate::models::duplicate::DuplicateReport;
use crate::models::issue::{Issue, IssueInput};
use crate::models::query::{BulkCreateOutcome, DeleteOutcome, IssueFilters, IssuePage, UpdateOutcome};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::future::Future;
use thiserror::Error;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status and a `{message}` body.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Failed to encode filters: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(err) => err.status().map(|s| s.as_u16()),
            ClientError::Encode(_) => None,
        }
    }
}

/// Where list views read issues from. Implemented by [`IssueClient`] and by
/// in-memory doubles in tests.
pub trait IssueSource: Send + Sync + 'static {
    fn list_issues(
        &self,
        filters: IssueFilters,
    ) -> impl Future<Output = ClientResult<IssuePage>> + Send;

    fn find_duplicates(
        &self,
        filters: IssueFilters,
    ) -> impl Future<Output = ClientResult<DuplicateReport>> + Send;
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Clone)]
pub struct IssueClient {
    http: reqwest::Client,
    base_url: String,
}

impl IssueClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn list(&self, filters: &IssueFilters) -> ClientResult<IssuePage> {
        let encoded = serde_json::to_string(filters)?;
        let response = self
            .http
            .get(self.url("/api/issues"))
            .query(&[("filters", encoded)])
            .send()
            .await?;
        decode(response).await
    }

    pub async fn counts(&self) -> ClientResult<IssueCounts> {
        let response = self.http.get(self.url("/api/issues/count")).send().await?;
        decode(response).await
    }

    pub async fn duplicates(&self, filters: &IssueFilters) -> ClientResult<DuplicateReport> {
        let encoded = serde_json::to_string(filters)?;
        let response = self
            .http
            .get(self.url("/api/issues/duplicates"))
            .query(&[("filters", encoded)])
            .send()
            .await?;
        decode(response).await
    }

    pub async fn create(&self, input: &IssueInput) -> ClientResult<Issue> {
        let response = self
            .http
            .post(self.url("/api/issues"))
            .json(input)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn update(&self, id: i64, input: &IssueInput) -> ClientResult<UpdateOutcome> {
        let response = self
            .http
            .put(self.url("/api/issues"))
            .query(&[("id", id)])
            .json(input)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn delete(&self, id: i64) -> ClientResult<DeleteOutcome> {
        let response = self
            .http
            .delete(self.url("/api/issues"))
            .query(&[("id", id)])
            .send()
            .await?;
        decode(response).await
    }

    pub async fn bulk_create(&self, rows: &[IssueInput]) -> ClientResult<BulkCreateOutcome> {
        let response = self
            .http
            .post(self.url("/api/issues/bulk"))
            .json(rows)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn upload_csv(&self, file_name: &str, contents: Vec<u8>) -> ClientResult<BulkCreateOutcome> {
        let part = reqwest::multipart::Part::bytes(contents)
            .file_name(file_name.to_string())
            .mime_str("text/csv")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.url("/api/issues/bulk"))
            .multipart(form)
            .send()
            .await?;
        decode(response).await
    }
}

impl IssueSource for IssueClient {
    fn list_issues(
        &self,
        filters: IssueFilters,
    ) -> impl Future<Output = ClientResult<IssuePage>> + Send {
        async move { self.list(&filters).await }
    }

    fn find_duplicates(
        &self,
        filters: IssueFilters,
    ) -> impl Future<Output = ClientResult<DuplicateReport>> + Send {
        async move { self.duplicates(&filters).await }
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ClientResult<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let message = match response.json::<ApiErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string(),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}
