use crate::commands::issues::{parse_issue_id, BulkPayload, IssueService};
use crate::commands::settings::Settings;
use crate::error::{IssueError, IssueResult};
use crate::models::counts::IssueCounts;
use crate::models::duplicate::DuplicateReport;
use crate::models::issue::{Issue, IssueInput};
use crate::models::query::{BulkCreateOutcome, DeleteOutcome, IssueFilters, IssuePage, UpdateOutcome};
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

const UPLOAD_FIELD: &str = "file";
// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: IssueService,
    pub settings: Settings,
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.settings.max_upload_bytes + MULTIPART_OVERHEAD;
    let cors = cors_layer(&state.settings.allowed_origins);

    Router::new()
        .route("/health", get(health))
        .route("/api/health", get(health))
        .route(
            "/api/issues",
            get(list_issues)
                .post(create_issue)
                .put(update_issue)
                .delete(delete_issue),
        )
        .route("/api/issues/count", get(count_issues))
        .route("/api/issues/duplicates", get(find_duplicates))
        .route("/api/issues/bulk", post(bulk_create_issues))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for IssueError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("Request failed: {self}");
        } else {
            log::debug!("Rejected request: {self}");
        }

        (
            status,
            Json(ErrorBody {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Runs blocking store work off the async executor.
async fn blocking<T, F>(work: F) -> IssueResult<T>
where
    F: FnOnce() -> IssueResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| IssueError::Task(e.to_string()))?
}

#[derive(Debug, Deserialize)]
struct FilterParams {
    filters: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: Option<String>,
}

fn parse_filters(raw: Option<String>) -> IssueResult<IssueFilters> {
    match raw.filter(|value| !value.trim().is_empty()) {
        None => Ok(IssueFilters::default()),
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| IssueError::validation(format!("Invalid filters: {e}"))),
    }
}

fn body_error(rejection: JsonRejection) -> IssueError {
    IssueError::validation(format!("Invalid request body: {}", rejection.body_text()))
}

async fn health() -> &'static str {
    "OK"
}

async fn list_issues(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FilterParams>,
) -> Result<Json<IssuePage>, IssueError> {
    let filters = parse_filters(params.filters)?;
    let service = state.service.clone();
    let page = blocking(move || service.list(&filters)).await?;
    Ok(Json(page))
}

async fn count_issues(State(state): State<Arc<AppState>>) -> Result<Json<IssueCounts>, IssueError> {
    let service = state.service.clone();
    let counts = blocking(move || service.counts()).await?;
    Ok(Json(counts))
}

async fn find_duplicates(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FilterParams>,
) -> Result<Json<DuplicateReport>, IssueError> {
    let filters = parse_filters(params.filters)?;
    let service = state.service.clone();
    let report = blocking(move || service.duplicates(&filters)).await?;
    Ok(Json(report))
}

async fn create_issue(
    State(state): State<Arc<AppState>>,
    body: Result<Json<IssueInput>, JsonRejection>,
) -> Result<Json<Issue>, IssueError> {
    let Json(input) = body.map_err(body_error)?;
    let service = state.service.clone();
    let issue = blocking(move || service.create(input)).await?;
    Ok(Json(issue))
}

async fn update_issue(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IdParams>,
    body: Result<Json<IssueInput>, JsonRejection>,
) -> Result<Json<UpdateOutcome>, IssueError> {
    let id = parse_issue_id(params.id.as_deref())?
        .ok_or_else(|| IssueError::validation("Id is required"))?;
    let Json(input) = body.map_err(body_error)?;
    let service = state.service.clone();
    let outcome = blocking(move || service.update(Some(id), input)).await?;
    Ok(Json(outcome))
}

async fn delete_issue(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IdParams>,
) -> Result<Json<DeleteOutcome>, IssueError> {
    let id = parse_issue_id(params.id.as_deref())?;
    let service = state.service.clone();
    let outcome = blocking(move || service.delete(id)).await?;
    Ok(Json(outcome))
}

async fn bulk_create_issues(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<BulkCreateOutcome>, IssueError> {
    let payload = if is_multipart(request.headers()) {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| IssueError::validation(format!("File upload error: {}", e.body_text())))?;
        BulkPayload::Csv(read_csv_upload(multipart, state.settings.max_upload_bytes).await?)
    } else {
        let Json(rows) = Json::<Vec<IssueInput>>::from_request(request, &state)
            .await
            .map_err(body_error)?;
        BulkPayload::Rows(rows)
    };

    let service = state.service.clone();
    let outcome = blocking(move || service.bulk_create(payload)).await?;
    Ok(Json(outcome))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Reads the single CSV file from the `file` field, enforcing type and size.
async fn read_csv_upload(mut multipart: Multipart, max_bytes: usize) -> IssueResult<Vec<u8>> {
    let mut upload: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| upload_error(e, max_bytes))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        if upload.is_some() {
            return Err(IssueError::validation(
                "Too many files. Only one file is allowed.",
            ));
        }

        let is_csv = field.content_type() == Some("text/csv")
            || field
                .file_name()
                .map(|name| name.to_lowercase().ends_with(".csv"))
                .unwrap_or(false);
        if !is_csv {
            return Err(IssueError::validation("Only CSV files are allowed"));
        }

        let bytes = field.bytes().await.map_err(|e| upload_error(e, max_bytes))?;
        if bytes.len() > max_bytes {
            return Err(file_too_large(max_bytes));
        }
        upload = Some(bytes.to_vec());
    }

    upload.ok_or_else(|| {
        IssueError::validation(format!(
            "No file uploaded. Expected a CSV file in the '{UPLOAD_FIELD}' field."
        ))
    })
}

fn upload_error(err: MultipartError, max_bytes: usize) -> IssueError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        file_too_large(max_bytes)
    } else {
        IssueError::validation(format!("File upload error: {}", err.body_text()))
    }
}

fn file_too_large(max_bytes: usize) -> IssueError {
    const MIB: usize = 1024 * 1024;
    let limit = if max_bytes % MIB == 0 {
        format!("{}MB", max_bytes / MIB)
    } else {
        format!("{max_bytes} bytes")
    };
    IssueError::validation(format!("File too large. Maximum size is {limit}."))
}
