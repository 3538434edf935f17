//! REST API client for the SolaSola server endpoints.
//!
//! Wraps task submission, status polling, layout retrieval, cancellation,
//! model management, health and user configuration using [`reqwest`].

use std::collections::BTreeMap;
use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;

use solasola_core::config::UserConfigOverrides;
use solasola_core::error::CoreError;
use solasola_core::install::{ManageRequest, ManageResponse, ModelsStatus};
use solasola_core::layout::ProgressLayout;
use solasola_core::task::TaskSnapshot;
use solasola_core::types::TaskId;

/// Header carrying the tab identity on model management requests.
pub const CLIENT_ID_HEADER: &str = "X-Client-ID";

/// HTTP client for one SolaSola server.
#[derive(Debug, Clone)]
pub struct SolaSolaApi {
    client: reqwest::Client,
    base_url: String,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered 404 for the task or layout.
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Non-2xx status without a usable error message.
    #[error("Server error ({status}): {body}")]
    Status { status: u16, body: String },

    /// The server refused the request with an `{error}` message.
    #[error("{0}")]
    Rejected(String),

    /// The body did not match the expected shape.
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

impl From<ApiError> for CoreError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Request(e) => CoreError::Transport(e.to_string()),
            ApiError::NotFound { resource } => CoreError::NotFound {
                entity: "resource",
                id: resource,
            },
            ApiError::Status { status, body } => {
                CoreError::Transport(format!("HTTP {status}: {body}"))
            }
            ApiError::Rejected(msg) => CoreError::Validation(msg),
            ApiError::Decode(e) => CoreError::Internal(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

/// What the server should do with the uploaded files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Full analysis of the music files.
    #[default]
    Abc,
    /// Split a lyrics file only.
    LyricsOnly,
}

impl ProcessingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingMode::Abc => "abc",
            ProcessingMode::LyricsOnly => "lyrics_only",
        }
    }
}

/// One file part of a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self { file_name, bytes })
    }
}

/// Body of `POST /start_processing`.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub music_files: Vec<UploadFile>,
    pub lyrics_file: Option<UploadFile>,
    pub mode: ProcessingMode,
    /// Free-form fields (`demucs_model`, `display_title`, `client_os`, ...).
    pub fields: BTreeMap<String, String>,
}

impl SubmitRequest {
    /// Reject submissions the server would refuse for missing inputs.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self.mode {
            ProcessingMode::Abc if self.music_files.is_empty() => Err(CoreError::Validation(
                "Full analysis requires at least one music file".to_string(),
            )),
            ProcessingMode::LyricsOnly if self.lyrics_file.is_none() => Err(
                CoreError::Validation("Lyrics split requires a lyrics file".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn into_form(self) -> Form {
        let mut form = Form::new().text("mode", self.mode.as_str());
        for file in self.music_files {
            form = form.part("music_files", Part::bytes(file.bytes).file_name(file.file_name));
        }
        if let Some(file) = self.lyrics_file {
            form = form.part("lyrics_file", Part::bytes(file.bytes).file_name(file.file_name));
        }
        for (key, value) in self.fields {
            form = form.text(key, value);
        }
        form
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: Option<TaskId>,
    error: Option<String>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub checks: serde_json::Value,
}

impl HealthReport {
    /// `ok` and `degraded` both mean the server process is up.
    pub fn is_up(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "degraded")
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl SolaSolaApi {
    /// * `base_url` - HTTP base URL, e.g. `http://localhost:5656`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`] (connection pooling).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Submit files for processing. Returns the server-assigned task id.
    pub async fn submit(&self, request: SubmitRequest) -> Result<TaskId, ApiError> {
        request
            .validate()
            .map_err(|e| ApiError::Rejected(e.to_string()))?;

        let response = self
            .client
            .post(self.url("/start_processing"))
            .multipart(request.into_form())
            .send()
            .await?;

        let body: SubmitResponse = Self::parse_response(response, "task").await?;
        match (body.task_id, body.error) {
            (Some(task_id), _) => {
                tracing::info!(task_id = %task_id, "Task submitted");
                Ok(task_id)
            }
            (None, Some(error)) => Err(ApiError::Rejected(error)),
            (None, None) => Err(ApiError::Rejected(
                "Server did not return a task id".to_string(),
            )),
        }
    }

    /// `GET /status/{id}`.
    pub async fn status(&self, task_id: &str) -> Result<TaskSnapshot, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/status/{task_id}")))
            .send()
            .await?;
        Self::parse_response(response, "task").await
    }

    /// `GET /api/task_layout/{id}`. 404 while the layout is not generated.
    pub async fn layout(&self, task_id: &str) -> Result<ProgressLayout, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/api/task_layout/{task_id}")))
            .send()
            .await?;
        Self::parse_response(response, "layout").await
    }

    /// `POST /cancel/{id}`. The effect is observed through polling.
    pub async fn cancel(&self, task_id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/cancel/{task_id}")))
            .send()
            .await?;
        Self::ensure_success(response, "task").await?;
        Ok(())
    }

    pub async fn models_status(&self) -> Result<ModelsStatus, ApiError> {
        let response = self
            .client
            .get(self.url("/api/models_status"))
            .send()
            .await?;
        Self::parse_response(response, "models").await
    }

    /// Force the server to drop its cached sizes and re-scan.
    pub async fn refresh_models_status(&self) -> Result<ModelsStatus, ApiError> {
        let response = self
            .client
            .post(self.url("/api/refresh_models_status"))
            .send()
            .await?;
        Self::parse_response(response, "models").await
    }

    /// `POST /api/manage_model` on behalf of `client_id`.
    ///
    /// A failed delete is answered with `{status:"error", message}` and a
    /// 5xx code; that body is returned as a normal response.
    pub async fn manage_model(
        &self,
        client_id: &str,
        request: &ManageRequest,
    ) -> Result<ManageResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/api/manage_model"))
            .header(CLIENT_ID_HEADER, client_id)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if let Ok(parsed) = serde_json::from_str::<ManageResponse>(&body) {
            return Ok(parsed);
        }
        Err(Self::error_from(status, body, "model"))
    }

    /// `GET /health`. A 503 still carries a report.
    pub async fn health(&self) -> Result<HealthReport, ApiError> {
        let response = self.client.get(self.url("/health")).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() || status == StatusCode::SERVICE_UNAVAILABLE {
            if let Ok(report) = serde_json::from_str(&body) {
                return Ok(report);
            }
        }
        Err(Self::error_from(status, body, "health"))
    }

    /// `GET /api/config`: user overrides of the client defaults.
    pub async fn user_config(&self) -> Result<UserConfigOverrides, ApiError> {
        let response = self.client.get(self.url("/api/config")).send().await?;
        Self::parse_response(response, "config").await
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or the mapped error on failure.
    async fn ensure_success(
        response: reqwest::Response,
        resource: &str,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(Self::error_from(status, body, resource));
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        resource: &str,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response, resource).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    fn error_from(status: StatusCode, body: String, resource: &str) -> ApiError {
        if status == StatusCode::NOT_FOUND {
            return ApiError::NotFound {
                resource: resource.to_string(),
            };
        }
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.or(b.message));
        match message {
            Some(msg) if status.is_client_error() => ApiError::Rejected(msg),
            _ => ApiError::Status {
                status: status.as_u16(),
                body,
            },
        }
    }
}
