//! Error taxonomy for the report ingestion service.
//!
//! Every operation returns [`ReportError`]. Each variant maps to a stable
//! [`ErrorCode`] (numeric code plus metrics category) and an HTTP status, and
//! failures are counted in [`ERROR_METRICS`] by operation.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// What kind of key a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MissingKind {
    ReportType,
    Upload,
    Sheet,
}

#[derive(Debug, Error)]
pub enum ReportError {
    /// The uploaded bytes are not a well-formed workbook.
    #[error("failed to parse workbook: {0}")]
    Parse(String),

    #[error("{kind} '{key}' not found")]
    NotFound { kind: MissingKind, key: String },

    /// Upload metadata exists but its backing file is gone.
    #[error("file for upload '{upload_id}' is no longer available")]
    FileNotFound { upload_id: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ReportResult<T> = std::result::Result<T, ReportError>;

impl ReportError {
    pub fn report_type(key: impl Into<String>) -> Self {
        ReportError::NotFound {
            kind: MissingKind::ReportType,
            key: key.into(),
        }
    }

    pub fn upload(key: impl Into<String>) -> Self {
        ReportError::NotFound {
            kind: MissingKind::Upload,
            key: key.into(),
        }
    }

    pub fn sheet(key: impl Into<String>) -> Self {
        ReportError::NotFound {
            kind: MissingKind::Sheet,
            key: key.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ReportError::Parse(_) => ErrorCode::ParseError,
            ReportError::NotFound { kind, .. } => match kind {
                MissingKind::ReportType => ErrorCode::ReportTypeNotFound,
                MissingKind::Upload => ErrorCode::UploadNotFound,
                MissingKind::Sheet => ErrorCode::SheetNotFound,
            },
            ReportError::FileNotFound { .. } => ErrorCode::FileNotFound,
            ReportError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            ReportError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            ReportError::Io(_) => ErrorCode::IoError,
            ReportError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Records this error against `operation` and hands it back.
    pub fn tracked(self, operation: &str) -> Self {
        ERROR_METRICS.record_error(&self.code(), Some(operation));
        self
    }
}

impl From<tokio::task::JoinError> for ReportError {
    fn from(err: tokio::task::JoinError) -> Self {
        ReportError::Internal(format!("background task failed: {err}"))
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        ReportError::Internal(format!("manifest serialization failed: {err}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    InvalidRequest = -32600,
    InternalError = -32603,
    ParseError = -32700,
    ReportTypeNotFound = -32001,
    UploadNotFound = -32002,
    SheetNotFound = -32006,
    FileNotFound = -32012,
    PayloadTooLarge = -32015,
    IoError = -32013,
}

impl ErrorCode {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "client_error",
            ErrorCode::ParseError => "parse_error",
            ErrorCode::ReportTypeNotFound | ErrorCode::UploadNotFound | ErrorCode::SheetNotFound => {
                "resource_not_found"
            }
            ErrorCode::FileNotFound => "file_not_found",
            ErrorCode::PayloadTooLarge => "resource_limit",
            ErrorCode::IoError => "io_error",
            ErrorCode::InternalError => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::ParseError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::ReportTypeNotFound | ErrorCode::UploadNotFound | ErrorCode::SheetNotFound => {
                StatusCode::NOT_FOUND
            }
            ErrorCode::FileNotFound => StatusCode::GONE,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::IoError | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire tag shown to the presenting page.
    pub fn tag(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::ReportTypeNotFound | ErrorCode::UploadNotFound | ErrorCode::SheetNotFound => {
                "NOT_FOUND"
            }
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::IoError => "IO_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// JSON body returned for failed requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub category: String,
    pub message: String,
    pub error_id: String,
}

impl ErrorBody {
    fn from_error(error: &ReportError) -> Self {
        let code = error.code();
        Self {
            code: code.tag().to_string(),
            category: code.category().to_string(),
            message: error.to_string(),
            error_id: generate_error_id(),
        }
    }
}

fn generate_error_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let timestamp = chrono::Utc::now().timestamp_millis();
    format!("err_{:x}_{:x}", timestamp, count)
}

impl IntoResponse for ReportError {
    fn into_response(self) -> Response {
        let status = self.code().status();
        let body = ErrorBody::from_error(&self);
        if status.is_server_error() {
            tracing::error!(error_id = %body.error_id, error = %self, "request failed");
        } else {
            tracing::debug!(error_id = %body.error_id, error = %self, "request rejected");
        }
        (status, Json(body)).into_response()
    }
}

/// Error counters by code, operation and category.
pub struct ErrorMetrics {
    by_code: RwLock<HashMap<ErrorCode, AtomicU64>>,
    by_operation: RwLock<HashMap<String, AtomicU64>>,
    by_category: RwLock<HashMap<&'static str, AtomicU64>>,
    total: AtomicU64,
}

impl ErrorMetrics {
    pub fn new() -> Self {
        Self {
            by_code: RwLock::new(HashMap::new()),
            by_operation: RwLock::new(HashMap::new()),
            by_category: RwLock::new(HashMap::new()),
            total: AtomicU64::new(0),
        }
    }

    pub fn record_error(&self, code: &ErrorCode, operation: Option<&str>) {
        self.total.fetch_add(1, Ordering::Relaxed);

        {
            let counters = self.by_code.read();
            if let Some(counter) = counters.get(code) {
                counter.fetch_add(1, Ordering::Relaxed);
            } else {
                drop(counters);
                self.by_code
                    .write()
                    .entry(*code)
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some(operation) = operation {
            let counters = self.by_operation.read();
            if let Some(counter) = counters.get(operation) {
                counter.fetch_add(1, Ordering::Relaxed);
            } else {
                drop(counters);
                self.by_operation
                    .write()
                    .entry(operation.to_string())
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        self.by_category
            .write()
            .entry(code.category())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        crate::metrics::METRICS.record_error(operation.unwrap_or("unknown"), code.category());
    }

    pub fn get_error_count(&self, code: &ErrorCode) -> u64 {
        self.by_code
            .read()
            .get(code)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn get_operation_error_count(&self, operation: &str) -> u64 {
        self.by_operation
            .read()
            .get(operation)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn get_category_count(&self, category: &str) -> u64 {
        self.by_category
            .read()
            .get(category)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl Default for ErrorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub static ERROR_METRICS: Lazy<ErrorMetrics> = Lazy::new(ErrorMetrics::new);
