use crate::error::{ReportError, ReportResult};
use crate::health::{self, HealthChecker};
use crate::metrics::METRICS;
use crate::model::{
    ReportListResponse, ReportStatusResponse, StatsResponse, UploadDescriptor,
    UploadHistoryResponse, UploadId, WindowRequest, WindowResponse,
};
use crate::state::AppState;
use crate::tools::{self, ApiSchemas, ReportTypeParams, SheetWindowParams, UploadParams};
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, FromRef, Multipart, Path, Query, State,
        multipart::MultipartError,
        rejection::QueryRejection,
    },
    http::{StatusCode, header},
    response::{Html, IntoResponse},
    routing::get,
};
use std::sync::Arc;

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;
const FALLBACK_FILE_NAME: &str = "upload.xlsx";

#[derive(Clone)]
pub struct HttpState {
    app: Arc<AppState>,
    health: Arc<HealthChecker>,
}

impl HttpState {
    pub fn new(app: Arc<AppState>) -> Self {
        let health = Arc::new(HealthChecker::new(app.clone()));
        Self { app, health }
    }
}

impl FromRef<HttpState> for Arc<AppState> {
    fn from_ref(state: &HttpState) -> Self {
        state.app.clone()
    }
}

impl FromRef<HttpState> for Arc<HealthChecker> {
    fn from_ref(state: &HttpState) -> Self {
        state.health.clone()
    }
}

pub fn build_router(app: Arc<AppState>) -> Router {
    let body_limit = app
        .config()
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/api/reports", get(list_reports))
        .route("/api/reports/status", get(report_status))
        .route(
            "/api/reports/{report_type}/uploads",
            get(upload_history).post(upload_report),
        )
        .route("/api/reports/{report_type}/latest", get(latest_upload))
        .route("/api/reports/{report_type}/stats", get(report_stats))
        .route("/api/uploads/{upload_id}", get(describe_upload))
        .route(
            "/api/uploads/{upload_id}/sheets/{sheet}/window",
            get(sheet_window),
        )
        .route(
            "/api/uploads/{upload_id}/sheets/{sheet}/grid",
            get(sheet_grid),
        )
        .route("/api/schema", get(api_schema))
        .route("/health", get(health::liveness_handler))
        .route("/ready", get(health::readiness_handler))
        .route("/health/components", get(health::components_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(HttpState::new(app))
}

async fn list_reports(State(state): State<Arc<AppState>>) -> ReportResult<Json<ReportListResponse>> {
    tools::list_reports(state).await.map(Json)
}

async fn report_status(
    State(state): State<Arc<AppState>>,
) -> ReportResult<Json<ReportStatusResponse>> {
    tools::report_status(state).await.map(Json)
}

async fn upload_report(
    State(state): State<Arc<AppState>>,
    Path(report_type): Path<String>,
    mut multipart: Multipart,
) -> ReportResult<(StatusCode, Json<UploadDescriptor>)> {
    let limit = state.config().max_upload_bytes;
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, limit))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original_file_name = field
            .file_name()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(FALLBACK_FILE_NAME)
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| multipart_error(err, limit))?;
        upload = Some((original_file_name, bytes.to_vec()));
        break;
    }
    let (original_file_name, bytes) = upload.ok_or_else(|| {
        ReportError::InvalidRequest("multipart field 'file' is required".to_string())
    })?;

    let descriptor = tools::upload_report(
        state,
        tools::UploadReportParams {
            report_type,
            original_file_name,
            bytes,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(descriptor)))
}

fn multipart_error(err: MultipartError, limit: usize) -> ReportError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ReportError::PayloadTooLarge { limit }
    } else {
        ReportError::InvalidRequest(format!("malformed multipart body: {}", err.body_text()))
    }
}

async fn upload_history(
    State(state): State<Arc<AppState>>,
    Path(report_type): Path<String>,
) -> ReportResult<Json<UploadHistoryResponse>> {
    tools::upload_history(state, ReportTypeParams { report_type })
        .await
        .map(Json)
}

async fn latest_upload(
    State(state): State<Arc<AppState>>,
    Path(report_type): Path<String>,
) -> ReportResult<Json<UploadDescriptor>> {
    tools::latest_upload(state, ReportTypeParams { report_type })
        .await
        .map(Json)
}

async fn report_stats(
    State(state): State<Arc<AppState>>,
    Path(report_type): Path<String>,
) -> ReportResult<Json<StatsResponse>> {
    tools::report_stats(state, ReportTypeParams { report_type })
        .await
        .map(Json)
}

async fn describe_upload(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
) -> ReportResult<Json<UploadDescriptor>> {
    tools::describe_upload(
        state,
        UploadParams {
            upload_id: UploadId(upload_id),
        },
    )
    .await
    .map(Json)
}

fn window_params(
    (upload_id, sheet): (String, String),
    query: Result<Query<WindowRequest>, QueryRejection>,
) -> ReportResult<SheetWindowParams> {
    let Query(window) = query
        .map_err(|rejection| ReportError::InvalidRequest(rejection.body_text()))?;
    Ok(SheetWindowParams {
        upload_id: UploadId(upload_id),
        sheet,
        window,
    })
}

async fn sheet_window(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(String, String)>,
    query: Result<Query<WindowRequest>, QueryRejection>,
) -> ReportResult<Json<WindowResponse>> {
    let params = window_params(path, query)?;
    tools::sheet_window(state, params).await.map(Json)
}

async fn sheet_grid(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(String, String)>,
    query: Result<Query<WindowRequest>, QueryRejection>,
) -> ReportResult<Html<String>> {
    let params = window_params(path, query)?;
    tools::sheet_grid_html(state, params).await.map(Html)
}

async fn api_schema() -> ReportResult<Json<ApiSchemas>> {
    tools::api_schemas().map(Json)
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        METRICS.encode(),
    )
}
