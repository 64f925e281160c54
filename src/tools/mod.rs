use crate::analysis::StatsContext;
use crate::error::{ReportError, ReportResult};
use crate::logging::{stats_span, upload_span, window_span};
use crate::metrics::{METRICS, RequestTimer};
use crate::model::*;
use crate::render::render_html;
use crate::state::AppState;
use crate::window::slice_window;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, debug, info};

async fn observe<T>(
    operation: &'static str,
    fut: impl Future<Output = ReportResult<T>>,
) -> ReportResult<T> {
    let timer = RequestTimer::start(operation);
    let result = fut.await.map_err(|err| err.tracked(operation));
    timer.finish(&result);
    result
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReportTypeParams {
    pub report_type: String,
}

/// Raw upload as received from the transport.
#[derive(Debug, Clone)]
pub struct UploadReportParams {
    pub report_type: String,
    pub original_file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UploadParams {
    pub upload_id: UploadId,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SheetWindowParams {
    pub upload_id: UploadId,
    pub sheet: String,
    #[serde(flatten)]
    pub window: WindowRequest,
}

pub async fn list_reports(state: Arc<AppState>) -> ReportResult<ReportListResponse> {
    observe("list_reports", async {
        Ok(ReportListResponse {
            reports: state.catalog().descriptors(),
        })
    })
    .await
}

/// Per catalog entry: no upload yet, available, or registered with its
/// backing file gone.
pub async fn report_status(state: Arc<AppState>) -> ReportResult<ReportStatusResponse> {
    observe("report_status", async {
        let mut reports = Vec::new();
        for report in state.catalog().iter() {
            let (upload_state, upload) = match state.store().latest(&report.key) {
                None => (UploadState::NoUpload, None),
                Some(descriptor) => {
                    let upload_state = if state.backing_file_present(&descriptor).await {
                        UploadState::Available
                    } else {
                        UploadState::FileNotFound
                    };
                    (upload_state, Some(descriptor.as_ref().clone()))
                }
            };
            reports.push(ReportStatusEntry {
                report_type: report.key.clone(),
                title: report.title.clone(),
                state: upload_state,
                upload,
            });
        }
        Ok(ReportStatusResponse { reports })
    })
    .await
}

pub async fn upload_report(
    state: Arc<AppState>,
    params: UploadReportParams,
) -> ReportResult<UploadDescriptor> {
    let span = upload_span(&params.report_type);
    observe("upload", async {
        let UploadReportParams {
            report_type,
            original_file_name,
            bytes,
        } = params;
        let known = state.catalog().contains(&report_type);
        let size = bytes.len();
        let result = state
            .accept_upload(&report_type, &original_file_name, bytes)
            .await;
        if known {
            METRICS.record_upload(&report_type, result.is_ok());
        }
        if let Err(err) = &result {
            info!(report_type = %report_type, size, error = %err, "upload rejected");
        }
        result
    })
    .instrument(span)
    .await
}

pub async fn latest_upload(
    state: Arc<AppState>,
    params: ReportTypeParams,
) -> ReportResult<UploadDescriptor> {
    observe("latest_upload", async {
        let report = state.catalog().get(&params.report_type)?;
        state
            .store()
            .latest(&report.key)
            .map(|descriptor| descriptor.as_ref().clone())
            .ok_or_else(|| ReportError::upload(report.key.as_str()))
    })
    .await
}

pub async fn upload_history(
    state: Arc<AppState>,
    params: ReportTypeParams,
) -> ReportResult<UploadHistoryResponse> {
    observe("upload_history", async {
        let report = state.catalog().get(&params.report_type)?;
        let uploads = state
            .store()
            .history(&report.key)
            .into_iter()
            .map(|descriptor| descriptor.as_ref().clone())
            .collect();
        Ok(UploadHistoryResponse {
            report_type: report.key.clone(),
            uploads,
        })
    })
    .await
}

pub async fn describe_upload(
    state: Arc<AppState>,
    params: UploadParams,
) -> ReportResult<UploadDescriptor> {
    observe("describe_upload", async {
        state
            .store()
            .get(&params.upload_id)
            .map(|descriptor| descriptor.as_ref().clone())
            .ok_or_else(|| ReportError::upload(params.upload_id.as_str()))
    })
    .await
}

/// Stats of the latest upload's default sheet. A missing upload or backing
/// file is a `FILE_NOT_FOUND` response, not an error.
pub async fn report_stats(
    state: Arc<AppState>,
    params: ReportTypeParams,
) -> ReportResult<StatsResponse> {
    let span = stats_span(&params.report_type);
    observe("stats", async {
        let report = state.catalog().get(&params.report_type)?;
        let Some(descriptor) = state.store().latest(&report.key) else {
            debug!(report_type = %report.key, "stats requested without upload");
            return Ok(StatsResponse::file_not_found(&report.key));
        };
        let workbook = match state.open_descriptor(&descriptor).await {
            Ok(workbook) => workbook,
            Err(ReportError::FileNotFound { .. }) => {
                return Ok(StatsResponse::file_not_found(&report.key));
            }
            Err(err) => return Err(err),
        };
        let sheet = workbook
            .sheet(&descriptor.default_sheet)
            .ok_or_else(|| ReportError::sheet(&descriptor.default_sheet))?;

        let ctx = StatsContext {
            bounds: state.scan_bounds(),
            markers: state.markers(),
        };
        let result = state.registry().extract(&report.key, &*sheet, &ctx);
        Ok(StatsResponse {
            report_type: report.key.clone(),
            status: StatsStatus::Ok,
            upload_id: Some(descriptor.id.clone()),
            sheet: Some(descriptor.default_sheet.clone()),
            result: Some(result),
        })
    })
    .instrument(span)
    .await
}

async fn window_for(state: &AppState, params: SheetWindowParams) -> ReportResult<WindowResponse> {
    let (descriptor, workbook) = state.open_upload(&params.upload_id).await?;
    let sheet = workbook
        .sheet(&params.sheet)
        .ok_or_else(|| ReportError::sheet(&params.sheet))?;
    let window = slice_window(&descriptor.id, &*sheet, params.window);
    debug!(
        upload_id = %descriptor.id,
        sheet = %params.sheet,
        rows = window.slice.rows,
        cols = window.slice.cols,
        merges = window.merges.len(),
        "window served"
    );
    Ok(window)
}

pub async fn sheet_window(
    state: Arc<AppState>,
    params: SheetWindowParams,
) -> ReportResult<WindowResponse> {
    let span = window_span(params.upload_id.as_str(), &params.sheet);
    observe("window", window_for(&state, params))
        .instrument(span)
        .await
}

pub async fn sheet_grid_html(state: Arc<AppState>, params: SheetWindowParams) -> ReportResult<String> {
    let span = window_span(params.upload_id.as_str(), &params.sheet);
    observe("grid_html", async {
        let window = window_for(&state, params).await?;
        render_html(&window)
    })
    .instrument(span)
    .await
}

/// JSON Schemas of the request and response shapes, keyed by type name.
#[derive(Debug, Clone, Serialize)]
pub struct ApiSchemas {
    pub schemas: BTreeMap<&'static str, serde_json::Value>,
}

pub fn api_schemas() -> ReportResult<ApiSchemas> {
    let mut schemas = BTreeMap::new();
    schemas.insert("ReportListResponse", serde_json::to_value(schema_for!(ReportListResponse))?);
    schemas.insert("ReportStatusResponse", serde_json::to_value(schema_for!(ReportStatusResponse))?);
    schemas.insert("UploadDescriptor", serde_json::to_value(schema_for!(UploadDescriptor))?);
    schemas.insert("UploadHistoryResponse", serde_json::to_value(schema_for!(UploadHistoryResponse))?);
    schemas.insert("WindowRequest", serde_json::to_value(schema_for!(WindowRequest))?);
    schemas.insert("WindowResponse", serde_json::to_value(schema_for!(WindowResponse))?);
    schemas.insert("StatsResponse", serde_json::to_value(schema_for!(StatsResponse))?);
    Ok(ApiSchemas { schemas })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemas_cover_wire_types() {
        let schemas = api_schemas().unwrap().schemas;
        assert!(schemas.contains_key("WindowResponse"));
        let stats = serde_json::to_string(&schemas["StatsResponse"]).unwrap();
        assert!(stats.contains("FILE_NOT_FOUND"));
        assert!(stats.contains("no_total_row"));
    }

    #[test]
    fn window_params_flatten_request() {
        let params: SheetWindowParams = serde_json::from_value(serde_json::json!({
            "upload_id": "payroll-000002",
            "sheet": "Data",
            "row_start": 100,
        }))
        .unwrap();
        assert_eq!(params.window.row_start, 100);
        assert_eq!(params.window.row_limit, DEFAULT_ROW_LIMIT);
        assert_eq!(params.window.col_limit, DEFAULT_COL_LIMIT);
    }
}
