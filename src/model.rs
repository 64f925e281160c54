use crate::sheet::{CellValue, Dimensions, MergeRect};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct UploadId(pub String);

impl UploadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UploadId {
    fn from(value: &str) -> Self {
        UploadId(value.to_string())
    }
}

/// Metadata of one accepted upload. Also the on-disk manifest format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UploadDescriptor {
    pub id: UploadId,
    pub report_type: String,
    pub seq: u64,
    pub original_file_name: String,
    /// Container order, unique within the upload
    pub sheet_names: Vec<String>,
    pub default_sheet: String,
    /// RFC 3339
    pub created_at: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReportDescriptor {
    pub key: String,
    pub title: String,
    pub preferred_sheet: Option<String>,
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReportListResponse {
    pub reports: Vec<ReportDescriptor>,
}

/// Retained uploads of one report type, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UploadHistoryResponse {
    pub report_type: String,
    pub uploads: Vec<UploadDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadState {
    NoUpload,
    Available,
    FileNotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReportStatusEntry {
    pub report_type: String,
    pub title: String,
    pub state: UploadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReportStatusResponse {
    pub reports: Vec<ReportStatusEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WindowRequest {
    #[serde(default)]
    pub row_start: u32,
    #[serde(default = "default_row_limit")]
    pub row_limit: u32,
    #[serde(default)]
    pub col_start: u32,
    #[serde(default = "default_col_limit")]
    pub col_limit: u32,
}

pub const DEFAULT_ROW_LIMIT: u32 = 100;
pub const DEFAULT_COL_LIMIT: u32 = 50;

fn default_row_limit() -> u32 {
    DEFAULT_ROW_LIMIT
}

fn default_col_limit() -> u32 {
    DEFAULT_COL_LIMIT
}

impl Default for WindowRequest {
    fn default() -> Self {
        Self {
            row_start: 0,
            row_limit: DEFAULT_ROW_LIMIT,
            col_start: 0,
            col_limit: DEFAULT_COL_LIMIT,
        }
    }
}

impl WindowRequest {
    pub fn new(row_start: u32, row_limit: u32, col_start: u32, col_limit: u32) -> Self {
        Self {
            row_start,
            row_limit,
            col_start,
            col_limit,
        }
    }
}

/// A bounded rectangle of sheet data.
///
/// `merges` carry sheet-absolute, unclipped coordinates: a merge that only
/// partially overlaps the window is returned whole, and the consumer clips
/// it to `[row_start, row_start + slice.rows) x [col_start, col_start + slice.cols)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WindowResponse {
    pub upload_id: UploadId,
    pub sheet: String,
    pub row_start: u32,
    pub col_start: u32,
    pub rows: Vec<Vec<CellValue>>,
    pub merges: Vec<MergeRect>,
    pub slice: Dimensions,
    pub total: Dimensions,
    pub has_more_rows: bool,
    pub has_more_cols: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MarkerHit {
    pub row: u32,
    pub col: u32,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TotalRowValue {
    pub col: u32,
    pub value: CellValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TotalRowSummary {
    pub numbers_count: u32,
    pub numbers_sum: f64,
    pub numbers_max: Option<f64>,
    pub numbers_min: Option<f64>,
}

impl TotalRowSummary {
    pub fn push(&mut self, value: f64) {
        self.numbers_count += 1;
        self.numbers_sum += value;
        self.numbers_max = Some(self.numbers_max.map_or(value, |m| m.max(value)));
        self.numbers_min = Some(self.numbers_min.map_or(value, |m| m.min(value)));
    }
}

/// Shape-tagged statistics so the presenting page can pick a display branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatResult {
    Overall {
        total: Option<f64>,
        attended: Option<f64>,
        rate: Option<f64>,
    },
    TotalRow {
        marker: MarkerHit,
        values: Vec<TotalRowValue>,
        summary: TotalRowSummary,
    },
    NamedFields {
        fields: IndexMap<String, Option<f64>>,
    },
    NoTotalRow,
}

impl StatResult {
    pub fn kind(&self) -> &'static str {
        match self {
            StatResult::Overall { .. } => "overall",
            StatResult::TotalRow { .. } => "total_row",
            StatResult::NamedFields { .. } => "named_fields",
            StatResult::NoTotalRow => "no_total_row",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatsStatus {
    Ok,
    FileNotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StatsResponse {
    pub report_type: String,
    pub status: StatsStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<UploadId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StatResult>,
}

impl StatsResponse {
    pub fn file_not_found(report_type: impl Into<String>) -> Self {
        Self {
            report_type: report_type.into(),
            status: StatsStatus::FileNotFound,
            upload_id: None,
            sheet: None,
            result: None,
        }
    }
}
