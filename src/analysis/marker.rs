use super::text::LabelSet;
use crate::config::ServerConfig;
use crate::model::MarkerHit;
use crate::sheet::SheetAccess;

/// Upper bound on the rows and columns any heuristic scan may touch,
/// measured from the sheet origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanBounds {
    pub max_rows: u32,
    pub max_cols: u32,
}

impl ScanBounds {
    pub fn new(max_rows: u32, max_cols: u32) -> Self {
        Self { max_rows, max_cols }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.scan_max_rows, config.scan_max_cols)
    }

    /// Bounds clipped to the sheet's actual extent.
    pub fn clip<S: SheetAccess + ?Sized>(&self, sheet: &S) -> (u32, u32) {
        let dims = sheet.dimensions();
        (self.max_rows.min(dims.rows), self.max_cols.min(dims.cols))
    }
}

/// First cell, row-major from the origin, whose normalized text is in `labels`.
pub fn find_label<S: SheetAccess + ?Sized>(
    sheet: &S,
    bounds: ScanBounds,
    labels: &LabelSet,
) -> Option<MarkerHit> {
    if labels.is_empty() {
        return None;
    }
    let (row_end, col_end) = bounds.clip(sheet);
    for row in 0..row_end {
        for col in 0..col_end {
            let Some(value) = sheet.cell(row, col) else {
                continue;
            };
            let text = value.as_text();
            if labels.matches(&text) {
                return Some(MarkerHit {
                    row,
                    col,
                    value: text.into_owned(),
                });
            }
        }
    }
    None
}

/// Locates the total marker inside `bounds`. Never reads outside them.
pub fn find_total_marker<S: SheetAccess + ?Sized>(
    sheet: &S,
    bounds: ScanBounds,
    markers: &LabelSet,
) -> Option<MarkerHit> {
    let hit = find_label(sheet, bounds, markers);
    tracing::trace!(
        sheet = sheet.name(),
        max_rows = bounds.max_rows,
        max_cols = bounds.max_cols,
        found = hit.is_some(),
        "total marker scan"
    );
    hit
}
