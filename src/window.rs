//! Rectangular window slicing over an immutable sheet.

use crate::metrics::METRICS;
use crate::model::{UploadId, WindowRequest, WindowResponse};
use crate::sheet::{CellValue, Dimensions, SheetAccess};

/// Cuts the requested rectangle out of `sheet`.
///
/// Each axis is clamped to the sheet extent on its own, so a zero limit on
/// one axis still returns the other axis. A start at or past the extent on
/// either axis yields an empty window instead of an error. Merges
/// intersecting the clamped rectangle are returned whole, in sheet
/// coordinates.
pub fn slice_window<S: SheetAccess + ?Sized>(
    upload_id: &UploadId,
    sheet: &S,
    request: WindowRequest,
) -> WindowResponse {
    let total = sheet.dimensions();
    let WindowRequest {
        row_start,
        row_limit,
        col_start,
        col_limit,
    } = request;

    let empty = row_start >= total.rows || col_start >= total.cols;
    let (row_end, col_end) = if empty {
        (row_start, col_start)
    } else {
        (
            row_start.saturating_add(row_limit).min(total.rows),
            col_start.saturating_add(col_limit).min(total.cols),
        )
    };
    let slice = Dimensions {
        rows: row_end - row_start,
        cols: col_end - col_start,
    };

    let rows: Vec<Vec<CellValue>> = if slice.rows == 0 {
        Vec::new()
    } else {
        (row_start..row_end)
            .map(|row| {
                (col_start..col_end)
                    .map(|col| sheet.cell(row, col).cloned().unwrap_or_else(CellValue::empty))
                    .collect()
            })
            .collect()
    };

    let merges = sheet
        .merges()
        .iter()
        .filter(|merge| merge.intersects(row_start..row_end, col_start..col_end))
        .copied()
        .collect();

    METRICS.record_window_cells(u64::from(slice.rows) * u64::from(slice.cols));

    WindowResponse {
        upload_id: upload_id.clone(),
        sheet: sheet.name().to_string(),
        row_start,
        col_start,
        rows,
        merges,
        slice,
        total,
        has_more_rows: row_start.saturating_add(slice.rows) < total.rows,
        has_more_cols: col_start.saturating_add(slice.cols) < total.cols,
    }
}
