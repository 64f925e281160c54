use crate::analysis::normalize;
use crate::error::{ReportError, ReportResult};
use crate::sheet::{CellValue, MergeRect, SheetGrid};
use crate::utils::{excel_serial_to_date, is_date_format_code, parse_range};
use indexmap::IndexMap;
use std::io::Cursor;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use umya_spreadsheet::reader::xlsx;
use umya_spreadsheet::{CellRawValue, Spreadsheet, Worksheet};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// A fully parsed upload. Sheets keep container order.
#[derive(Debug)]
pub struct ParsedWorkbook {
    sheets: IndexMap<String, Arc<SheetGrid>>,
}

impl ParsedWorkbook {
    pub fn parse(bytes: &[u8]) -> ReportResult<Self> {
        if !bytes.starts_with(ZIP_MAGIC) {
            return Err(ReportError::Parse(
                "file is not an xlsx workbook container".to_string(),
            ));
        }

        let started = Instant::now();
        let book = catch_unwind(AssertUnwindSafe(|| {
            xlsx::read_reader(Cursor::new(bytes), true)
        }))
        .map_err(|_| ReportError::Parse("workbook structure is corrupt".to_string()))?
        .map_err(|err| ReportError::Parse(err.to_string()))?;

        let workbook = Self::from_spreadsheet(&book)?;
        crate::metrics::METRICS.record_parse_duration(started.elapsed());
        debug!(
            sheets = workbook.sheets.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "workbook parsed"
        );
        Ok(workbook)
    }

    fn from_spreadsheet(book: &Spreadsheet) -> ReportResult<Self> {
        let mut sheets = IndexMap::new();
        for sheet in book.get_sheet_collection() {
            let name = sheet.get_name().to_string();
            if sheets.contains_key(&name) {
                warn!(sheet = %name, "duplicate sheet name ignored");
                continue;
            }
            let grid = sheet_to_grid(sheet);
            sheets.insert(name, Arc::new(grid));
        }
        if sheets.is_empty() {
            return Err(ReportError::Parse("workbook contains no sheets".to_string()));
        }
        Ok(Self { sheets })
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.keys().cloned().collect()
    }

    pub fn sheet(&self, name: &str) -> Option<Arc<SheetGrid>> {
        self.sheets.get(name).cloned()
    }

    /// The preferred sheet when present (exact name first, then a
    /// diacritic/case-insensitive match), else the first sheet.
    pub fn default_sheet(&self, preferred: Option<&str>) -> String {
        if let Some(preferred) = preferred {
            if self.sheets.contains_key(preferred) {
                return preferred.to_string();
            }
            let wanted = normalize(preferred);
            if let Some(name) = self.sheets.keys().find(|name| normalize(name) == wanted) {
                return name.clone();
            }
        }
        self.sheets
            .keys()
            .next()
            .cloned()
            .unwrap_or_default()
    }
}

fn sheet_to_grid(sheet: &Worksheet) -> SheetGrid {
    let cells = sheet.get_cell_collection().into_iter().filter_map(|cell| {
        let coordinate = cell.get_coordinate();
        let row = coordinate.get_row_num().checked_sub(1)?;
        let col = coordinate.get_col_num().checked_sub(1)?;
        let value = cell_to_value(cell)?;
        Some(((row, col), value))
    });

    let merges = sheet
        .get_merge_cells()
        .iter()
        .filter_map(|range| {
            let raw = range.get_range();
            let parsed = parse_range(&raw);
            if parsed.is_none() {
                warn!(sheet = sheet.get_name(), range = %raw, "unparseable merge range");
            }
            parsed
        })
        .map(|((r0, c0), (r1, c1))| MergeRect::new(r0, c0, r1, c1))
        .collect();

    SheetGrid::from_parts(sheet.get_name(), cells, merges)
}

/// Converts a cell by its stored type. Only numeric cells become numbers or
/// dates; string cells stay text even when they look numeric (`00123`).
pub fn cell_to_value(cell: &umya_spreadsheet::Cell) -> Option<CellValue> {
    match cell.get_raw_value() {
        CellRawValue::Empty => None,
        CellRawValue::Bool(flag) => Some(CellValue::Bool(*flag)),
        CellRawValue::Numeric(number) if number.is_finite() => {
            if is_date_cell(cell)
                && let Some(date) = excel_serial_to_date(*number)
            {
                return Some(CellValue::Date(date.format("%Y-%m-%d").to_string()));
            }
            Some(CellValue::Number(*number))
        }
        _ => text_value(&cell.get_value()),
    }
}

fn text_value(raw: &str) -> Option<CellValue> {
    if raw.trim().is_empty() {
        None
    } else {
        Some(CellValue::Text(raw.to_string()))
    }
}

fn is_date_cell(cell: &umya_spreadsheet::Cell) -> bool {
    cell.get_style()
        .get_number_format()
        .map(|format| is_date_format_code(format.get_format_code()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::SheetAccess;

    fn workbook_bytes(build: impl FnOnce(&mut Spreadsheet)) -> Vec<u8> {
        let mut book = umya_spreadsheet::new_file();
        build(&mut book);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        umya_spreadsheet::writer::xlsx::write(&book, &path).unwrap();
        std::fs::read(path).unwrap()
    }

    #[test]
    fn rejects_non_zip_bytes() {
        let err = ParsedWorkbook::parse(b"name,amount\nA,1\n").unwrap_err();
        assert!(matches!(err, ReportError::Parse(_)));
    }

    #[test]
    fn rejects_truncated_container() {
        let bytes = workbook_bytes(|_| {});
        let err = ParsedWorkbook::parse(&bytes[..bytes.len() / 3]).unwrap_err();
        assert!(matches!(err, ReportError::Parse(_)));
    }

    #[test]
    fn converts_cells_merges_and_dates() {
        let bytes = workbook_bytes(|book| {
            let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
            sheet.get_cell_mut("A1").set_value("Bảng lương tháng 1");
            sheet.get_cell_mut("B3").set_value_number(1500.5);
            sheet.get_cell_mut("C3").set_value("TRUE");
            let date = sheet.get_cell_mut("D3");
            date.set_value_number(45292);
            date.get_style_mut()
                .get_number_format_mut()
                .set_format_code("yyyy-mm-dd");
            sheet.add_merge_cells("A1:D1");
        });

        let workbook = ParsedWorkbook::parse(&bytes).unwrap();
        assert_eq!(workbook.sheet_names(), vec!["Sheet1".to_string()]);
        let sheet = workbook.sheet("Sheet1").unwrap();
        assert_eq!(
            sheet.cell(0, 0),
            Some(&CellValue::Text("Bảng lương tháng 1".into()))
        );
        assert_eq!(sheet.cell(2, 1), Some(&CellValue::Number(1500.5)));
        assert_eq!(sheet.cell(2, 2), Some(&CellValue::Bool(true)));
        assert_eq!(sheet.cell(2, 3), Some(&CellValue::Date("2024-01-01".into())));
        assert_eq!(sheet.merges(), &[MergeRect::new(0, 0, 0, 3)]);
        assert_eq!(sheet.dimensions().rows, 3);
        assert_eq!(sheet.dimensions().cols, 4);
    }

    #[test]
    fn string_cells_stay_text_even_when_numeric_looking() {
        let bytes = workbook_bytes(|book| {
            let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
            sheet.get_cell_mut("A1").set_value_string("00123");
            sheet.get_cell_mut("B1").set_value_string("NaN");
            sheet.get_cell_mut("C1").set_value_string("0912345678");
            sheet.get_cell_mut("D1").set_value_string("TRUE");
            sheet.get_cell_mut("E1").set_value_number(42);
        });

        let workbook = ParsedWorkbook::parse(&bytes).unwrap();
        let sheet = workbook.sheet("Sheet1").unwrap();
        assert_eq!(sheet.cell(0, 0), Some(&CellValue::Text("00123".into())));
        assert_eq!(sheet.cell(0, 1), Some(&CellValue::Text("NaN".into())));
        assert_eq!(sheet.cell(0, 2), Some(&CellValue::Text("0912345678".into())));
        assert_eq!(sheet.cell(0, 3), Some(&CellValue::Text("TRUE".into())));
        assert_eq!(sheet.cell(0, 4), Some(&CellValue::Number(42.0)));

        let window = crate::window::slice_window(
            &crate::model::UploadId::from("payroll-000001"),
            &*sheet,
            crate::model::WindowRequest::new(0, 1, 0, 5),
        );
        assert_eq!(
            serde_json::to_value(&window.rows).unwrap(),
            serde_json::json!([["00123", "NaN", "0912345678", "TRUE", 42.0]])
        );
    }

    #[test]
    fn non_finite_numbers_fall_back_to_text() {
        let bytes = workbook_bytes(|book| {
            let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
            sheet.get_cell_mut("A1").set_value_number(f64::INFINITY);
        });

        let workbook = ParsedWorkbook::parse(&bytes).unwrap();
        let sheet = workbook.sheet("Sheet1").unwrap();
        assert!(matches!(sheet.cell(0, 0), Some(CellValue::Text(_))));
    }

    #[test]
    fn default_sheet_prefers_configured_name() {
        let bytes = workbook_bytes(|book| {
            book.get_sheet_by_name_mut("Sheet1")
                .unwrap()
                .set_name("Summary");
            book.new_sheet("Data").unwrap();
            book.new_sheet("Bảng lương").unwrap();
        });
        let workbook = ParsedWorkbook::parse(&bytes).unwrap();
        assert_eq!(
            workbook.sheet_names(),
            vec!["Summary", "Data", "Bảng lương"]
        );
        assert_eq!(workbook.default_sheet(None), "Summary");
        assert_eq!(workbook.default_sheet(Some("Data")), "Data");
        assert_eq!(workbook.default_sheet(Some("bang luong")), "Bảng lương");
        assert_eq!(workbook.default_sheet(Some("Missing")), "Summary");
    }
}
