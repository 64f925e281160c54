use chrono::{Duration, NaiveDate};
use sha2::{Digest, Sha256};

/// Upload sequence numbers are zero-padded to this width inside upload ids.
const UPLOAD_SEQ_WIDTH: usize = 6;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest: [u8; 32] = Sha256::digest(bytes).into();
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// 1-based column number to its letter name (`1 -> A`, `27 -> AA`).
pub fn column_number_to_name(column: u32) -> String {
    let mut column = column;
    let mut name = String::new();
    while column > 0 {
        let rem = ((column - 1) % 26) as u8;
        name.insert(0, (b'A' + rem) as char);
        column = (column - 1) / 26;
    }
    name
}

/// A1-style address for zero-based coordinates.
pub fn cell_address(row: u32, col: u32) -> String {
    format!("{}{}", column_number_to_name(col + 1), row + 1)
}

/// Parses `A1` into zero-based `(row, col)`.
pub fn parse_address(address: &str) -> Option<(u32, u32)> {
    use umya_spreadsheet::helper::coordinate::index_from_coordinate;
    let (col, row, _, _) = index_from_coordinate(address);
    match (col, row) {
        (Some(c), Some(r)) if c > 0 && r > 0 => Some((r - 1, c - 1)),
        _ => None,
    }
}

/// Parses `A1:C4` (or a single `A1`) into zero-based, normalized corners.
pub fn parse_range(range: &str) -> Option<((u32, u32), (u32, u32))> {
    let cleaned = range.trim().replace('$', "");
    let mut parts = cleaned.split(':');
    let start = parts.next()?;
    let end = parts.next().unwrap_or(start);
    let start_idx = parse_address(start)?;
    let end_idx = parse_address(end)?;
    Some((
        (start_idx.0.min(end_idx.0), start_idx.1.min(end_idx.1)),
        (start_idx.0.max(end_idx.0), start_idx.1.max(end_idx.1)),
    ))
}

/// Converts an Excel 1900-system serial number to a calendar date.
///
/// Serial 60 is the fictitious 1900-02-29; anything below 61 is shifted so
/// that serial 1 maps to 1900-01-01.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial > 2_958_465.0 {
        return None;
    }
    let days = serial.floor() as i64;
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let days = if days < 61 { days + 1 } else { days };
    base.checked_add_signed(Duration::days(days))
}

/// True when a number format code renders dates (`yyyy-mm-dd`, `d/m/yy`, ...).
///
/// Quoted literals and bracketed sections are ignored so that currency or
/// colour codes like `[Red]` do not count.
pub fn is_date_format_code(code: &str) -> bool {
    let lower = code.to_ascii_lowercase();
    if lower == "general" || lower.is_empty() {
        return false;
    }
    let mut stripped = String::with_capacity(lower.len());
    let mut in_quote = false;
    let mut in_bracket = false;
    let mut escape = false;
    for ch in lower.chars() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' => escape = true,
            '"' => in_quote = !in_quote,
            '[' if !in_quote => in_bracket = true,
            ']' if !in_quote => in_bracket = false,
            _ if in_quote || in_bracket => {}
            _ => stripped.push(ch),
        }
    }
    let has_day_or_year = stripped.contains('d') || stripped.contains('y');
    let has_month = stripped.contains('m');
    has_day_or_year && (has_month || stripped.contains("yy") || stripped.contains("dd"))
}

pub fn format_upload_id(report_type: &str, seq: u64) -> String {
    format!("{report_type}-{seq:0width$}", width = UPLOAD_SEQ_WIDTH)
}

/// Splits an upload id into its report type and sequence number.
pub fn split_upload_id(upload_id: &str) -> Option<(&str, u64)> {
    let (report_type, seq) = upload_id.rsplit_once('-')?;
    if report_type.is_empty() || seq.len() < UPLOAD_SEQ_WIDTH {
        return None;
    }
    let seq = seq.parse::<u64>().ok()?;
    Some((report_type, seq))
}
