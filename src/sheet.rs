//! Immutable, parsed sheet data.
//!
//! A [`SheetGrid`] is built once when an upload is parsed and never mutated
//! afterwards. Everything that reads cells (window slicing, marker scans,
//! stats strategies) goes through the [`SheetAccess`] trait so that reads can
//! be bounded and, in tests, counted.

use ahash::AHashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::warn;

/// A single cell value as served to clients.
///
/// Serialized untagged: text and dates become JSON strings, numbers JSON
/// numbers, booleans JSON booleans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Bool(bool),
    Text(String),
    /// `YYYY-MM-DD`
    Date(String),
}

impl CellValue {
    pub fn empty() -> Self {
        CellValue::Text(String::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.trim().is_empty())
    }

    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            CellValue::Text(s) | CellValue::Date(s) => Cow::Borrowed(s.as_str()),
            CellValue::Number(n) => Cow::Owned(format_number(*n)),
            CellValue::Bool(b) => Cow::Owned(if *b { "TRUE" } else { "FALSE" }.to_string()),
        }
    }

    /// Numeric interpretation: numbers as-is, numeric-looking text parsed,
    /// everything else `None` (never coerced to zero).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if n.is_finite() => Some(*n),
            CellValue::Text(s) => parse_numeric_text(s),
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Parses text such as `1,234.5`, ` 42 `, `(1,000)` or `-7`.
pub fn parse_numeric_text(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (negative, body) = match trimmed
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };
    let cleaned: String = body
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty()
        || !cleaned
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }
    let value = cleaned.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(if negative { -value } else { value })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct CellPos {
    pub r: u32,
    pub c: u32,
}

/// Inclusive merge rectangle in zero-based sheet coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct MergeRect {
    #[serde(rename = "s")]
    pub start: CellPos,
    #[serde(rename = "e")]
    pub end: CellPos,
}

impl MergeRect {
    /// Builds a rectangle from two corners, normalizing their order.
    pub fn new(start_row: u32, start_col: u32, end_row: u32, end_col: u32) -> Self {
        Self {
            start: CellPos {
                r: start_row.min(end_row),
                c: start_col.min(end_col),
            },
            end: CellPos {
                r: start_row.max(end_row),
                c: start_col.max(end_col),
            },
        }
    }

    pub fn row_span(&self) -> u32 {
        self.end.r - self.start.r + 1
    }

    pub fn col_span(&self) -> u32 {
        self.end.c - self.start.c + 1
    }

    pub fn is_single_cell(&self) -> bool {
        self.start == self.end
    }

    /// Intersection test against the half-open window `[rows) x [cols)`.
    pub fn intersects(&self, rows: std::ops::Range<u32>, cols: std::ops::Range<u32>) -> bool {
        if rows.is_empty() || cols.is_empty() {
            return false;
        }
        self.start.r < rows.end
            && self.end.r >= rows.start
            && self.start.c < cols.end
            && self.end.c >= cols.start
    }

    pub fn overlaps(&self, other: &MergeRect) -> bool {
        self.start.r <= other.end.r
            && other.start.r <= self.end.r
            && self.start.c <= other.end.c
            && other.start.c <= self.end.c
    }
}

/// Row/column extent, also used for window slice sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Dimensions {
    pub rows: u32,
    pub cols: u32,
}

/// Read access to a sheet. All coordinates are zero-based.
pub trait SheetAccess {
    fn name(&self) -> &str;

    /// Full extent of non-empty content and merges, measured from the origin.
    fn dimensions(&self) -> Dimensions;

    fn cell(&self, row: u32, col: u32) -> Option<&CellValue>;

    /// Non-overlapping merge rectangles, in sheet order.
    fn merges(&self) -> &[MergeRect];
}

#[derive(Debug, Clone)]
pub struct SheetGrid {
    name: String,
    dimensions: Dimensions,
    cells: AHashMap<(u32, u32), CellValue>,
    merges: Vec<MergeRect>,
}

impl SheetGrid {
    /// Assembles a grid from sparse cells and merges. Empty values are
    /// dropped, overlapping merges after the first are discarded, and the
    /// extent is derived from what remains.
    pub fn from_parts<I>(name: impl Into<String>, cells: I, merges: Vec<MergeRect>) -> Self
    where
        I: IntoIterator<Item = ((u32, u32), CellValue)>,
    {
        let name = name.into();
        let mut map = AHashMap::new();
        let mut rows = 0u32;
        let mut cols = 0u32;
        for ((row, col), value) in cells {
            if value.is_empty() {
                continue;
            }
            rows = rows.max(row + 1);
            cols = cols.max(col + 1);
            map.insert((row, col), value);
        }

        let mut kept: Vec<MergeRect> = Vec::with_capacity(merges.len());
        for merge in merges {
            if merge.is_single_cell() {
                continue;
            }
            if kept.iter().any(|existing| existing.overlaps(&merge)) {
                warn!(sheet = %name, ?merge, "dropping overlapping merge rectangle");
                continue;
            }
            rows = rows.max(merge.end.r + 1);
            cols = cols.max(merge.end.c + 1);
            kept.push(merge);
        }

        Self {
            name,
            dimensions: Dimensions { rows, cols },
            cells: map,
            merges: kept,
        }
    }

    pub fn non_empty_cells(&self) -> usize {
        self.cells.len()
    }
}

impl SheetAccess for SheetGrid {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    fn cell(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.cells.get(&(row, col))
    }

    fn merges(&self) -> &[MergeRect] {
        &self.merges
    }
}
