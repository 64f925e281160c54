//! Grid reconstruction for a window: which cells anchor a merge span and
//! which cells a span covers, all in window-local coordinates.

use crate::error::{ReportError, ReportResult};
use crate::model::WindowResponse;
use crate::sheet::CellValue;
use ahash::{AHashMap, AHashSet};
use once_cell::sync::Lazy;
use serde::Serialize;
use tera::{Context, Tera};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub row_span: u32,
    pub col_span: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridCell {
    pub col: u32,
    pub row_span: u32,
    pub col_span: u32,
    pub value: CellValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridRow {
    pub row: u32,
    pub cells: Vec<GridCell>,
}

/// Span anchors and covered cells for one window. Rebuilt per window,
/// never patched.
#[derive(Debug, Clone, Default)]
pub struct GridLayout {
    start_span_map: AHashMap<(u32, u32), Span>,
    skip_set: AHashSet<(u32, u32)>,
}

impl GridLayout {
    /// Clips each sheet-absolute merge to the window and records its
    /// top-left visible cell as the anchor.
    pub fn build(window: &WindowResponse) -> Self {
        let mut layout = Self::default();
        if window.slice.rows == 0 || window.slice.cols == 0 {
            return layout;
        }
        let last_row = window.row_start + window.slice.rows - 1;
        let last_col = window.col_start + window.slice.cols - 1;

        for merge in &window.merges {
            let top = merge.start.r.max(window.row_start);
            let left = merge.start.c.max(window.col_start);
            let bottom = merge.end.r.min(last_row);
            let right = merge.end.c.min(last_col);
            if top > bottom || left > right {
                continue;
            }
            let (top, left) = (top - window.row_start, left - window.col_start);
            let (bottom, right) = (bottom - window.row_start, right - window.col_start);

            layout.start_span_map.insert(
                (top, left),
                Span {
                    row_span: bottom - top + 1,
                    col_span: right - left + 1,
                },
            );
            for row in top..=bottom {
                for col in left..=right {
                    if (row, col) != (top, left) {
                        layout.skip_set.insert((row, col));
                    }
                }
            }
        }
        layout
    }

    pub fn span_at(&self, row: u32, col: u32) -> Option<Span> {
        self.start_span_map.get(&(row, col)).copied()
    }

    pub fn is_skipped(&self, row: u32, col: u32) -> bool {
        self.skip_set.contains(&(row, col))
    }

    pub fn anchors(&self) -> impl Iterator<Item = ((u32, u32), Span)> + '_ {
        self.start_span_map.iter().map(|(pos, span)| (*pos, *span))
    }

    pub fn skipped_len(&self) -> usize {
        self.skip_set.len()
    }

    /// Emitted cells per window row: covered cells are left out, anchors carry
    /// their spans, everything else is a plain 1x1 cell.
    pub fn rows(&self, window: &WindowResponse) -> Vec<GridRow> {
        window
            .rows
            .iter()
            .enumerate()
            .map(|(r, values)| {
                let r = r as u32;
                let cells = values
                    .iter()
                    .enumerate()
                    .filter_map(|(c, value)| {
                        let c = c as u32;
                        if self.is_skipped(r, c) {
                            return None;
                        }
                        let span = self.span_at(r, c).unwrap_or(Span {
                            row_span: 1,
                            col_span: 1,
                        });
                        Some(GridCell {
                            col: c,
                            row_span: span.row_span,
                            col_span: span.col_span,
                            value: value.clone(),
                        })
                    })
                    .collect();
                GridRow { row: r, cells }
            })
            .collect()
    }
}

const GRID_TEMPLATE: &str = r#"<table class="report-grid" data-upload="{{ upload_id }}" data-sheet="{{ sheet }}" data-row-start="{{ row_start }}" data-col-start="{{ col_start }}">
{%- for row in rows %}
  <tr data-row="{{ row_start + row.row }}">
  {%- for cell in row.cells %}
    <td{% if cell.row_span > 1 %} rowspan="{{ cell.row_span }}"{% endif %}{% if cell.col_span > 1 %} colspan="{{ cell.col_span }}"{% endif %}>{{ cell.value }}</td>
  {%- endfor %}
  </tr>
{%- endfor %}
</table>
"#;

static TEMPLATES: Lazy<Result<Tera, String>> = Lazy::new(|| {
    let mut tera = Tera::default();
    tera.add_raw_template("grid.html", GRID_TEMPLATE)
        .map_err(|err| err.to_string())?;
    Ok(tera)
});

/// Renders a window as an HTML `<table>`. Cell text is autoescaped.
pub fn render_html(window: &WindowResponse) -> ReportResult<String> {
    let tera = TEMPLATES
        .as_ref()
        .map_err(|err| ReportError::Internal(format!("grid template invalid: {err}")))?;
    let layout = GridLayout::build(window);

    let mut context = Context::new();
    context.insert("upload_id", &window.upload_id);
    context.insert("sheet", &window.sheet);
    context.insert("row_start", &window.row_start);
    context.insert("col_start", &window.col_start);
    context.insert("rows", &layout.rows(window));

    tera.render("grid.html", &context)
        .map_err(|err| ReportError::Internal(format!("grid render failed: {err}")))
}
