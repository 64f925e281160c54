//! Per-report-type statistics strategies.
//!
//! Each report type maps to one [`StatStrategy`] in a [`StatsRegistry`];
//! report types without a registration fall back to [`RowSummary`]. Every
//! strategy receives the same [`ScanBounds`] and reads nothing outside them.

use super::marker::{ScanBounds, find_label, find_total_marker};
use super::text::LabelSet;
use crate::catalog::{ReportCatalog, StrategySpec};
use crate::metrics::METRICS;
use crate::model::{StatResult, TotalRowSummary, TotalRowValue};
use crate::sheet::{CellValue, SheetAccess};
use ahash::AHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Non-empty cells collected to the right of a total marker.
pub const TOTAL_ROW_VALUES: usize = 8;

/// How far from a label a named-field value may sit.
pub const LABEL_VALUE_REACH: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AggregateOp {
    Sum,
    Max,
    Count,
}

pub struct StatsContext<'a> {
    pub bounds: ScanBounds,
    pub markers: &'a LabelSet,
}

pub trait StatStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, sheet: &dyn SheetAccess, ctx: &StatsContext<'_>) -> StatResult;
}

/// Generic fallback: the first total row's values and their numeric summary.
#[derive(Debug, Default)]
pub struct RowSummary;

impl StatStrategy for RowSummary {
    fn name(&self) -> &'static str {
        "row_summary"
    }

    fn extract(&self, sheet: &dyn SheetAccess, ctx: &StatsContext<'_>) -> StatResult {
        let Some(marker) = find_total_marker(sheet, ctx.bounds, ctx.markers) else {
            return StatResult::NoTotalRow;
        };

        let (_, col_end) = ctx.bounds.clip(sheet);
        let mut values = Vec::new();
        let mut summary = TotalRowSummary::default();
        for col in marker.col + 1..col_end {
            let Some(value) = sheet.cell(marker.row, col) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            if let Some(number) = value.as_number() {
                summary.push(number);
            }
            if values.len() < TOTAL_ROW_VALUES {
                values.push(TotalRowValue {
                    col,
                    value: value.clone(),
                });
            }
        }

        StatResult::TotalRow {
            marker,
            values,
            summary,
        }
    }
}

/// Attendance shape: headcount, attended and the attendance rate in percent.
#[derive(Debug)]
pub struct Overall {
    total: LabelSet,
    attended: LabelSet,
}

impl Overall {
    pub fn new(total: LabelSet, attended: LabelSet) -> Self {
        Self { total, attended }
    }
}

impl StatStrategy for Overall {
    fn name(&self) -> &'static str {
        "overall"
    }

    fn extract(&self, sheet: &dyn SheetAccess, ctx: &StatsContext<'_>) -> StatResult {
        let total = labelled_value(sheet, ctx.bounds, &self.total);
        let attended = labelled_value(sheet, ctx.bounds, &self.attended);
        let rate = match (total, attended) {
            (Some(total), Some(attended)) if total != 0.0 => {
                Some(round2(attended / total * 100.0))
            }
            _ => None,
        };
        StatResult::Overall {
            total,
            attended,
            rate,
        }
    }
}

#[derive(Debug)]
pub struct NamedFields {
    fields: Vec<(String, LabelSet)>,
}

impl NamedFields {
    pub fn new(fields: Vec<(String, LabelSet)>) -> Self {
        Self { fields }
    }
}

impl StatStrategy for NamedFields {
    fn name(&self) -> &'static str {
        "named_fields"
    }

    fn extract(&self, sheet: &dyn SheetAccess, ctx: &StatsContext<'_>) -> StatResult {
        let fields: IndexMap<String, Option<f64>> = self
            .fields
            .iter()
            .map(|(name, labels)| (name.clone(), labelled_value(sheet, ctx.bounds, labels)))
            .collect();
        StatResult::NamedFields { fields }
    }
}

#[derive(Debug)]
pub struct ColumnAggregate {
    columns: Vec<(String, LabelSet, AggregateOp)>,
}

impl ColumnAggregate {
    pub fn new(columns: Vec<(String, LabelSet, AggregateOp)>) -> Self {
        Self { columns }
    }

    fn aggregate(
        sheet: &dyn SheetAccess,
        ctx: &StatsContext<'_>,
        labels: &LabelSet,
        op: AggregateOp,
    ) -> Option<f64> {
        let header = find_label(sheet, ctx.bounds, labels)?;
        let dims = sheet.dimensions();
        let last_row = header
            .row
            .saturating_add(ctx.bounds.max_rows)
            .min(dims.rows.saturating_sub(1));
        // Marker cells may sit anywhere left of the aggregated column.
        let marker_cols = (header.col + 1).min(ctx.bounds.max_cols);

        let mut sum = 0.0;
        let mut max: Option<f64> = None;
        let mut count = 0u32;
        for row in header.row + 1..=last_row {
            let is_total_row = (0..marker_cols).any(|col| {
                sheet
                    .cell(row, col)
                    .is_some_and(|v| ctx.markers.matches(&v.as_text()))
            });
            if is_total_row {
                break;
            }
            let Some(value) = sheet.cell(row, header.col) else {
                continue;
            };
            match op {
                AggregateOp::Count => {
                    if !value.is_empty() {
                        count += 1;
                    }
                }
                AggregateOp::Sum | AggregateOp::Max => {
                    if let Some(n) = value.as_number() {
                        sum += n;
                        max = Some(max.map_or(n, |m| m.max(n)));
                    }
                }
            }
        }

        match op {
            AggregateOp::Sum => Some(round2(sum)),
            AggregateOp::Max => max,
            AggregateOp::Count => Some(f64::from(count)),
        }
    }
}

impl StatStrategy for ColumnAggregate {
    fn name(&self) -> &'static str {
        "column_aggregate"
    }

    fn extract(&self, sheet: &dyn SheetAccess, ctx: &StatsContext<'_>) -> StatResult {
        let fields = self
            .columns
            .iter()
            .map(|(name, labels, op)| (name.clone(), Self::aggregate(sheet, ctx, labels, *op)))
            .collect();
        StatResult::NamedFields { fields }
    }
}

/// Numeric value next to a label: the first number to its right, then below,
/// within [`LABEL_VALUE_REACH`] cells and inside `bounds`.
pub fn labelled_value(
    sheet: &dyn SheetAccess,
    bounds: ScanBounds,
    labels: &LabelSet,
) -> Option<f64> {
    let hit = find_label(sheet, bounds, labels)?;
    let (row_end, col_end) = bounds.clip(sheet);
    let numeric = |row: u32, col: u32| sheet.cell(row, col).and_then(CellValue::as_number);

    let right = (hit.col + 1..col_end.min(hit.col + 1 + LABEL_VALUE_REACH))
        .find_map(|col| numeric(hit.row, col));
    right.or_else(|| {
        (hit.row + 1..row_end.min(hit.row + 1 + LABEL_VALUE_REACH))
            .find_map(|row| numeric(row, hit.col))
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Report type key to extraction strategy.
pub struct StatsRegistry {
    strategies: AHashMap<String, Arc<dyn StatStrategy>>,
    fallback: Arc<dyn StatStrategy>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            strategies: AHashMap::new(),
            fallback: Arc::new(RowSummary),
        }
    }

    pub fn from_catalog(catalog: &ReportCatalog) -> Self {
        let mut registry = Self::new();
        for report in catalog.iter() {
            let strategy: Arc<dyn StatStrategy> = match &report.stats {
                StrategySpec::RowSummary => Arc::new(RowSummary),
                StrategySpec::Overall { total, attended } => Arc::new(Overall::new(
                    LabelSet::new(total),
                    LabelSet::new(attended),
                )),
                StrategySpec::NamedFields(fields) => Arc::new(NamedFields::new(
                    fields
                        .iter()
                        .map(|f| (f.field.to_string(), LabelSet::new(&f.labels)))
                        .collect(),
                )),
                StrategySpec::ColumnAggregate(columns) => Arc::new(ColumnAggregate::new(
                    columns
                        .iter()
                        .map(|c| (c.field.to_string(), LabelSet::new(&c.headers), c.op))
                        .collect(),
                )),
            };
            registry.register(report.key.clone(), strategy);
        }
        registry
    }

    pub fn register(&mut self, report_type: impl Into<String>, strategy: Arc<dyn StatStrategy>) {
        self.strategies.insert(report_type.into(), strategy);
    }

    pub fn strategy_for(&self, report_type: &str) -> Arc<dyn StatStrategy> {
        self.strategies
            .get(report_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn extract(
        &self,
        report_type: &str,
        sheet: &dyn SheetAccess,
        ctx: &StatsContext<'_>,
    ) -> StatResult {
        let strategy = self.strategy_for(report_type);
        let result = strategy.extract(sheet, ctx);
        METRICS.record_stats_extraction(strategy.name());
        debug!(
            report_type,
            strategy = strategy.name(),
            kind = result.kind(),
            "stats extracted"
        );
        result
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
