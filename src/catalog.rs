//! The fixed catalog of HR report templates the service accepts.

use crate::analysis::stats::AggregateOp;
use crate::config::ServerConfig;
use crate::error::{ReportError, ReportResult};
use crate::model::ReportDescriptor;
use tracing::warn;

/// How stats are pulled out of a report's default sheet.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategySpec {
    RowSummary,
    Overall {
        total: Vec<&'static str>,
        attended: Vec<&'static str>,
    },
    NamedFields(Vec<FieldSpec>),
    ColumnAggregate(Vec<ColumnSpec>),
}

impl StrategySpec {
    pub fn name(&self) -> &'static str {
        match self {
            StrategySpec::RowSummary => "row_summary",
            StrategySpec::Overall { .. } => "overall",
            StrategySpec::NamedFields(_) => "named_fields",
            StrategySpec::ColumnAggregate(_) => "column_aggregate",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub field: &'static str,
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub field: &'static str,
    pub headers: Vec<&'static str>,
    pub op: AggregateOp,
}

fn field(field: &'static str, labels: &[&'static str]) -> FieldSpec {
    FieldSpec {
        field,
        labels: labels.to_vec(),
    }
}

fn column(field: &'static str, headers: &[&'static str], op: AggregateOp) -> ColumnSpec {
    ColumnSpec {
        field,
        headers: headers.to_vec(),
        op,
    }
}

#[derive(Debug, Clone)]
pub struct ReportType {
    pub key: String,
    pub title: String,
    pub preferred_sheet: Option<String>,
    pub stats: StrategySpec,
}

impl ReportType {
    fn builtin(
        key: &str,
        title: &str,
        preferred_sheet: Option<&str>,
        stats: StrategySpec,
    ) -> Self {
        Self {
            key: key.to_string(),
            title: title.to_string(),
            preferred_sheet: preferred_sheet.map(str::to_string),
            stats,
        }
    }

    pub fn descriptor(&self) -> ReportDescriptor {
        ReportDescriptor {
            key: self.key.clone(),
            title: self.title.clone(),
            preferred_sheet: self.preferred_sheet.clone(),
            strategy: self.stats.name().to_string(),
        }
    }
}

const NAME_HEADERS: &[&str] = &["họ và tên", "họ tên", "full name", "employee name"];

fn builtin_reports() -> Vec<ReportType> {
    use AggregateOp::{Count, Max, Sum};
    vec![
        ReportType::builtin(
            "payroll",
            "Payroll",
            Some("Bảng lương"),
            StrategySpec::ColumnAggregate(vec![
                column("net_pay", &["thực lĩnh", "thực nhận", "net pay"], Sum),
                column("gross_pay", &["tổng thu nhập", "gross pay"], Sum),
                column("employees", NAME_HEADERS, Count),
            ]),
        ),
        ReportType::builtin(
            "payroll-summary",
            "Payroll summary",
            Some("Tổng hợp"),
            StrategySpec::RowSummary,
        ),
        ReportType::builtin(
            "social-insurance",
            "Social insurance contributions",
            None,
            StrategySpec::NamedFields(vec![
                field("amount_due", &["số phải nộp", "amount due"]),
                field("social_insurance", &["bhxh", "social insurance"]),
                field("health_insurance", &["bhyt", "health insurance"]),
                field("unemployment_insurance", &["bhtn", "unemployment insurance"]),
            ]),
        ),
        ReportType::builtin(
            "personal-income-tax",
            "Personal income tax",
            None,
            StrategySpec::NamedFields(vec![
                field("taxable_income", &["thu nhập chịu thuế", "taxable income"]),
                field("tax_withheld", &["thuế tncn", "thuế tncn đã khấu trừ", "pit withheld"]),
            ]),
        ),
        ReportType::builtin(
            "drug-inventory",
            "Clinic drug inventory",
            Some("Tồn kho"),
            StrategySpec::ColumnAggregate(vec![
                column("items", &["tên thuốc", "drug name"], Count),
                column("issued", &["xuất trong kỳ", "xuất", "issued"], Sum),
                column("closing_stock", &["tồn cuối kỳ", "tồn cuối", "closing stock"], Sum),
            ]),
        ),
        ReportType::builtin(
            "attendance-count",
            "Daily attendance count",
            Some("Chấm công"),
            StrategySpec::Overall {
                total: vec!["tổng số lao động", "tổng số", "headcount", "total employees"],
                attended: vec!["có mặt", "đi làm", "attended", "present"],
            },
        ),
        ReportType::builtin(
            "overtime",
            "Overtime hours",
            None,
            StrategySpec::ColumnAggregate(vec![
                column("overtime_hours", &["giờ tăng ca", "số giờ tăng ca", "overtime hours"], Sum),
                column("max_overtime_hours", &["giờ tăng ca", "số giờ tăng ca", "overtime hours"], Max),
                column("employees", NAME_HEADERS, Count),
            ]),
        ),
        ReportType::builtin(
            "leave-balance",
            "Annual leave balance",
            None,
            StrategySpec::ColumnAggregate(vec![
                column("remaining_days", &["phép còn lại", "còn lại", "remaining days"], Sum),
                column("employees", NAME_HEADERS, Count),
            ]),
        ),
        ReportType::builtin(
            "meal-allowance",
            "Meal allowance",
            None,
            StrategySpec::RowSummary,
        ),
        ReportType::builtin(
            "health-checkup",
            "Periodic health checkup",
            None,
            StrategySpec::NamedFields(vec![
                field("examined", &["số người khám", "số người được khám", "examined"]),
                field("fit", &["đủ sức khỏe", "fit"]),
                field("unfit", &["không đủ sức khỏe", "unfit"]),
            ]),
        ),
        ReportType::builtin(
            "labor-contract",
            "Labor contracts",
            None,
            StrategySpec::ColumnAggregate(vec![
                column("contracts", &["số hợp đồng", "contract no"], Count),
            ]),
        ),
        ReportType::builtin(
            "headcount",
            "Headcount by gender",
            None,
            StrategySpec::NamedFields(vec![
                field("male", &["nam", "male"]),
                field("female", &["nữ", "female"]),
                field("total", &["tổng số lao động", "total employees"]),
            ]),
        ),
    ]
}

/// Built-in report types with configuration overrides applied, in catalog order.
#[derive(Debug, Clone)]
pub struct ReportCatalog {
    reports: Vec<ReportType>,
}

impl ReportCatalog {
    pub fn builtin() -> Self {
        Self {
            reports: builtin_reports(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let mut catalog = Self::builtin();
        for (key, sheet) in &config.preferred_sheets {
            match catalog.reports.iter_mut().find(|r| &r.key == key) {
                Some(report) => report.preferred_sheet = Some(sheet.clone()),
                None => warn!(report_type = %key, "ignoring preferred sheet for unknown report type"),
            }
        }
        catalog
    }

    pub fn get(&self, key: &str) -> ReportResult<&ReportType> {
        self.reports
            .iter()
            .find(|r| r.key == key)
            .ok_or_else(|| ReportError::report_type(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.reports.iter().any(|r| r.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReportType> {
        self.reports.iter()
    }

    pub fn descriptors(&self) -> Vec<ReportDescriptor> {
        self.reports.iter().map(ReportType::descriptor).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn builtin_keys_are_unique_kebab_case() {
        let catalog = ReportCatalog::builtin();
        let keys: Vec<_> = catalog.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys.len(), 12);
        assert_eq!(keys.iter().collect::<HashSet<_>>().len(), keys.len());
        assert!(keys.iter().all(|k| {
            k.chars().all(|c| c.is_ascii_lowercase() || c == '-')
        }));
        assert_eq!(keys[0], "payroll");
    }

    #[test]
    fn config_overrides_preferred_sheet() {
        let mut config = ServerConfig::with_storage_root("/tmp/reports");
        config
            .preferred_sheets
            .insert("meal-allowance".into(), "Suat an".into());
        config
            .preferred_sheets
            .insert("no-such-report".into(), "X".into());
        let catalog = ReportCatalog::from_config(&config);
        assert_eq!(
            catalog.get("meal-allowance").unwrap().preferred_sheet.as_deref(),
            Some("Suat an")
        );
        assert!(!catalog.contains("no-such-report"));
    }

    #[test]
    fn unknown_report_type_is_not_found() {
        let err = ReportCatalog::builtin().get("timesheet").unwrap_err();
        assert_eq!(err.code().tag(), "NOT_FOUND");
    }

    #[test]
    fn descriptors_name_strategies() {
        let descriptors = ReportCatalog::builtin().descriptors();
        let attendance = descriptors
            .iter()
            .find(|d| d.key == "attendance-count")
            .unwrap();
        assert_eq!(attendance.strategy, "overall");
        assert_eq!(attendance.preferred_sheet.as_deref(), Some("Chấm công"));
    }
}
