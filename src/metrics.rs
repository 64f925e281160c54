//! Prometheus metrics for the report ingestion service.
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global metrics registry instance
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// Operation name (e.g. "upload", "window", "stats")
    pub operation: String,
    /// "success" or "error"
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub operation: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub operation: String,
    pub category: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UploadLabels {
    pub report_type: String,
    /// "accepted" or "rejected"
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StrategyLabels {
    pub strategy: String,
}

pub struct MetricsCollector {
    registry: RwLock<Registry>,

    pub requests_total: Family<RequestLabels, Counter>,
    pub request_duration_seconds: Family<OperationLabels, Histogram>,
    pub errors_total: Family<ErrorLabels, Counter>,

    pub uploads_total: Family<UploadLabels, Counter>,
    pub upload_parse_seconds: Histogram,

    /// Cells materialized into window responses
    pub window_cells_total: Counter,
    pub stats_extractions_total: Family<StrategyLabels, Counter>,

    pub cache_hits_total: Counter,
    pub cache_misses_total: Counter,
    /// Parsed workbooks currently held in memory
    pub cached_workbooks: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "report_requests_total",
            "Total number of requests by operation and status",
            requests_total.clone(),
        );

        let request_duration_seconds =
            Family::<OperationLabels, Histogram>::new_with_constructor(|| {
                // 5ms .. ~20s
                Histogram::new(exponential_buckets(0.005, 2.5, 10))
            });
        registry.register(
            "report_request_duration_seconds",
            "Request latency histogram in seconds",
            request_duration_seconds.clone(),
        );

        let errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "report_errors_total",
            "Total number of errors by operation and category",
            errors_total.clone(),
        );

        let uploads_total = Family::<UploadLabels, Counter>::default();
        registry.register(
            "report_uploads_total",
            "Workbook uploads by report type and outcome",
            uploads_total.clone(),
        );

        let upload_parse_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 12));
        registry.register(
            "report_upload_parse_seconds",
            "Time spent parsing uploaded workbooks",
            upload_parse_seconds.clone(),
        );

        let window_cells_total = Counter::default();
        registry.register(
            "report_window_cells_total",
            "Cells served through sheet windows",
            window_cells_total.clone(),
        );

        let stats_extractions_total = Family::<StrategyLabels, Counter>::default();
        registry.register(
            "report_stats_extractions_total",
            "Stats extractions by strategy",
            stats_extractions_total.clone(),
        );

        let cache_hits_total = Counter::default();
        registry.register(
            "report_cache_hits_total",
            "Parsed workbook cache hits",
            cache_hits_total.clone(),
        );

        let cache_misses_total = Counter::default();
        registry.register(
            "report_cache_misses_total",
            "Parsed workbook cache misses",
            cache_misses_total.clone(),
        );

        let cached_workbooks = Gauge::default();
        registry.register(
            "report_cached_workbooks",
            "Parsed workbooks currently cached",
            cached_workbooks.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            requests_total,
            request_duration_seconds,
            errors_total,
            uploads_total,
            upload_parse_seconds,
            window_cells_total,
            stats_extractions_total,
            cache_hits_total,
            cache_misses_total,
            cached_workbooks,
        }
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(err) = encode(&mut buffer, &registry) {
            tracing::warn!(error = %err, "failed to encode metrics");
        }
        buffer
    }

    pub fn record_request(&self, operation: &str, duration: Duration, success: bool) {
        self.requests_total
            .get_or_create(&RequestLabels {
                operation: operation.to_string(),
                status: if success { "success" } else { "error" }.to_string(),
            })
            .inc();
        self.request_duration_seconds
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    pub fn record_error(&self, operation: &str, category: &str) {
        self.errors_total
            .get_or_create(&ErrorLabels {
                operation: operation.to_string(),
                category: category.to_string(),
            })
            .inc();
    }

    pub fn record_upload(&self, report_type: &str, accepted: bool) {
        self.uploads_total
            .get_or_create(&UploadLabels {
                report_type: report_type.to_string(),
                outcome: if accepted { "accepted" } else { "rejected" }.to_string(),
            })
            .inc();
    }

    pub fn record_parse_duration(&self, duration: Duration) {
        self.upload_parse_seconds.observe(duration.as_secs_f64());
    }

    pub fn record_window_cells(&self, cells: u64) {
        self.window_cells_total.inc_by(cells);
    }

    pub fn record_stats_extraction(&self, strategy: &str) {
        self.stats_extractions_total
            .get_or_create(&StrategyLabels {
                strategy: strategy.to_string(),
            })
            .inc();
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits_total.inc();
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses_total.inc();
    }

    pub fn update_cached_workbooks(&self, count: usize) {
        self.cached_workbooks.set(count as i64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Times one operation and records it on drop unless already finished.
pub struct RequestTimer {
    operation: &'static str,
    start: Instant,
    finished: bool,
}

impl RequestTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
            finished: false,
        }
    }

    pub fn finish<T, E>(mut self, result: &Result<T, E>) {
        self.finished = true;
        METRICS.record_request(self.operation, self.start.elapsed(), result.is_ok());
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        if !self.finished {
            METRICS.record_request(self.operation, self.start.elapsed(), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_families() {
        let metrics = MetricsCollector::new();
        metrics.record_request("window", Duration::from_millis(12), true);
        metrics.record_upload("payroll", true);
        metrics.record_window_cells(200);

        let text = metrics.encode();
        assert!(text.contains("report_requests_total"));
        assert!(text.contains("report_uploads_total"));
        assert!(text.contains("report_window_cells_total"));
    }
}
