//! Tracing subscriber setup: JSON or pretty output to stdout, stderr or a
//! daily-rolled file, plus an OTLP exporter when an endpoint is configured.

use anyhow::{Context, Result};
use opentelemetry::{KeyValue, trace::TraceError};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, Tracer},
};
use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub const SERVICE_NAME: &str = "report-sheets";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "pretty" => Some(LogFormat::Pretty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily-rolled files under `log_dir`
    File,
}

impl LogOutput {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "stdout" => Some(LogOutput::Stdout),
            "stderr" => Some(LogOutput::Stderr),
            "file" => Some(LogOutput::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    pub log_dir: PathBuf,
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub otlp_endpoint: Option<String>,
    /// Trace sampling ratio in `[0, 1]`
    pub otel_sampling_rate: f64,
    pub otlp_timeout_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::for_environment(
            env::var("ENVIRONMENT")
                .or_else(|_| env::var("ENV"))
                .unwrap_or_else(|_| "development".to_string()),
        )
    }
}

impl LoggingConfig {
    fn for_environment(environment: String) -> Self {
        let production = is_production(&environment);
        Self {
            format: if production {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
            output: LogOutput::Stderr,
            log_dir: PathBuf::from("logs"),
            service_name: SERVICE_NAME.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment,
            otlp_endpoint: None,
            otel_sampling_rate: if production { 0.1 } else { 1.0 },
            otlp_timeout_secs: 10,
        }
    }

    /// Defaults overridden by `LOG_FORMAT`, `LOG_OUTPUT`, `LOG_DIR`,
    /// `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SAMPLING_RATE` and
    /// `OTEL_EXPORTER_OTLP_TIMEOUT`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(format) = env::var("LOG_FORMAT").ok().as_deref().and_then(LogFormat::parse) {
            config.format = format;
        }
        if let Some(output) = env::var("LOG_OUTPUT").ok().as_deref().and_then(LogOutput::parse) {
            config.output = output;
        }
        if let Ok(dir) = env::var("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        config.otlp_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|endpoint| !endpoint.trim().is_empty());
        if let Some(rate) = env::var("OTEL_SAMPLING_RATE")
            .ok()
            .and_then(|raw| raw.parse::<f64>().ok())
        {
            config.otel_sampling_rate = rate.clamp(0.0, 1.0);
        }
        if let Some(secs) = env::var("OTEL_EXPORTER_OTLP_TIMEOUT")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
        {
            config.otlp_timeout_secs = secs;
        }
        config
    }

    fn resource(&self) -> Resource {
        Resource::new(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                self.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                self.service_version.clone(),
            ),
            KeyValue::new("environment", self.environment.clone()),
            KeyValue::new("service.namespace", "reports"),
        ])
    }

    fn sampler(&self) -> Sampler {
        if self.otel_sampling_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if self.otel_sampling_rate <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                self.otel_sampling_rate,
            )))
        }
    }

    fn writer(&self) -> Result<(NonBlocking, WorkerGuard)> {
        Ok(match self.output {
            LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
            LogOutput::File => {
                std::fs::create_dir_all(&self.log_dir).with_context(|| {
                    format!("failed to create log directory {}", self.log_dir.display())
                })?;
                let appender =
                    tracing_appender::rolling::daily(&self.log_dir, format!("{}.log", self.service_name));
                tracing_appender::non_blocking(appender)
            }
        })
    }
}

fn is_production(environment: &str) -> bool {
    matches!(environment, "production" | "prod")
}

/// Installs the global subscriber. Hold the returned guard until exit so
/// buffered lines are flushed.
pub fn init_logging(config: LoggingConfig) -> Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if is_production(&config.environment) {
            "info"
        } else {
            "debug"
        };
        EnvFilter::new(format!("{level},hyper=info,tower=info,umya_spreadsheet=warn"))
    });
    let (writer, guard) = config.writer()?;

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => match init_tracer(&config, endpoint) {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(err) => {
                eprintln!("warning: OTLP exporter unavailable ({err}); continuing without traces");
                None
            }
        },
        None => None,
    };

    let registry = tracing_subscriber::registry().with(otel_layer);
    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_filter(env_filter),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(writer)
                    .with_target(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_filter(env_filter),
            )
            .init(),
    }

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        format = ?config.format,
        output = ?config.output,
        otlp = config.otlp_endpoint.is_some(),
        "logging initialized"
    );
    Ok(guard)
}

/// Installs the batch OTLP pipeline as the global provider and returns its
/// tracer.
fn init_tracer(config: &LoggingConfig, endpoint: &str) -> Result<Tracer, TraceError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(config.otlp_timeout_secs));

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(config.sampler())
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(config.resource()),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
}

/// Flushes pending spans to the exporter.
pub fn shutdown_telemetry() {
    tracing::info!("shutting down telemetry");
    opentelemetry::global::shutdown_tracer_provider();
}

pub fn upload_span(report_type: &str) -> tracing::Span {
    tracing::info_span!("upload", report.type = report_type)
}

pub fn window_span(upload_id: &str, sheet: &str) -> tracing::Span {
    tracing::debug_span!("window", report.upload_id = upload_id, report.sheet = sheet)
}

pub fn stats_span(report_type: &str) -> tracing::Span {
    tracing::info_span!("stats", report.type = report_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_defaults_to_json_and_sampling() {
        let config = LoggingConfig::for_environment("production".into());
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.otel_sampling_rate, 0.1);
        assert_eq!(config.service_name, SERVICE_NAME);

        let dev = LoggingConfig::for_environment("development".into());
        assert_eq!(dev.format, LogFormat::Pretty);
        assert_eq!(dev.output, LogOutput::Stderr);
    }

    #[test]
    fn parses_format_and_output_names() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("xml"), None);
        assert_eq!(LogOutput::parse("file"), Some(LogOutput::File));
    }
}
