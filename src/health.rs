use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Health status for a component or the overall system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but some persisted content is unreachable
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The worse of the two
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn with_status(
        component: &str,
        status: HealthStatus,
        error: Option<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            component: component.to_string(),
            status,
            error,
            timestamp: now(),
            details,
        }
    }

    pub fn healthy(component: &str, details: serde_json::Value) -> Self {
        Self::with_status(component, HealthStatus::Healthy, None, Some(details))
    }

    pub fn degraded(component: &str, error: impl Into<String>, details: serde_json::Value) -> Self {
        Self::with_status(
            component,
            HealthStatus::Degraded,
            Some(error.into()),
            Some(details),
        )
    }

    pub fn unhealthy(component: &str, error: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Unhealthy, Some(error.into()), None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: String,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        (self.status.status_code(), Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_ready: Vec<String>,
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        let status = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl IntoResponse for ComponentHealthResponse {
    fn into_response(self) -> Response {
        (self.status.status_code(), Json(self)).into_response()
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    state: Arc<AppState>,
}

impl HealthChecker {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Ready unless a component is unhealthy. Missing upload files only
    /// degrade the service.
    pub async fn readiness(&self) -> ReadinessResponse {
        let components = self.check_all_components().await;
        let mut overall = HealthStatus::Healthy;
        let mut not_ready = Vec::new();
        for (name, health) in &components {
            overall = overall.combine(health.status);
            if health.status == HealthStatus::Unhealthy {
                not_ready.push(name.clone());
            }
        }
        ReadinessResponse {
            ready: overall != HealthStatus::Unhealthy,
            status: overall,
            timestamp: now(),
            not_ready,
        }
    }

    pub async fn components(&self) -> ComponentHealthResponse {
        let components = self.check_all_components().await;
        let status = components
            .values()
            .fold(HealthStatus::Healthy, |acc, health| acc.combine(health.status));
        ComponentHealthResponse {
            status,
            timestamp: now(),
            components,
        }
    }

    async fn check_all_components(&self) -> BTreeMap<String, ComponentHealth> {
        let mut components = BTreeMap::new();
        components.insert("storage".to_string(), self.check_storage_root().await);
        components.insert("cache".to_string(), self.check_cache());
        components.insert("uploads".to_string(), self.check_uploads().await);
        components
    }

    async fn check_storage_root(&self) -> ComponentHealth {
        let root = self.state.store().layout().root().to_path_buf();
        match tokio::fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => {
                let writable = !meta.permissions().readonly();
                let details = serde_json::json!({
                    "path": root.display().to_string(),
                    "writable": writable,
                });
                if writable {
                    ComponentHealth::healthy("storage", details)
                } else {
                    ComponentHealth::unhealthy(
                        "storage",
                        format!("storage root is read-only: {}", root.display()),
                    )
                }
            }
            Ok(_) => ComponentHealth::unhealthy(
                "storage",
                format!("storage root is not a directory: {}", root.display()),
            ),
            Err(err) => ComponentHealth::unhealthy(
                "storage",
                format!("storage root unavailable: {} ({err})", root.display()),
            ),
        }
    }

    fn check_cache(&self) -> ComponentHealth {
        let stats = self.state.cache_stats();
        ComponentHealth::healthy(
            "cache",
            serde_json::json!({
                "size": stats.size,
                "capacity": stats.capacity,
                "operations": stats.operations,
                "hits": stats.hits,
                "misses": stats.misses,
                "hit_rate_pct": (stats.hit_rate() * 100.0).round(),
            }),
        )
    }

    async fn check_uploads(&self) -> ComponentHealth {
        let mut registered = 0usize;
        let mut missing = Vec::new();
        for report in self.state.catalog().iter() {
            if let Some(descriptor) = self.state.store().latest(&report.key) {
                registered += 1;
                if !self.state.backing_file_present(&descriptor).await {
                    missing.push(descriptor.id.to_string());
                }
            }
        }
        let details = serde_json::json!({
            "report_types_with_upload": registered,
            "missing_files": missing,
        });
        if missing.is_empty() {
            ComponentHealth::healthy("uploads", details)
        } else {
            ComponentHealth::degraded(
                "uploads",
                format!("{} latest upload(s) lost their backing file", missing.len()),
                details,
            )
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.liveness()
}

pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.readiness().await
}

pub async fn components_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.components().await
}
