pub mod analysis;
pub mod catalog;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod render;
pub mod server;
pub mod sheet;
pub mod shutdown;
pub mod state;
pub mod store;
pub mod tools;
pub mod utils;
pub mod window;
pub mod workbook;

pub use config::{CliArgs, ServerConfig};
pub use error::{ERROR_METRICS, ErrorCode, ErrorMetrics, ReportError, ReportResult};
pub use logging::{LoggingConfig, init_logging, shutdown_telemetry};
pub use server::build_router;
pub use shutdown::{ShutdownConfig, ShutdownCoordinator};

use anyhow::Result;
use state::AppState;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);
    config.ensure_storage_root()?;

    let state = Arc::new(AppState::new(config.clone())?);
    log_restored_uploads(&state);

    let listener = TcpListener::bind(config.http_bind_address).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        bind = %local_addr,
        storage_root = %config.storage_root.display(),
        "listening"
    );

    let coordinator = Arc::new(ShutdownCoordinator::new(ShutdownConfig::default()));
    let signals = coordinator.clone();
    tokio::spawn(async move { signals.listen_for_signals().await });

    let server = axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(coordinator.triggered())
        .into_future();
    let outcome = coordinator.drain(server).await;

    tracing::info!("server stopped, flushing state");
    shutdown::flush_state(&state);

    match outcome {
        Some(result) => result.map_err(anyhow::Error::from),
        None => Ok(()),
    }
}

fn log_restored_uploads(state: &AppState) {
    let restored: Vec<String> = state
        .catalog()
        .iter()
        .filter_map(|report| state.store().latest(&report.key))
        .map(|descriptor| descriptor.id.to_string())
        .collect();
    if restored.is_empty() {
        tracing::info!("startup scan complete: no uploads on disk");
    } else {
        tracing::info!(
            report_types = restored.len(),
            latest = %restored.join(", "),
            "startup scan restored uploads"
        );
    }
}
