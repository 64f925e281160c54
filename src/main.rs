use clap::Parser;
use report_sheets::{
    CliArgs, LoggingConfig, ServerConfig, init_logging, run_server, shutdown_telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = init_logging(LoggingConfig::from_env())?;

    let cli = CliArgs::parse();
    let config = ServerConfig::from_args(cli)?;
    config.validate()?;

    let result = run_server(config).await;

    shutdown_telemetry();
    result
}
