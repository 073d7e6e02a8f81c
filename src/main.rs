/// Syncflow: durable workflow execution engine for visual automation graphs
///
/// Main entry point for the syncflow server. Initializes configuration and
/// starts the HTTP server with execution and scheduling capabilities.

use syncflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Execution triggering at /api/executions
/// - Schedule attachment and control at /api/schedules/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults plus SYNCFLOW_* environment overrides)
    let config = Config::default();

    // Start the server
    start_server(config).await?;

    Ok(())
}
