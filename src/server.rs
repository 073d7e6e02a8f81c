/// Server setup and initialization
///
/// Wires together all components: stores, registry, execution engine,
/// schedule service, and HTTP routes. Provides the main application
/// factory function for creating the Axum app.

use crate::{
    api::{create_execution_routes, create_schedule_routes, AppState},
    config::Config,
    runtime::{
        engine::{EngineDispatcher, ExecutionEngine},
        executor::ExecutorRegistry,
        record::ExecutionStore,
        substrate::LogPublisher,
    },
    schedule::{runner::ScheduleService, store::ScheduleStore},
    workflow::{registry::WorkflowRegistry, storage::WorkflowStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the main Axum application with all routes
///
/// Initializes the database, loads workflows into the registry, builds the
/// execution engine and schedule service, resumes surviving schedule
/// chains, and wires the HTTP endpoints.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("connecting to database: {}", config.database.url);
    let options = SqliteConnectOptions::from_str(&config.database.url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    let workflow_storage = WorkflowStorage::new(pool.clone());
    workflow_storage.init_schema().await?;
    let execution_store = ExecutionStore::new(pool.clone());
    execution_store.init_schema().await?;
    let schedule_store = ScheduleStore::new(pool.clone());
    schedule_store.init_schema().await?;

    tracing::info!("loading workflows into registry");
    let workflow_registry = Arc::new(WorkflowRegistry::new(workflow_storage.clone()));
    workflow_registry.init_from_storage().await?;

    let executors = Arc::new(ExecutorRegistry::with_builtins());
    let publisher = Arc::new(LogPublisher);

    let engine = Arc::new(ExecutionEngine::new(
        Arc::clone(&workflow_registry),
        executors,
        execution_store,
        publisher,
    ));

    let dispatcher = Arc::new(EngineDispatcher::new(
        Arc::clone(&engine),
        config.engine.run_retries,
    ));

    tracing::info!("starting schedule service");
    let schedules = ScheduleService::new(schedule_store, dispatcher);

    let resumed = schedules.resume_chains().await?;
    tracing::info!("resumed {} schedule chains", resumed);

    Arc::clone(&schedules).spawn_reconciler(std::time::Duration::from_secs(
        config.engine.reconcile_interval_secs,
    ));

    let state = AppState { engine, schedules };

    let app = Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Execution triggering and record lookup
        .merge(create_execution_routes())
        // Schedule attachment and control signals
        .merge(create_schedule_routes())
        .with_state(state);

    tracing::info!("application initialized");

    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting syncflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
