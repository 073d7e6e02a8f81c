/// Execution endpoints
///
/// Trigger-event intake and execution record lookup. The execution record
/// is the single source of truth a UI consumes: a run that fails still
/// answers 200 with the FAILED record rather than a bare error status.

use crate::api::AppState;
use crate::error::EngineError;
use crate::runtime::record::ExecutionRecord;
use crate::runtime::substrate::InProcessStepRunner;
use crate::workflow::types::TriggerEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Request body for triggering a workflow execution
///
/// `initial_data` nests one recognized trigger payload (`manualTrigger`,
/// `webhookTrigger`, `scheduleTrigger`); omitting it activates all
/// zero-indegree nodes.
#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub workflow_id: String,
    #[serde(default)]
    pub initial_data: Option<Map<String, Value>>,
    /// Optional caller-supplied event id for idempotent replays.
    #[serde(default)]
    pub trigger_event_id: Option<String>,
}

/// Create execution routes
pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/executions", post(trigger_execution))
        .route("/api/executions/{id}", get(get_execution))
}

/// Trigger one workflow execution
///
/// POST /api/executions
/// Body: { "workflow_id": "...", "initial_data": { "manualTrigger": { "nodeId": "..." } } }
async fn trigger_execution(
    State(state): State<AppState>,
    Json(payload): Json<TriggerRequest>,
) -> Result<Json<ExecutionRecord>, StatusCode> {
    if payload.workflow_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let mut event = TriggerEvent::new(payload.workflow_id, payload.initial_data);
    if let Some(id) = payload.trigger_event_id {
        event.id = id;
    }

    let step = InProcessStepRunner::new();
    match state.engine.execute(&event, &step).await {
        Ok(record) => Ok(Json(record)),
        Err(EngineError::Configuration(message)) => {
            tracing::warn!("rejected trigger event {}: {}", event.id, message);
            Err(StatusCode::NOT_FOUND)
        }
        Err(err) => {
            tracing::error!("execution for trigger event {} failed: {}", event.id, err);
            // The failure is already persisted; hand the caller the record.
            match state
                .engine
                .store()
                .get_by_trigger(&event.id, &event.workflow_id)
                .await
            {
                Ok(Some(record)) => Ok(Json(record)),
                _ => Err(StatusCode::INTERNAL_SERVER_ERROR),
            }
        }
    }
}

/// Get an execution record by id
///
/// GET /api/executions/:id
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionRecord>, StatusCode> {
    match state.engine.store().get(&id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            tracing::error!("failed to load execution {}: {}", id, err);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
