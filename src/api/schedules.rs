/// Schedule endpoints
///
/// Attaching a schedule persists its row, computes the first occurrence,
/// and starts the self-chaining runner. Start/cancel expose the schedule
/// control signals; cancel also disables the row so the reconciler does
/// not re-arm a chain the user just aborted.

use crate::api::AppState;
use crate::schedule::store::{IntervalUnit, ScheduleType, ScheduledWorkflow};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// Request body for attaching a schedule to a workflow's trigger node
#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub workflow_id: String,
    pub node_id: String,
    pub schedule_type: ScheduleType,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub interval_value: Option<i64>,
    #[serde(default)]
    pub interval_unit: Option<IntervalUnit>,
    #[serde(default)]
    pub hour: Option<u32>,
    #[serde(default)]
    pub minute: Option<u32>,
    #[serde(default)]
    pub days_of_week: Option<Vec<u32>>,
    #[serde(default)]
    pub day_of_month: Option<u32>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Create schedule routes
pub fn create_schedule_routes() -> Router<AppState> {
    Router::new()
        .route("/api/schedules", post(create_schedule))
        .route("/api/schedules/{id}/start", post(start_schedule))
        .route("/api/schedules/{id}/cancel", post(cancel_schedule))
}

/// Attach a schedule and start its chain
///
/// POST /api/schedules
async fn create_schedule(
    State(state): State<AppState>,
    Json(payload): Json<CreateScheduleRequest>,
) -> Result<Json<ScheduledWorkflow>, StatusCode> {
    if payload.workflow_id.is_empty() || payload.node_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let schedule = ScheduledWorkflow {
        id: payload.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        workflow_id: payload.workflow_id,
        node_id: payload.node_id,
        schedule_type: payload.schedule_type,
        timezone: payload.timezone,
        interval_value: payload.interval_value,
        interval_unit: payload.interval_unit,
        hour: payload.hour,
        minute: payload.minute,
        days_of_week: payload.days_of_week,
        day_of_month: payload.day_of_month,
        cron_expression: payload.cron_expression,
        enabled: true,
        next_run_at: None,
        last_run_at: None,
        last_execution_id: None,
        end_date: payload.end_date,
    };

    match state.schedules.arm(schedule).await {
        Ok(armed) => Ok(Json(armed)),
        Err(err) => {
            tracing::warn!("rejected schedule: {}", err);
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

/// Continue (or re-arm) a schedule chain
///
/// POST /api/schedules/:id/start
async fn start_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Value> {
    state.schedules.start_chain(&id);
    Json(json!({ "message": format!("start signal emitted for schedule '{id}'") }))
}

/// Abort a sleeping schedule chain
///
/// POST /api/schedules/:id/cancel
/// Firings already in flight complete normally.
async fn cancel_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if let Err(err) = state.schedules.store().set_enabled(&id, false).await {
        tracing::error!("failed to disable schedule {}: {}", id, err);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    state.schedules.cancel_chain(&id);
    Ok(Json(json!({ "message": format!("cancel signal emitted for schedule '{id}'") })))
}
