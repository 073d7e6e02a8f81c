/// HTTP API Layer
///
/// This module hosts the engine's inbound interfaces:
/// - Trigger-event intake and execution record lookup
/// - Schedule attachment and the start/cancel control signals
///
/// Workflow definition CRUD lives in the external editor service; it is
/// deliberately absent here.

use crate::runtime::engine::ExecutionEngine;
use crate::schedule::runner::ScheduleService;
use std::sync::Arc;

// Execution triggering and record lookup
pub mod executions;

// Schedule attachment and control signals
pub mod schedules;

/// Shared application state for all API routes
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ExecutionEngine>,
    pub schedules: Arc<ScheduleService>,
}

// Re-export router builders
pub use executions::create_execution_routes;
pub use schedules::create_schedule_routes;
