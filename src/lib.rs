/// Syncflow: durable workflow execution engine for visual automation graphs
///
/// This library provides the execution core behind a visual automation
/// builder: topologically ordered graph execution with branch activation,
/// a registry-based node executor system, durable execution records, and
/// self-chaining recurring schedules with targeted cancellation.

// Core configuration and setup
pub mod config;

// Typed error taxonomy for the engine and scheduler
pub mod error;

// Workflow management layer - definitions, storage, and hot-reload registry
pub mod workflow;

// Runtime execution engine - graph preparation, orchestration, executors,
// execution records, and the consumed substrate abstractions
pub mod runtime;

// Recurring schedule subsystem - stores, recurrence policy, chain runner
pub mod schedule;

// HTTP API layer - trigger intake, record lookup, schedule signals
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{EngineError, GraphError};
pub use runtime::{ExecutionEngine, ExecutionRecord, ExecutionStatus, ExecutorRegistry};
pub use schedule::{ScheduleService, ScheduledWorkflow};
pub use server::start_server;
pub use workflow::{Connection, ExecutionContext, Node, TriggerEvent, Workflow};
