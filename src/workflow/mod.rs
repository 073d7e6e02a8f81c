/// Workflow Management Layer
///
/// This module handles workflow definitions, persistence, and hot-reload registry.
/// It provides:
/// - Type definitions (Workflow, Node, Connection, trigger events, context)
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload registry using ArcSwap, with the cycle pre-flight

// Core workflow type definitions
pub mod types;

// SQLite persistence layer for workflow definitions
pub mod storage;

// Hot-reload registry using ArcSwap for zero-downtime updates
pub mod registry;

// Re-export commonly used types
pub use registry::{CompiledWorkflow, WorkflowRegistry};
pub use storage::WorkflowStorage;
pub use types::{Connection, ExecutionContext, Node, TriggerEvent, TriggerKind, Workflow};
