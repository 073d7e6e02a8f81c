/// Runtime Execution Engine
///
/// This module provides the workflow execution core:
/// - Graph preparation: topological ordering and cycle diagnostics
/// - The execution orchestrator with frontier-based branch activation
/// - The node executor capability, registry, and built-ins
/// - Execution record persistence
/// - The consumed substrate abstractions (durable steps, status publish)

// Graph preparation: topological sort, cycle detection, adjacency indexes
pub mod graph;

// Execution orchestrator walking nodes in topological order
pub mod engine;

// Node executor capability trait, registry, and built-in executors
pub mod executor;

// Execution records: the durable artifact of one run
pub mod record;

// Consumed substrate abstractions and in-process implementations
pub mod substrate;

// Re-export main types
pub use engine::{EngineDispatcher, ExecutionEngine};
pub use executor::{ExecutorRegistry, Invocation, NodeExecutor, NodeKind, NodeOutcome};
pub use record::{ExecutionRecord, ExecutionStatus, ExecutionStore};
pub use substrate::{
    InProcessStepRunner, LogPublisher, NodeStatus, NoopPublisher, SleepOutcome, StatusPublisher,
    StatusUpdate, StepRunner, TriggerDispatcher,
};
