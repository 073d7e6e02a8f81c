/// Engine error taxonomy
///
/// Typed errors for the execution engine and scheduler. Node executors
/// themselves return `anyhow::Error`; the orchestrator wraps those into
/// `EngineError::Executor` with the root message and the full chain so the
/// execution record carries both.

use thiserror::Error;

/// Errors raised while preparing a workflow graph for execution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A connection references a node id that is not part of the workflow.
    #[error("connection references unknown node: {node_id}")]
    UnknownNode { node_id: String },

    /// The connection set forms at least one directed cycle.
    /// `path` is a closed walk (first id equals last id) for diagnostics.
    #[error("workflow contains a cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// Top-level error type for execution and scheduling paths.
#[derive(Debug, Error)]
pub enum EngineError {
    /// User-fixable misconfiguration: unknown node type, missing required
    /// node data, workflow not found. Surfaced to the user, not retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Graph-level failure detected before any node runs.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A node executor failed. Terminal for the run; `detail` carries the
    /// full error chain for the execution record.
    #[error("node '{node_id}' failed: {message}")]
    Executor {
        node_id: String,
        message: String,
        detail: Option<String>,
    },

    /// Failed to compute or persist a schedule occurrence.
    #[error("scheduling error: {0}")]
    Scheduling(String),

    /// Persistence failure in the execution or schedule store.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// A stored or wire payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Secondary detail (error chain, cycle path) for persistence alongside
    /// the primary message. Status-publish failures never reach this type;
    /// they are logged and swallowed at the call site.
    pub fn detail(&self) -> Option<String> {
        match self {
            EngineError::Executor { detail, .. } => detail.clone(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
