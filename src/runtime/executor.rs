/// Node executor capability and registry
///
/// Every node behavior lives behind the `NodeExecutor` trait; the
/// orchestrator never branches on a concrete node type. Adding a node type
/// means registering a new implementation under its type tag. Unknown tags
/// are a configuration error surfaced to the user, not a panic.
///
/// Integration executors (HTTP, AI providers, messaging) are provided by
/// the host application; this module ships only the engine-adjacent
/// built-ins: the three trigger pass-throughs, the `filter` branching
/// node, and the `set_variable` transform.

use crate::error::{EngineError, Result};
use crate::runtime::substrate::{StatusPublisher, StepRunner};
use crate::workflow::types::{ExecutionContext, TriggerKind};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Output port emitted by `filter` when its condition passes.
pub const PORT_TRUE: &str = "true";
/// Output port emitted by `filter` when its condition fails.
pub const PORT_FALSE: &str = "false";

/// Broad classification the orchestrator needs for trigger selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Entry-point node; skipped unless it is the run's active trigger.
    Trigger,
    /// Regular processing node.
    Action,
}

/// Everything an executor receives for one node invocation.
pub struct Invocation<'a> {
    pub node_id: &'a str,
    /// Node configuration from the definition; validated by the executor.
    pub data: &'a Value,
    /// Owning identity of the workflow, for credential-scoped executors.
    pub user_id: &'a str,
    /// Accumulated context; consumed by value, returned in the outcome.
    pub context: ExecutionContext,
    /// Durable step runner for executors that need labeled sub-steps.
    pub step: &'a dyn StepRunner,
    /// Best-effort status channel for executors that report sub-progress.
    pub publisher: &'a dyn StatusPublisher,
}

/// Result of one node invocation.
///
/// Branching executors name the single output port that fired;
/// non-branching executors leave `activated_port` empty, which activates
/// every outgoing connection.
#[derive(Debug)]
pub struct NodeOutcome {
    pub context: ExecutionContext,
    pub activated_port: Option<String>,
}

impl NodeOutcome {
    /// Continue along all outgoing connections.
    pub fn advance(context: ExecutionContext) -> Self {
        Self {
            context,
            activated_port: None,
        }
    }

    /// Continue only along connections leaving the named port.
    pub fn branch(context: ExecutionContext, port: impl Into<String>) -> Self {
        Self {
            context,
            activated_port: Some(port.into()),
        }
    }
}

/// Polymorphic node capability: accepts prior context, node configuration,
/// and identity; returns updated context or fails. Executors may perform
/// I/O and are never assumed side-effect-free.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    fn kind(&self) -> NodeKind {
        NodeKind::Action
    }

    async fn execute(&self, invocation: Invocation<'_>) -> anyhow::Result<NodeOutcome>;
}

/// Registry mapping node type tags to executor implementations
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    /// Empty registry; hosts compose their own executor set.
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Registry pre-populated with the engine built-ins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in TriggerKind::ALL {
            registry.register(kind.node_type(), Arc::new(TriggerExecutor { kind }));
        }
        registry.register("filter", Arc::new(FilterExecutor));
        registry.register("set_variable", Arc::new(SetVariableExecutor));
        registry
    }

    pub fn register(&mut self, node_type: impl Into<String>, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(node_type.into(), executor);
    }

    /// Look up the executor for a node type tag.
    pub fn get(&self, node_type: &str) -> Result<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned().ok_or_else(|| {
            EngineError::Configuration(format!("unknown node type: {node_type}"))
        })
    }

    /// Whether a type tag names a trigger node. Unknown tags are not
    /// triggers; they fail later at dispatch with a configuration error.
    pub fn is_trigger(&self, node_type: &str) -> bool {
        self.executors
            .get(node_type)
            .map(|e| e.kind() == NodeKind::Trigger)
            .unwrap_or(false)
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Pass-through executor for trigger nodes.
///
/// The trigger's payload already arrived in the run's initial data; the
/// node itself just opens its branch.
struct TriggerExecutor {
    kind: TriggerKind,
}

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Trigger
    }

    async fn execute(&self, invocation: Invocation<'_>) -> anyhow::Result<NodeOutcome> {
        tracing::debug!(
            "trigger node {} fired ({})",
            invocation.node_id,
            self.kind.payload_key()
        );
        Ok(NodeOutcome::advance(invocation.context))
    }
}

/// Conditional branching over a single context variable.
///
/// Configuration: `{ "variable": "score", "operator": "greater_than",
/// "value": 70 }`. Emits exactly one of the "true"/"false" ports.
struct FilterExecutor;

#[async_trait]
impl NodeExecutor for FilterExecutor {
    async fn execute(&self, invocation: Invocation<'_>) -> anyhow::Result<NodeOutcome> {
        let variable = invocation
            .data
            .get("variable")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("filter node '{}' is missing 'variable'", invocation.node_id))?;
        let operator = invocation
            .data
            .get("operator")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("filter node '{}' is missing 'operator'", invocation.node_id))?;
        let expected = invocation.data.get("value").cloned().unwrap_or(Value::Null);

        let actual = invocation.context.get(variable).cloned().unwrap_or(Value::Null);

        let passed = match operator {
            "equals" => actual == expected,
            "not_equals" => actual != expected,
            "exists" => invocation.context.contains(variable),
            "contains" => match (&actual, &expected) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
                (Value::Array(items), needle) => items.contains(needle),
                _ => false,
            },
            "greater_than" => match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            "less_than" => match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
            other => bail!("filter node '{}': unknown operator '{other}'", invocation.node_id),
        };

        let port = if passed { PORT_TRUE } else { PORT_FALSE };
        tracing::debug!(
            "filter {}: {} {} -> {}",
            invocation.node_id,
            variable,
            operator,
            port
        );

        Ok(NodeOutcome::branch(invocation.context, port))
    }
}

/// Writes literal assignments into the context.
///
/// Configuration: `{ "variables": { "stage": "qualified", "score": 10 } }`.
struct SetVariableExecutor;

#[async_trait]
impl NodeExecutor for SetVariableExecutor {
    async fn execute(&self, invocation: Invocation<'_>) -> anyhow::Result<NodeOutcome> {
        let assignments = invocation
            .data
            .get("variables")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                anyhow!(
                    "set_variable node '{}' is missing 'variables'",
                    invocation.node_id
                )
            })?;

        let mut context = invocation.context;
        for (name, value) in assignments {
            context.insert(name.clone(), value.clone());
        }

        Ok(NodeOutcome::advance(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::substrate::{InProcessStepRunner, NoopPublisher};
    use serde_json::json;

    async fn invoke(
        registry: &ExecutorRegistry,
        node_type: &str,
        data: Value,
        context: ExecutionContext,
    ) -> anyhow::Result<NodeOutcome> {
        let step = InProcessStepRunner::new();
        let publisher = NoopPublisher;
        let executor = registry.get(node_type).map_err(|e| anyhow!(e.to_string()))?;
        executor
            .execute(Invocation {
                node_id: "n1",
                data: &data,
                user_id: "u1",
                context,
                step: &step,
                publisher: &publisher,
            })
            .await
    }

    #[tokio::test]
    async fn unknown_node_type_is_a_configuration_error() {
        let registry = ExecutorRegistry::with_builtins();
        let err = registry.get("quantum_blockchain").err().unwrap();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[tokio::test]
    async fn filter_emits_true_port_when_condition_passes() {
        let registry = ExecutorRegistry::with_builtins();
        let mut context = ExecutionContext::new();
        context.insert("score", json!(85));

        let outcome = invoke(
            &registry,
            "filter",
            json!({"variable": "score", "operator": "greater_than", "value": 70}),
            context,
        )
        .await
        .unwrap();

        assert_eq!(outcome.activated_port.as_deref(), Some(PORT_TRUE));
    }

    #[tokio::test]
    async fn filter_emits_false_port_when_condition_fails() {
        let registry = ExecutorRegistry::with_builtins();
        let mut context = ExecutionContext::new();
        context.insert("score", json!(42));

        let outcome = invoke(
            &registry,
            "filter",
            json!({"variable": "score", "operator": "greater_than", "value": 70}),
            context,
        )
        .await
        .unwrap();

        assert_eq!(outcome.activated_port.as_deref(), Some(PORT_FALSE));
    }

    #[tokio::test]
    async fn filter_rejects_unknown_operator() {
        let registry = ExecutorRegistry::with_builtins();
        let err = invoke(
            &registry,
            "filter",
            json!({"variable": "score", "operator": "resembles"}),
            ExecutionContext::new(),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("unknown operator"));
    }

    #[tokio::test]
    async fn set_variable_writes_assignments_into_context() {
        let registry = ExecutorRegistry::with_builtins();

        let outcome = invoke(
            &registry,
            "set_variable",
            json!({"variables": {"stage": "qualified", "score": 10}}),
            ExecutionContext::new(),
        )
        .await
        .unwrap();

        assert!(outcome.activated_port.is_none());
        assert_eq!(outcome.context.get("stage"), Some(&json!("qualified")));
        assert_eq!(outcome.context.get("score"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn trigger_executors_are_classified_as_triggers() {
        let registry = ExecutorRegistry::with_builtins();
        assert!(registry.is_trigger("manual_trigger"));
        assert!(registry.is_trigger("schedule_trigger"));
        assert!(!registry.is_trigger("filter"));
        assert!(!registry.is_trigger("never_registered"));
    }
}
