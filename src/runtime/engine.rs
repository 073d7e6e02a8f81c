/// Execution orchestrator
///
/// Given a trigger event and a workflow graph, selects the active trigger,
/// walks nodes in topological order while maintaining the active-node
/// frontier, threads the accumulating context through executors, persists
/// execution status, and reports per-node status. Nodes within a run
/// execute strictly sequentially; sibling branches are never parallelized,
/// which keeps context-threading semantics deterministic.

use crate::error::{EngineError, Result};
use crate::runtime::executor::{ExecutorRegistry, Invocation};
use crate::runtime::graph::{self, AdjacencyIndex};
use crate::runtime::record::{ExecutionRecord, ExecutionStore};
use crate::runtime::substrate::{
    InProcessStepRunner, NodeStatus, SharedPublisher, StatusUpdate, StepRunner, TriggerDispatcher,
};
use crate::workflow::registry::{CompiledWorkflow, WorkflowRegistry};
use crate::workflow::types::{ExecutionContext, TriggerEvent, TriggerKind};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Orchestrates single workflow runs end to end
pub struct ExecutionEngine {
    registry: Arc<WorkflowRegistry>,
    executors: Arc<ExecutorRegistry>,
    store: ExecutionStore,
    publisher: SharedPublisher,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        executors: Arc<ExecutorRegistry>,
        store: ExecutionStore,
        publisher: SharedPublisher,
    ) -> Self {
        Self {
            registry,
            executors,
            store,
            publisher,
        }
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    /// Execute one run.
    ///
    /// Wraps the main path with the last-resort failure guard: whatever
    /// goes wrong, a FAILED record keyed by `(trigger_event_id,
    /// workflow_id)` is persisted before the error propagates to the
    /// durable substrate. No error is ever only logged.
    pub async fn execute(
        &self,
        event: &TriggerEvent,
        step: &dyn StepRunner,
    ) -> Result<ExecutionRecord> {
        match self.execute_inner(event, step).await {
            Ok(record) => Ok(record),
            Err(err) => {
                if let Err(write_err) = self
                    .store
                    .fail_upsert(
                        &event.id,
                        &event.workflow_id,
                        &err.to_string(),
                        err.detail().as_deref(),
                    )
                    .await
                {
                    tracing::error!(
                        "failed to persist failure for trigger event {}: {}",
                        event.id,
                        write_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn execute_inner(
        &self,
        event: &TriggerEvent,
        step: &dyn StepRunner,
    ) -> Result<ExecutionRecord> {
        let run_start = std::time::Instant::now();

        tracing::info!(
            "🚀 starting execution of workflow {} (trigger event {})",
            event.workflow_id,
            event.id
        );

        // Idempotent record creation, seeded with the initial data so
        // in-flight state is inspectable before completion.
        let initial = ExecutionContext::from_initial_data(event.initial_data.as_ref());
        let record = self
            .store
            .create(&event.id, &event.workflow_id, &initial.to_value())
            .await?;

        let compiled = self.registry.get_workflow(&event.workflow_id).ok_or_else(|| {
            EngineError::Configuration(format!("workflow not found: {}", event.workflow_id))
        })?;
        let workflow = &compiled.workflow;

        // Acyclicity was validated when the graph entered the registry;
        // sorting here only derives the walk order.
        let sorted = graph::sorted_nodes(&workflow.nodes, &workflow.connections)?;
        let adjacency = AdjacencyIndex::build(&workflow.connections);

        let active_triggers = self.active_trigger_ids(&compiled, event);

        // The active-node frontier: node ids eligible to run because an
        // activated predecessor completed (or because they start the run).
        let mut frontier: HashSet<String> = match &active_triggers {
            Some(ids) => ids.iter().cloned().collect(),
            None => {
                tracing::debug!(
                    "no recognized trigger payload; activating all zero-indegree nodes"
                );
                sorted
                    .iter()
                    .filter(|node| adjacency.indegree(&node.id) == 0)
                    .map(|node| node.id.clone())
                    .collect()
            }
        };

        self.store.mark_running(&record.id).await?;

        let mut context = initial;

        for node in &sorted {
            // Only one trigger branch ever runs per execution.
            if let Some(active) = &active_triggers {
                if self.executors.is_trigger(&node.node_type) && !active.contains(&node.id) {
                    tracing::debug!("skipping inactive trigger node '{}'", node.id);
                    continue;
                }
            }

            if !frontier.remove(&node.id) {
                tracing::debug!("skipping node '{}': branch not activated", node.id);
                continue;
            }

            let executor = self.executors.get(&node.node_type)?;

            tracing::info!("📍 executing node '{}' (type: {})", node.id, node.node_type);
            self.publish_status(&record.id, &node.id, NodeStatus::Loading)
                .await;

            let invocation = Invocation {
                node_id: &node.id,
                data: &node.data,
                user_id: &workflow.user_id,
                context: context.clone(),
                step,
                publisher: self.publisher.as_ref(),
            };

            match executor.execute(invocation).await {
                Ok(outcome) => {
                    context = outcome.context;
                    self.publish_status(&record.id, &node.id, NodeStatus::Success)
                        .await;
                    self.activate_downstream(
                        &mut frontier,
                        &adjacency,
                        &node.id,
                        outcome.activated_port.as_deref(),
                    );
                }
                Err(err) => {
                    let message = err.to_string();
                    let detail = format!("{err:?}");

                    tracing::error!("❌ node '{}' failed: {}", node.id, message);
                    self.publish_status(&record.id, &node.id, NodeStatus::Error)
                        .await;

                    // Persist before re-raising; the substrate decides
                    // whether the whole run is retried from scratch.
                    self.store
                        .fail(&record.id, &message, Some(&detail))
                        .await?;

                    return Err(EngineError::Executor {
                        node_id: node.id.clone(),
                        message,
                        detail: Some(detail),
                    });
                }
            }
        }

        self.store.complete(&record.id, &context.to_value()).await?;

        tracing::info!(
            "✅ workflow {} completed in {:?} (execution {})",
            event.workflow_id,
            run_start.elapsed(),
            record.id
        );

        self.store
            .get(&record.id)
            .await?
            .ok_or(EngineError::Storage(sqlx::Error::RowNotFound))
    }

    /// Resolve the active trigger node ids from the event's initial data.
    ///
    /// A recognized nested payload names the trigger kind; the payload's
    /// `nodeId` picks the concrete node, falling back to the first node of
    /// the kind's type. `None` selects the zero-indegree legacy mode.
    fn active_trigger_ids(
        &self,
        compiled: &CompiledWorkflow,
        event: &TriggerEvent,
    ) -> Option<Vec<String>> {
        let initial_data = event.initial_data.as_ref()?;
        let (kind, payload) = TriggerKind::detect(initial_data)?;

        if let Some(node_id) = payload.get("nodeId").and_then(Value::as_str) {
            if compiled.workflow.node(node_id).is_some() {
                return Some(vec![node_id.to_string()]);
            }
            tracing::warn!(
                "trigger payload names unknown node '{}' in workflow {}",
                node_id,
                compiled.workflow.id
            );
        }

        let fallback = compiled
            .workflow
            .nodes
            .iter()
            .find(|node| node.node_type == kind.node_type())
            .map(|node| vec![node.id.clone()]);

        if fallback.is_none() {
            tracing::warn!(
                "no {} node in workflow {}; using zero-indegree activation",
                kind.node_type(),
                compiled.workflow.id
            );
        }

        fallback
    }

    /// Add downstream nodes to the frontier after a successful execution.
    ///
    /// A named port activates only matching connections. No port activates
    /// everything — including, deliberately, the fail-open case where a
    /// multi-port node reported nothing: all outputs fire and a diagnostic
    /// is logged rather than silently dropping the run.
    fn activate_downstream(
        &self,
        frontier: &mut HashSet<String>,
        adjacency: &AdjacencyIndex,
        node_id: &str,
        activated_port: Option<&str>,
    ) {
        let outgoing = adjacency.outgoing(node_id);

        match activated_port {
            Some(port) => {
                let mut activated = 0;
                for connection in outgoing {
                    if connection.from_output == port {
                        frontier.insert(connection.to_node_id.clone());
                        activated += 1;
                    }
                }
                tracing::debug!(
                    "node '{}' activated port '{}' ({} connections)",
                    node_id,
                    port,
                    activated
                );
            }
            None => {
                if adjacency.distinct_output_ports(node_id) > 1 {
                    tracing::warn!(
                        "node '{}' has named output ports but reported no activated port; \
                         failing open and activating all outgoing connections",
                        node_id
                    );
                }
                for connection in outgoing {
                    frontier.insert(connection.to_node_id.clone());
                }
            }
        }
    }

    /// Best-effort status publish. Failures are transient-infra: logged,
    /// never allowed to fail the run.
    async fn publish_status(&self, execution_id: &str, node_id: &str, status: NodeStatus) {
        let update = StatusUpdate {
            node_id: node_id.to_string(),
            status,
        };
        if let Err(err) = self
            .publisher
            .publish(execution_id, "node-status", update)
            .await
        {
            tracing::warn!("status publish failed for node '{}': {:#}", node_id, err);
        }
    }
}

/// In-process trigger dispatcher: runs the orchestrator inline with a
/// bounded whole-run retry budget, standing in for the durable substrate's
/// retry policy (bounded in production, zero in development).
pub struct EngineDispatcher {
    engine: Arc<ExecutionEngine>,
    retries: u32,
}

impl EngineDispatcher {
    pub fn new(engine: Arc<ExecutionEngine>, retries: u32) -> Self {
        Self { engine, retries }
    }
}

#[async_trait]
impl TriggerDispatcher for EngineDispatcher {
    async fn dispatch(&self, event: TriggerEvent) -> anyhow::Result<()> {
        let mut attempt = 0;
        loop {
            let step = InProcessStepRunner::new();
            match self.engine.execute(&event, &step).await {
                Ok(_) => return Ok(()),
                // Configuration and graph problems are user-fixable; a
                // replay would fail identically.
                Err(err @ (EngineError::Configuration(_) | EngineError::Graph(_))) => {
                    return Err(err.into());
                }
                Err(err) if attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(
                        "run for trigger event {} failed (attempt {}/{}): {}",
                        event.id,
                        attempt,
                        self.retries,
                        err
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
