/// Hot-reload workflow registry using ArcSwap
///
/// Lock-free, atomic updates to the in-memory workflow registry. Each update
/// swaps the entire registry pointer, so concurrent executions keep reading
/// a consistent snapshot while the editor pushes new definitions.
///
/// Compilation is also where the mandatory cycle pre-flight happens: a
/// cyclic graph never enters the registry, which is what lets the
/// orchestrator skip per-run re-validation on the hot path.

use crate::error::{EngineError, GraphError, Result};
use crate::runtime::graph;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{TriggerKind, Workflow};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Lock-free registry of executable workflows
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Atomic pointer to the workflow map, keyed by workflow id
    workflows: ArcSwap<HashMap<String, CompiledWorkflow>>,

    /// Persistent definition store backing reload operations
    storage: WorkflowStorage,
}

/// Workflow definition plus execution metadata extracted at load time
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub workflow: Workflow,

    /// Ids of trigger-type nodes, in definition order. Used by trigger
    /// selection when a payload names a kind but not a concrete node.
    pub trigger_node_ids: Vec<String>,
}

impl WorkflowRegistry {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Populate the registry from storage at startup.
    ///
    /// Definitions that fail compilation (cyclic graphs, dangling
    /// connections) are skipped with an error log rather than poisoning the
    /// whole registry.
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored_workflows = self.storage.load_all_workflows().await?;

        let mut compiled = HashMap::new();
        for (id, workflow) in stored_workflows {
            match compile_workflow(workflow) {
                Ok(cw) => {
                    compiled.insert(id, cw);
                }
                Err(e) => {
                    tracing::error!("skipping workflow '{}' at startup: {}", id, e);
                }
            }
        }

        self.workflows.store(Arc::new(compiled));

        tracing::info!(
            "initialized workflow registry with {} workflows",
            self.workflows.load().len()
        );

        Ok(())
    }

    /// Hot-reload a single workflow from storage.
    ///
    /// This is the pre-flight gate for edited graphs: compilation rejects
    /// cycles before the definition becomes executable.
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<()> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::Configuration(format!("workflow not found: {workflow_id}")))?;

        let compiled = compile_workflow(workflow)?;

        let current = self.workflows.load();
        let mut next = (**current).clone();
        next.insert(workflow_id.to_string(), compiled);
        self.workflows.store(Arc::new(next));

        tracing::info!("hot-reloaded workflow: {}", workflow_id);

        Ok(())
    }

    /// Get a workflow by id (lock-free read).
    pub fn get_workflow(&self, workflow_id: &str) -> Option<CompiledWorkflow> {
        self.workflows.load().get(workflow_id).cloned()
    }

    /// Remove a workflow from the registry.
    pub fn remove_workflow(&self, workflow_id: &str) {
        let current = self.workflows.load();
        if !current.contains_key(workflow_id) {
            return;
        }
        let mut next = (**current).clone();
        next.remove(workflow_id);
        self.workflows.store(Arc::new(next));
        tracing::info!("removed workflow from registry: {}", workflow_id);
    }
}

/// Compile a workflow definition into execution-ready form.
///
/// Validates that every connection references known nodes and that the
/// connection set is acyclic, then extracts the trigger node ids.
pub fn compile_workflow(workflow: Workflow) -> Result<CompiledWorkflow> {
    for connection in &workflow.connections {
        for node_id in [&connection.from_node_id, &connection.to_node_id] {
            if workflow.node(node_id).is_none() {
                return Err(GraphError::UnknownNode {
                    node_id: node_id.clone(),
                }
                .into());
            }
        }
    }

    let report = graph::detect_cycle(&workflow.nodes, &workflow.connections);
    if report.has_cycle {
        return Err(GraphError::Cycle {
            path: report.cycle_path.unwrap_or_default(),
        }
        .into());
    }

    let trigger_node_ids = workflow
        .nodes
        .iter()
        .filter(|node| {
            TriggerKind::ALL
                .iter()
                .any(|kind| kind.node_type() == node.node_type)
        })
        .map(|node| node.id.clone())
        .collect();

    Ok(CompiledWorkflow {
        workflow,
        trigger_node_ids,
    })
}
