/// Core workflow type definitions
///
/// Defines the fundamental structures for workflows, nodes, and connections.
/// These types are serialized/deserialized from JSON for persistence and are
/// the shapes the visual editor produces.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Conventional output port for non-branching nodes.
///
/// A connection that does not name a `from_output` uses this port. Branching
/// nodes emit one of several named ports instead (e.g. "true"/"false").
pub const DEFAULT_OUTPUT: &str = "main";

/// A complete workflow definition containing nodes and their connections
///
/// Workflows are stored as JSON in SQLite and validated for cycle safety
/// when they are loaded into the registry. The orchestrator assumes the
/// connection set is acyclic at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier (e.g. "wf-lead-intake")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// Owning identity, threaded into every executor invocation
    pub user_id: String,
    /// Nodes in this workflow
    pub nodes: Vec<Node>,
    /// Directed connections between node output ports and downstream nodes
    pub connections: Vec<Connection>,
}

impl Workflow {
    /// Look up a node by id.
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}

/// A single node in the workflow graph
///
/// `node_type` selects an executor from the registry; an unknown type is a
/// configuration error surfaced to the user, never a panic. `data` is
/// executor-specific configuration validated by the executor, not the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow (e.g. "n1", "filter-score")
    pub id: String,
    /// Executor type tag (e.g. "manual_trigger", "filter", "set_variable")
    #[serde(rename = "type")]
    pub node_type: String,
    /// Node-specific configuration as flexible JSON
    #[serde(default)]
    pub data: Value,
}

/// Directed connection between two nodes
///
/// `from_output` names the source port; multiple connections may share a
/// `from_node_id` (fan-out) or a `to_node_id` (fan-in). Fan-in is an
/// arbitrary merge: the engine does not wait for all predecessors, and
/// context writes are last-writer-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub from_node_id: String,
    pub to_node_id: String,
    /// Source output port; defaults to "main" for non-branching nodes
    #[serde(default = "default_output")]
    pub from_output: String,
    /// Optional target input label, carried for the editor's benefit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_input: Option<String>,
}

fn default_output() -> String {
    DEFAULT_OUTPUT.to_string()
}

/// Trigger kinds the orchestrator recognizes in a trigger event's
/// `initial_data`. Each kind nests its payload under a well-known key and
/// corresponds to one trigger node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Webhook,
    Schedule,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 3] = [
        TriggerKind::Manual,
        TriggerKind::Webhook,
        TriggerKind::Schedule,
    ];

    /// Well-known key the trigger payload is nested under in `initial_data`.
    pub fn payload_key(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manualTrigger",
            TriggerKind::Webhook => "webhookTrigger",
            TriggerKind::Schedule => "scheduleTrigger",
        }
    }

    /// Node type tag of the trigger node this kind activates.
    pub fn node_type(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual_trigger",
            TriggerKind::Webhook => "webhook_trigger",
            TriggerKind::Schedule => "schedule_trigger",
        }
    }

    /// Find the trigger kind whose well-known key is present in
    /// `initial_data`, along with the nested payload. Exactly one recognized
    /// key is expected; the first match in `ALL` order wins.
    pub fn detect<'a>(initial_data: &'a Map<String, Value>) -> Option<(TriggerKind, &'a Value)> {
        TriggerKind::ALL
            .iter()
            .find_map(|kind| initial_data.get(kind.payload_key()).map(|payload| (*kind, payload)))
    }
}

/// Inbound event that starts one workflow execution
///
/// `id` keys the execution record together with `workflow_id`, making run
/// creation idempotent under replays. `initial_data` nests exactly one
/// recognized trigger payload; absence of a recognized key falls back to
/// zero-indegree activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: String,
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_data: Option<Map<String, Value>>,
}

impl TriggerEvent {
    /// Create a trigger event with a fresh id.
    pub fn new(workflow_id: impl Into<String>, initial_data: Option<Map<String, Value>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            initial_data,
        }
    }
}

/// Accumulating key-value context threaded through every executor call
///
/// Entries written by a node are visible to every node executed after it;
/// there is no per-branch isolation. The orchestrator passes the context by
/// value and replaces it with the executor's returned copy, so concurrent
/// runs never share a mutable map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context from a trigger event's `initial_data`.
    pub fn from_initial_data(initial_data: Option<&Map<String, Value>>) -> Self {
        Self {
            values: initial_data.cloned().unwrap_or_default(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Snapshot the context as a JSON object for the execution record.
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}
