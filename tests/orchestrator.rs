//! Integration tests for the execution orchestrator: trigger selection,
//! frontier-based branch activation, context threading, and failure
//! capture, all against an in-memory SQLite store.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::{Arc, Mutex};

use syncflow::error::EngineError;
use syncflow::runtime::engine::ExecutionEngine;
use syncflow::runtime::executor::{ExecutorRegistry, Invocation, NodeExecutor, NodeKind, NodeOutcome};
use syncflow::runtime::record::{ExecutionStatus, ExecutionStore};
use syncflow::runtime::substrate::{InProcessStepRunner, NoopPublisher};
use syncflow::workflow::registry::WorkflowRegistry;
use syncflow::workflow::storage::WorkflowStorage;
use syncflow::workflow::types::{Connection, Node, TriggerEvent, Workflow, DEFAULT_OUTPUT};

/// Executor that records every invocation into a shared log.
struct Recorder {
    kind: NodeKind,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl NodeExecutor for Recorder {
    fn kind(&self) -> NodeKind {
        self.kind
    }

    async fn execute(&self, invocation: Invocation<'_>) -> anyhow::Result<NodeOutcome> {
        self.log.lock().unwrap().push(invocation.node_id.to_string());
        Ok(NodeOutcome::advance(invocation.context))
    }
}

/// Executor that always fails.
struct Exploding;

#[async_trait]
impl NodeExecutor for Exploding {
    async fn execute(&self, _invocation: Invocation<'_>) -> anyhow::Result<NodeOutcome> {
        anyhow::bail!("exploded on purpose")
    }
}

/// Multi-port executor that never reports which port fired, to exercise
/// the fail-open path.
struct SilentMultiport {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl NodeExecutor for SilentMultiport {
    async fn execute(&self, invocation: Invocation<'_>) -> anyhow::Result<NodeOutcome> {
        self.log.lock().unwrap().push(invocation.node_id.to_string());
        Ok(NodeOutcome::advance(invocation.context))
    }
}

struct Harness {
    engine: Arc<ExecutionEngine>,
    store: ExecutionStore,
    log: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn visited(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

async fn harness(workflow: Workflow) -> Harness {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    let storage = WorkflowStorage::new(pool.clone());
    storage.init_schema().await.unwrap();
    storage.save_workflow(&workflow).await.unwrap();

    let registry = Arc::new(WorkflowRegistry::new(storage));
    registry.init_from_storage().await.unwrap();

    let store = ExecutionStore::new(pool);
    store.init_schema().await.unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));

    let mut executors = ExecutorRegistry::with_builtins();
    // Trigger pass-throughs are replaced with recording variants so tests
    // can assert which trigger branch actually ran.
    for trigger_type in ["manual_trigger", "webhook_trigger", "schedule_trigger"] {
        executors.register(
            trigger_type,
            Arc::new(Recorder {
                kind: NodeKind::Trigger,
                log: Arc::clone(&log),
            }),
        );
    }
    executors.register(
        "probe",
        Arc::new(Recorder {
            kind: NodeKind::Action,
            log: Arc::clone(&log),
        }),
    );
    executors.register("boom", Arc::new(Exploding));
    executors.register(
        "multiport",
        Arc::new(SilentMultiport {
            log: Arc::clone(&log),
        }),
    );

    let engine = Arc::new(ExecutionEngine::new(
        registry,
        Arc::new(executors),
        store.clone(),
        Arc::new(NoopPublisher),
    ));

    Harness { engine, store, log }
}

fn node(id: &str, node_type: &str, data: Value) -> Node {
    Node {
        id: id.to_string(),
        node_type: node_type.to_string(),
        data,
    }
}

fn connect(from: &str, to: &str) -> Connection {
    Connection {
        from_node_id: from.to_string(),
        to_node_id: to.to_string(),
        from_output: DEFAULT_OUTPUT.to_string(),
        to_input: None,
    }
}

fn connect_port(from: &str, to: &str, port: &str) -> Connection {
    Connection {
        from_node_id: from.to_string(),
        to_node_id: to.to_string(),
        from_output: port.to_string(),
        to_input: None,
    }
}

fn workflow(id: &str, nodes: Vec<Node>, connections: Vec<Connection>) -> Workflow {
    Workflow {
        id: id.to_string(),
        name: id.to_string(),
        user_id: "user-1".to_string(),
        nodes,
        connections,
    }
}

fn manual_event(workflow_id: &str, node_id: &str, extra: Value) -> TriggerEvent {
    let mut initial: Map<String, Value> = Map::new();
    initial.insert("manualTrigger".to_string(), json!({ "nodeId": node_id }));
    if let Value::Object(extra) = extra {
        for (k, v) in extra {
            initial.insert(k, v);
        }
    }
    TriggerEvent::new(workflow_id, Some(initial))
}

#[tokio::test]
async fn linear_chain_runs_each_node_once_in_order() {
    let wf = workflow(
        "wf-linear",
        vec![
            node("t", "manual_trigger", json!({})),
            node("a", "probe", json!({})),
            node("b", "probe", json!({})),
        ],
        vec![connect("t", "a"), connect("a", "b")],
    );
    let harness = harness(wf).await;

    let event = manual_event("wf-linear", "t", json!({}));
    let step = InProcessStepRunner::new();
    let record = harness.engine.execute(&event, &step).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(harness.visited(), vec!["t", "a", "b"]);
    assert!(record.completed_at.is_some());
}

#[tokio::test]
async fn filter_true_branch_runs_only_true_side() {
    let wf = workflow(
        "wf-filter",
        vec![
            node("t", "manual_trigger", json!({})),
            node(
                "f",
                "filter",
                json!({"variable": "score", "operator": "greater_than", "value": 70}),
            ),
            node("pass", "probe", json!({})),
            node("reject", "probe", json!({})),
        ],
        vec![
            connect("t", "f"),
            connect_port("f", "pass", "true"),
            connect_port("f", "reject", "false"),
        ],
    );
    let harness = harness(wf).await;

    let event = manual_event("wf-filter", "t", json!({"score": 85}));
    let step = InProcessStepRunner::new();
    let record = harness.engine.execute(&event, &step).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Success);
    let visited = harness.visited();
    assert!(visited.contains(&"pass".to_string()));
    assert!(!visited.contains(&"reject".to_string()));
}

#[tokio::test]
async fn filter_false_branch_runs_only_false_side() {
    let wf = workflow(
        "wf-filter",
        vec![
            node("t", "manual_trigger", json!({})),
            node(
                "f",
                "filter",
                json!({"variable": "score", "operator": "greater_than", "value": 70}),
            ),
            node("pass", "probe", json!({})),
            node("reject", "probe", json!({})),
        ],
        vec![
            connect("t", "f"),
            connect_port("f", "pass", "true"),
            connect_port("f", "reject", "false"),
        ],
    );
    let harness = harness(wf).await;

    let event = manual_event("wf-filter", "t", json!({"score": 12}));
    let step = InProcessStepRunner::new();
    let record = harness.engine.execute(&event, &step).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Success);
    let visited = harness.visited();
    assert!(visited.contains(&"reject".to_string()));
    assert!(!visited.contains(&"pass".to_string()));
}

#[tokio::test]
async fn only_the_active_trigger_branch_runs() {
    let wf = workflow(
        "wf-triggers",
        vec![
            node("t1", "manual_trigger", json!({})),
            node("t2", "schedule_trigger", json!({})),
            node("x", "probe", json!({})),
        ],
        vec![connect("t1", "x"), connect("t2", "x")],
    );
    let harness = harness(wf).await;

    let mut initial = Map::new();
    initial.insert("scheduleTrigger".to_string(), json!({ "nodeId": "t2" }));
    let event = TriggerEvent::new("wf-triggers", Some(initial));

    let step = InProcessStepRunner::new();
    let record = harness.engine.execute(&event, &step).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Success);
    let visited = harness.visited();
    assert_eq!(visited, vec!["t2", "x"]);
    assert!(!visited.contains(&"t1".to_string()));
}

#[tokio::test]
async fn unrecognized_payload_falls_back_to_zero_indegree_activation() {
    let wf = workflow(
        "wf-fallback",
        vec![
            node("t", "manual_trigger", json!({})),
            node("a", "probe", json!({})),
        ],
        vec![connect("t", "a")],
    );
    let harness = harness(wf).await;

    // No recognized trigger key at all.
    let event = TriggerEvent::new("wf-fallback", None);
    let step = InProcessStepRunner::new();
    let record = harness.engine.execute(&event, &step).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(harness.visited(), vec!["t", "a"]);
}

#[tokio::test]
async fn failing_node_marks_run_failed_and_stops_downstream() {
    let wf = workflow(
        "wf-fail",
        vec![
            node("t", "manual_trigger", json!({})),
            node("a", "probe", json!({})),
            node("b", "boom", json!({})),
            node("c", "probe", json!({})),
        ],
        vec![connect("t", "a"), connect("a", "b"), connect("b", "c")],
    );
    let harness = harness(wf).await;

    let event = manual_event("wf-fail", "t", json!({}));
    let step = InProcessStepRunner::new();
    let err = harness.engine.execute(&event, &step).await.unwrap_err();

    assert!(matches!(err, EngineError::Executor { .. }));

    let record = harness
        .store
        .get_by_trigger(&event.id, "wf-fail")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error.as_deref().unwrap_or("").contains("exploded"));
    assert!(record.completed_at.is_some());

    // Nothing downstream of the failing node ran.
    assert_eq!(harness.visited(), vec!["t", "a"]);
}

#[tokio::test]
async fn unknown_node_type_fails_the_run_with_a_persisted_record() {
    let wf = workflow(
        "wf-unknown",
        vec![
            node("t", "manual_trigger", json!({})),
            node("mystery", "quantum_blockchain", json!({})),
        ],
        vec![connect("t", "mystery")],
    );
    let harness = harness(wf).await;

    let event = manual_event("wf-unknown", "t", json!({}));
    let step = InProcessStepRunner::new();
    let err = harness.engine.execute(&event, &step).await.unwrap_err();

    assert!(matches!(err, EngineError::Configuration(_)));

    // The last-resort guard still persisted a FAILED record.
    let record = harness
        .store
        .get_by_trigger(&event.id, "wf-unknown")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error.is_some());
}

#[tokio::test]
async fn replayed_trigger_event_reuses_the_execution_record() {
    let wf = workflow(
        "wf-replay",
        vec![
            node("t", "manual_trigger", json!({})),
            node("a", "probe", json!({})),
        ],
        vec![connect("t", "a")],
    );
    let harness = harness(wf).await;

    let event = manual_event("wf-replay", "t", json!({}));
    let step = InProcessStepRunner::new();
    let first = harness.engine.execute(&event, &step).await.unwrap();

    let step = InProcessStepRunner::new();
    let second = harness.engine.execute(&event, &step).await.unwrap();

    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn context_writes_accumulate_into_the_final_output() {
    let wf = workflow(
        "wf-context",
        vec![
            node("t", "manual_trigger", json!({})),
            node(
                "s1",
                "set_variable",
                json!({"variables": {"stage": "scored"}}),
            ),
            node(
                "s2",
                "set_variable",
                json!({"variables": {"score": 99}}),
            ),
        ],
        vec![connect("t", "s1"), connect("s1", "s2")],
    );
    let harness = harness(wf).await;

    let event = manual_event("wf-context", "t", json!({"lead": "ada"}));
    let step = InProcessStepRunner::new();
    let record = harness.engine.execute(&event, &step).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Success);
    let output = record.output.as_object().unwrap();
    assert_eq!(output.get("lead"), Some(&json!("ada")));
    assert_eq!(output.get("stage"), Some(&json!("scored")));
    assert_eq!(output.get("score"), Some(&json!(99)));
}

#[tokio::test]
async fn multiport_node_without_a_reported_port_fails_open() {
    let wf = workflow(
        "wf-open",
        vec![
            node("t", "manual_trigger", json!({})),
            node("m", "multiport", json!({})),
            node("x", "probe", json!({})),
            node("y", "probe", json!({})),
        ],
        vec![
            connect("t", "m"),
            connect_port("m", "x", "alpha"),
            connect_port("m", "y", "beta"),
        ],
    );
    let harness = harness(wf).await;

    let event = manual_event("wf-open", "t", json!({}));
    let step = InProcessStepRunner::new();
    let record = harness.engine.execute(&event, &step).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Success);
    let visited = harness.visited();
    assert!(visited.contains(&"x".to_string()));
    assert!(visited.contains(&"y".to_string()));
}

#[tokio::test]
async fn fan_in_node_runs_once_per_execution() {
    let wf = workflow(
        "wf-fanin",
        vec![
            node("t", "manual_trigger", json!({})),
            node("a", "probe", json!({})),
            node("b", "probe", json!({})),
            node("merge", "probe", json!({})),
        ],
        vec![
            connect("t", "a"),
            connect("t", "b"),
            connect("a", "merge"),
            connect("b", "merge"),
        ],
    );
    let harness = harness(wf).await;

    let event = manual_event("wf-fanin", "t", json!({}));
    let step = InProcessStepRunner::new();
    let record = harness.engine.execute(&event, &step).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Success);
    let merge_runs = harness
        .visited()
        .iter()
        .filter(|id| id.as_str() == "merge")
        .count();
    assert_eq!(merge_runs, 1);
}
