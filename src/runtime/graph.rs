/// Graph preparation: topological ordering and cycle safety
///
/// Converts the workflow's connection set into a petgraph DiGraph, produces
/// the execution order, and recovers a concrete cycle path for diagnostics
/// when ordering fails. The editor runs `detect_cycle` as a pre-flight on
/// every edited graph (via registry compilation); the orchestrator calls
/// `sorted_nodes` once per run and assumes the graph already passed.

use crate::error::GraphError;
use crate::workflow::types::{Connection, Node};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Result of a cycle-detection pass.
///
/// `cycle_path` is one closed walk (first id equals last id) composed of
/// node ids present in the input. Only one cycle is recovered even when
/// several exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub has_cycle: bool,
    pub cycle_path: Option<Vec<String>>,
}

/// Order nodes so that every node appears after all of its predecessors.
///
/// Isolated nodes are included exactly once. Order among mutually-unordered
/// nodes follows definition order, keeping fixtures reproducible across
/// calls with identical input. Fails with `GraphError::Cycle` (carrying a
/// recovered path) when the connection set is cyclic, and with
/// `GraphError::UnknownNode` when a connection names a node that is not in
/// the workflow.
pub fn sorted_nodes(nodes: &[Node], connections: &[Connection]) -> Result<Vec<Node>, GraphError> {
    let (graph, _) = build_graph(nodes, connections)?;

    let order = toposort(&graph, None).map_err(|_| {
        let path = find_cycle_path(nodes, connections).unwrap_or_default();
        GraphError::Cycle { path }
    })?;

    Ok(order
        .iter()
        .map(|&index| nodes[graph[index]].clone())
        .collect())
}

/// Determine whether the graph is acyclic; on failure, recover one
/// offending cycle for user-facing diagnostics.
///
/// Connections with unknown endpoints are ignored here (they are rejected
/// separately at compile time), so the pass terminates on any input,
/// including graphs with disconnected components. Isolated nodes are never
/// reported as cycles.
pub fn detect_cycle(nodes: &[Node], connections: &[Connection]) -> CycleReport {
    let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let usable: Vec<&Connection> = connections
        .iter()
        .filter(|c| known.contains(c.from_node_id.as_str()) && known.contains(c.to_node_id.as_str()))
        .collect();

    let mut graph = DiGraph::<usize, ()>::new();
    let mut indices = HashMap::new();
    for (position, node) in nodes.iter().enumerate() {
        let index = graph.add_node(position);
        indices.insert(node.id.as_str(), index);
    }
    for connection in &usable {
        graph.add_edge(
            indices[connection.from_node_id.as_str()],
            indices[connection.to_node_id.as_str()],
            (),
        );
    }

    if toposort(&graph, None).is_ok() {
        return CycleReport {
            has_cycle: false,
            cycle_path: None,
        };
    }

    CycleReport {
        has_cycle: true,
        cycle_path: find_cycle_path(nodes, connections),
    }
}

/// Pre-built adjacency indexes for one execution.
///
/// The orchestrator consults `outgoing` after every node to activate the
/// frontier and `incoming` to find zero-indegree nodes for the legacy
/// trigger fallback.
#[derive(Debug, Default)]
pub struct AdjacencyIndex {
    outgoing: HashMap<String, Vec<Connection>>,
    incoming: HashMap<String, Vec<Connection>>,
}

impl AdjacencyIndex {
    pub fn build(connections: &[Connection]) -> Self {
        let mut index = AdjacencyIndex::default();
        for connection in connections {
            index
                .outgoing
                .entry(connection.from_node_id.clone())
                .or_default()
                .push(connection.clone());
            index
                .incoming
                .entry(connection.to_node_id.clone())
                .or_default()
                .push(connection.clone());
        }
        index
    }

    pub fn outgoing(&self, node_id: &str) -> &[Connection] {
        self.outgoing.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn indegree(&self, node_id: &str) -> usize {
        self.incoming.get(node_id).map(Vec::len).unwrap_or(0)
    }

    /// Count of distinct named output ports used by a node's connections.
    pub fn distinct_output_ports(&self, node_id: &str) -> usize {
        let mut ports: Vec<&str> = self
            .outgoing(node_id)
            .iter()
            .map(|c| c.from_output.as_str())
            .collect();
        ports.sort_unstable();
        ports.dedup();
        ports.len()
    }
}

fn build_graph<'a>(
    nodes: &'a [Node],
    connections: &[Connection],
) -> Result<(DiGraph<usize, ()>, HashMap<&'a str, NodeIndex>), GraphError> {
    let mut graph = DiGraph::new();
    let mut indices = HashMap::new();

    for (position, node) in nodes.iter().enumerate() {
        let index = graph.add_node(position);
        indices.insert(node.id.as_str(), index);
    }

    for connection in connections {
        let from = *indices
            .get(connection.from_node_id.as_str())
            .ok_or_else(|| GraphError::UnknownNode {
                node_id: connection.from_node_id.clone(),
            })?;
        let to = *indices
            .get(connection.to_node_id.as_str())
            .ok_or_else(|| GraphError::UnknownNode {
                node_id: connection.to_node_id.clone(),
            })?;
        graph.add_edge(from, to, ());
    }

    Ok((graph, indices))
}

/// Depth-first search with a recursion stack, recovering one concrete
/// cycle as a closed walk. Roots are visited in definition order so the
/// recovered path is deterministic.
fn find_cycle_path(nodes: &[Node], connections: &[Connection]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for connection in connections {
        if known.contains(connection.from_node_id.as_str())
            && known.contains(connection.to_node_id.as_str())
        {
            adjacency
                .entry(connection.from_node_id.as_str())
                .or_default()
                .push(connection.to_node_id.as_str());
        }
    }

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        colors: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        colors.insert(node, Color::Grey);
        stack.push(node);

        if let Some(successors) = adjacency.get(node) {
            for &next in successors {
                match colors.get(next).copied().unwrap_or(Color::White) {
                    Color::Grey => {
                        // Close the walk from the first occurrence of `next`.
                        let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|n| n.to_string()).collect();
                        cycle.push(next.to_string());
                        return Some(cycle);
                    }
                    Color::White => {
                        if let Some(cycle) = visit(next, adjacency, colors, stack) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }
        }

        stack.pop();
        colors.insert(node, Color::Black);
        None
    }

    let mut colors = HashMap::new();
    let mut stack = Vec::new();
    for node in nodes {
        if colors.get(node.id.as_str()).copied().unwrap_or(Color::White) == Color::White {
            if let Some(cycle) = visit(node.id.as_str(), &adjacency, &mut colors, &mut stack) {
                return Some(cycle);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type: "set_variable".to_string(),
            data: json!({}),
        }
    }

    fn connection(from: &str, to: &str) -> Connection {
        Connection {
            from_node_id: from.to_string(),
            to_node_id: to.to_string(),
            from_output: crate::workflow::types::DEFAULT_OUTPUT.to_string(),
            to_input: None,
        }
    }

    #[test]
    fn sort_respects_predecessors() {
        let nodes = vec![node("c"), node("a"), node("b")];
        let connections = vec![connection("a", "b"), connection("b", "c")];

        let sorted = sorted_nodes(&nodes, &connections).unwrap();
        let order: Vec<&str> = sorted.iter().map(|n| n.id.as_str()).collect();

        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn sort_includes_every_node_exactly_once() {
        let nodes = vec![node("a"), node("b"), node("isolated"), node("c")];
        let connections = vec![connection("a", "b"), connection("b", "c")];

        let sorted = sorted_nodes(&nodes, &connections).unwrap();
        let ids: HashSet<&str> = sorted.iter().map(|n| n.id.as_str()).collect();

        assert_eq!(sorted.len(), 4);
        assert_eq!(ids.len(), 4);
        assert!(ids.contains("isolated"));
    }

    #[test]
    fn sort_is_deterministic_across_calls() {
        let nodes = vec![node("x"), node("y"), node("z")];
        let connections = vec![connection("x", "z")];

        let first = sorted_nodes(&nodes, &connections).unwrap();
        let second = sorted_nodes(&nodes, &connections).unwrap();

        let first_ids: Vec<&str> = first.iter().map(|n| n.id.as_str()).collect();
        let second_ids: Vec<&str> = second.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn sort_fails_on_cycle_with_path() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let connections = vec![
            connection("a", "b"),
            connection("b", "c"),
            connection("c", "a"),
        ];

        let err = sorted_nodes(&nodes, &connections).unwrap_err();
        match err {
            GraphError::Cycle { path } => {
                assert_eq!(path.first(), path.last());
                assert!(path.len() >= 3);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn sort_rejects_unknown_node() {
        let nodes = vec![node("a")];
        let connections = vec![connection("a", "ghost")];

        let err = sorted_nodes(&nodes, &connections).unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode { node_id } if node_id == "ghost"));
    }

    #[test]
    fn detect_cycle_reports_closed_walk_from_input() {
        let nodes = vec![node("a"), node("b"), node("c"), node("d")];
        let connections = vec![
            connection("a", "b"),
            connection("b", "c"),
            connection("c", "b"),
            connection("a", "d"),
        ];

        let report = detect_cycle(&nodes, &connections);
        assert!(report.has_cycle);

        let path = report.cycle_path.unwrap();
        assert_eq!(path.first(), path.last());
        let input_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        for id in &path {
            assert!(input_ids.contains(id.as_str()));
        }
        // The actual loop is b -> c -> b.
        assert!(path.contains(&"b".to_string()));
        assert!(path.contains(&"c".to_string()));
    }

    #[test]
    fn detect_cycle_handles_disconnected_components() {
        let nodes = vec![node("a"), node("b"), node("lone"), node("x"), node("y")];
        let connections = vec![
            connection("a", "b"),
            connection("x", "y"),
            connection("y", "x"),
        ];

        let report = detect_cycle(&nodes, &connections);
        assert!(report.has_cycle);
        let path = report.cycle_path.unwrap();
        assert!(!path.contains(&"lone".to_string()));
    }

    #[test]
    fn detect_cycle_never_reports_isolated_nodes() {
        let nodes = vec![node("only"), node("pair")];
        let connections = vec![connection("only", "pair")];

        let report = detect_cycle(&nodes, &connections);
        assert!(!report.has_cycle);
        assert!(report.cycle_path.is_none());
    }

    #[test]
    fn adjacency_index_counts_ports_and_indegree() {
        let mut branch_true = connection("f", "b");
        branch_true.from_output = "true".to_string();
        let mut branch_false = connection("f", "c");
        branch_false.from_output = "false".to_string();
        let connections = vec![branch_true, branch_false, connection("b", "d"), connection("c", "d")];

        let index = AdjacencyIndex::build(&connections);
        assert_eq!(index.distinct_output_ports("f"), 2);
        assert_eq!(index.distinct_output_ports("b"), 1);
        assert_eq!(index.indegree("d"), 2);
        assert_eq!(index.indegree("f"), 0);
        assert_eq!(index.outgoing("f").len(), 2);
    }
}
