use loomcore::{NodeSpec, WorkflowError, WorkflowGraph};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Linear execution order for a workflow graph.
///
/// Every connection's source precedes its target. Among nodes that are ready
/// at the same time the one listed first in the graph goes first, so nodes
/// without connections keep their input order. Self connections impose no
/// ordering. A cycle among the remaining connections fails the whole sort.
pub fn topological_order(graph: &WorkflowGraph) -> Result<Vec<&NodeSpec>, WorkflowError> {
    graph.validate()?;

    if graph.connections.is_empty() {
        return Ok(graph.nodes.iter().collect());
    }

    let dag = build_dependency_graph(graph)?;

    // Check for cycles
    if let Err(cycle) = toposort(&dag, None) {
        let position = dag[cycle.node_id()];
        return Err(WorkflowError::CyclicDependency {
            node_id: graph.nodes[position].id.clone(),
        });
    }

    // Kahn's algorithm, always taking the lowest-positioned ready node
    let mut in_degree: Vec<usize> = dag
        .node_indices()
        .map(|idx| dag.edges_directed(idx, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(position, _)| Reverse(position))
        .collect();

    let mut order = Vec::with_capacity(graph.nodes.len());
    while let Some(Reverse(position)) = ready.pop() {
        order.push(&graph.nodes[position]);

        for edge in dag.edges_directed(NodeIndex::new(position), Direction::Outgoing) {
            let target = edge.target().index();
            in_degree[target] -= 1;
            if in_degree[target] == 0 {
                ready.push(Reverse(target));
            }
        }
    }

    Ok(order)
}

/// Build a dependency graph whose node weights are input positions
fn build_dependency_graph(graph: &WorkflowGraph) -> Result<DiGraph<usize, ()>, WorkflowError> {
    let mut dag = DiGraph::with_capacity(graph.nodes.len(), graph.connections.len());
    let mut node_to_index = HashMap::with_capacity(graph.nodes.len());

    for (position, node) in graph.nodes.iter().enumerate() {
        let idx = dag.add_node(position);
        node_to_index.insert(node.id.as_str(), idx);
    }

    for conn in &graph.connections {
        if conn.is_self_loop() {
            continue;
        }

        let lookup = |id: &str| {
            node_to_index
                .get(id)
                .copied()
                .ok_or_else(|| WorkflowError::InvalidConnection {
                    from: conn.from_node_id.clone(),
                    to: conn.to_node_id.clone(),
                    missing: id.to_string(),
                })
        };
        let from_idx = lookup(&conn.from_node_id)?;
        let to_idx = lookup(&conn.to_node_id)?;

        dag.add_edge(from_idx, to_idx, ());
    }

    Ok(dag)
}
