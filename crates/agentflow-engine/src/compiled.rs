use std::collections::{HashMap, VecDeque};

use agentflow_core::error::{FlowError, Result};

use crate::builder::Connection;
use crate::node::{Node, PortRef};

/// Immutable, query-optimised view of a built graph.
///
/// Holds forward adjacency (distinct successors per node, in first-wired
/// order) and a reverse index from each input port id to the upstream port
/// feeding it. No cycle check happens here; see [`CompiledGraph::validate_acyclic`].
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    connections: Vec<Connection>,
    adjacency: HashMap<String, Vec<String>>,
    reverse: HashMap<String, HashMap<String, PortRef>>,
    in_degree: HashMap<String, usize>,
}

impl CompiledGraph {
    pub fn new(nodes: Vec<Node>, connections: Vec<Connection>) -> Self {
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let mut adjacency: HashMap<String, Vec<String>> =
            nodes.iter().map(|n| (n.id.clone(), Vec::new())).collect();
        let mut reverse: HashMap<String, HashMap<String, PortRef>> =
            nodes.iter().map(|n| (n.id.clone(), HashMap::new())).collect();

        for conn in &connections {
            if !index.contains_key(&conn.from.node) || !index.contains_key(&conn.to.node) {
                continue;
            }
            let successors = adjacency.entry(conn.from.node.clone()).or_default();
            if !successors.contains(&conn.to.node) {
                successors.push(conn.to.node.clone());
            }
            reverse
                .entry(conn.to.node.clone())
                .or_default()
                .insert(conn.to.port.clone(), conn.from.clone());
        }

        let mut in_degree: HashMap<String, usize> =
            nodes.iter().map(|n| (n.id.clone(), 0)).collect();
        for successors in adjacency.values() {
            for succ in successors {
                if let Some(d) = in_degree.get_mut(succ) {
                    *d += 1;
                }
            }
        }

        Self {
            nodes,
            index,
            connections,
            adjacency,
            reverse,
            in_degree,
        }
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Reverse map of a node's input port ids to the upstream port feeding each.
    pub fn get_node_inputs(&self, id: &str) -> Option<&HashMap<String, PortRef>> {
        self.reverse.get(id)
    }

    /// Upstream producer for one input port of a node.
    pub fn upstream(&self, node_id: &str, input_port_id: &str) -> Option<&PortRef> {
        self.reverse.get(node_id).and_then(|m| m.get(input_port_id))
    }

    /// Distinct successor node ids; empty for sinks and unknown ids.
    pub fn get_next_nodes(&self, id: &str) -> &[String] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All node ids in insertion order.
    pub fn get_all_node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// Node ids with no inbound connection, in insertion order.
    pub fn get_entry_nodes(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| self.in_degree(&n.id) == 0)
            .map(|n| n.id.clone())
            .collect()
    }

    /// Number of distinct upstream nodes wired into `id`.
    pub fn in_degree(&self, id: &str) -> usize {
        self.in_degree.get(id).copied().unwrap_or(0)
    }

    pub(crate) fn in_degrees(&self) -> HashMap<String, usize> {
        self.in_degree.clone()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Kahn's algorithm over the adjacency lists.
    ///
    /// Returns [`FlowError::CycleDetected`] with every node that could never be
    /// scheduled by in-degree alone (the nodes on, or downstream of, a cycle).
    pub fn validate_acyclic(&self) -> Result<()> {
        let mut remaining = self.in_degrees();
        let mut queue: VecDeque<String> = self.get_entry_nodes().into();
        let mut visited = 0;

        while let Some(id) = queue.pop_front() {
            visited += 1;
            for succ in self.get_next_nodes(&id) {
                if let Some(d) = remaining.get_mut(succ) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(succ.clone());
                    }
                }
            }
        }

        if visited == self.nodes.len() {
            return Ok(());
        }

        let stuck = self
            .nodes
            .iter()
            .filter(|n| remaining.get(&n.id).copied().unwrap_or(0) > 0)
            .map(|n| n.id.clone())
            .collect();
        Err(FlowError::CycleDetected(stuck))
    }
}
