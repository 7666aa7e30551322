use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use agentflow_core::error::{FlowError, Result};
use agentflow_core::types::PortSpec;

use crate::builtin::CONDITION_KIND;
use crate::compiled::CompiledGraph;
use crate::node::{BranchDescriptor, Node, PortRef};
use crate::registry::PortLookup;

/// A directed wire from one node's output port to another node's input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub from: PortRef,
    pub to: PortRef,
    /// Set when the wire was declared conditionally from a condition node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Mutable authoring structure for a graph.
///
/// Nodes keep their insertion order, which is also the order entry nodes are
/// scheduled in.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    connections: Vec<Connection>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node of `kind` with the given port shape.
    ///
    /// A random id is generated when `id` is `None`. Reusing an existing id is
    /// rejected with [`FlowError::DuplicateNode`].
    pub fn add_node(&mut self, kind: &str, ports: &PortSpec, id: Option<&str>) -> Result<String> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.index.contains_key(&id) {
            return Err(FlowError::DuplicateNode(id));
        }

        debug!(node_id = %id, kind, "Adding node");
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(Node::new(id.clone(), kind, ports));
        Ok(id)
    }

    /// Add a node whose port shape is looked up by kind.
    pub fn add_registered_node(
        &mut self,
        lookup: &impl PortLookup,
        kind: &str,
        id: Option<&str>,
    ) -> Result<String> {
        let ports = lookup.node_ports(kind)?;
        self.add_node(kind, &ports, id)
    }

    /// Replace a node's configuration payload.
    pub fn set_config(&mut self, node_id: &str, config: Value) -> Result<()> {
        let node = self.node_mut(node_id)?;
        node.config = config;
        Ok(())
    }

    /// Wire `from = (node, output port)` to `to = (node, input port)`.
    ///
    /// Unknown nodes fail with [`FlowError::NodeNotFound`]. An unknown port
    /// name on an existing node is logged and the wire is dropped without
    /// error. Every wire is kept for ordering, but an input port reads only
    /// from the last wire connected into it.
    ///
    /// When `condition` is given and the source is a `condition` node, a
    /// branch descriptor targeting `to.0` is appended to the source's config.
    pub fn connect(
        &mut self,
        from: (&str, &str),
        to: (&str, &str),
        condition: Option<&str>,
    ) -> Result<()> {
        let (from_node, from_port) = from;
        let (to_node, to_port) = to;

        let source = self.node(from_node)?;
        let target = self.node(to_node)?;

        let resolved = resolve_port(source.output_id(from_port), from_node, from_port).and_then(
            |out_id| {
                resolve_port(target.input_id(to_port), to_node, to_port).map(|in_id| (out_id, in_id))
            },
        );
        let (out_id, in_id) = match resolved {
            Ok(ids) => ids,
            Err(e) => {
                warn!(from = %from_node, to = %to_node, error = %e, "Dropping connection");
                return Ok(());
            }
        };

        let branch_condition = match condition {
            Some(cond) if source.kind == CONDITION_KIND => Some(cond.to_string()),
            Some(cond) => {
                debug!(
                    node_id = %from_node,
                    kind = %source.kind,
                    condition = cond,
                    "Condition ignored on non-condition node"
                );
                None
            }
            None => None,
        };

        let to_ref = PortRef {
            node: to_node.to_string(),
            port: in_id,
        };
        if self.connections.iter().any(|c| c.to == to_ref) {
            debug!(node_id = %to_node, port = to_port, "Input port already wired, new producer takes over its value");
        }
        self.connections.push(Connection {
            from: PortRef {
                node: from_node.to_string(),
                port: out_id,
            },
            to: to_ref,
            condition: branch_condition.clone(),
        });

        if let Some(condition) = branch_condition {
            self.node_mut(from_node)?.push_branch(BranchDescriptor {
                condition,
                target: to_node.to_string(),
            });
        }

        Ok(())
    }

    /// Snapshot the current nodes and connections into a run-time graph.
    pub fn compile(&self) -> CompiledGraph {
        CompiledGraph::new(self.nodes.clone(), self.connections.clone())
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
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

    fn node(&self, id: &str) -> Result<&Node> {
        self.get_node(id)
            .ok_or_else(|| FlowError::NodeNotFound(id.to_string()))
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.nodes[i]),
            None => Err(FlowError::NodeNotFound(id.to_string())),
        }
    }
}

fn resolve_port(id: Option<&str>, node: &str, port: &str) -> Result<String> {
    id.map(str::to_string).ok_or_else(|| FlowError::MissingPort {
        node: node.to_string(),
        port: port.to_string(),
    })
}
