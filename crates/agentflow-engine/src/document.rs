//! JSON interchange format for graphs.
//!
//! A document is a list of node records, each carrying its outgoing
//! connections:
//!
//! ```json
//! {"nodes": [
//!   {"id": "start", "type": "constant", "data": {"value": 5},
//!    "connections": [{"to": "double"}]},
//!   {"id": "double", "type": "expression", "data": {"expression": "input * 2"}}
//! ]}
//! ```
//!
//! `fromPort`/`toPort` default to `output`/`input`. Ports are referred to by
//! name, so a document stays valid even though port ids are regenerated on
//! every load.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use agentflow_core::error::{FlowError, Result};
use agentflow_core::types::PortSpec;

use crate::builder::GraphBuilder;
use crate::node::BRANCHES_KEY;
use crate::registry::PortLookup;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Declared port names. When omitted the shape is looked up by kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<ConnectionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub to: String,
    #[serde(default = "default_from_port")]
    pub from_port: String,
    #[serde(default = "default_to_port")]
    pub to_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

fn default_from_port() -> String {
    "output".to_string()
}

fn default_to_port() -> String {
    "input".to_string()
}

impl ConnectionRecord {
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            from_port: default_from_port(),
            to_port: default_to_port(),
            condition: None,
        }
    }
}

impl GraphDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Rebuild a graph. Nodes without explicit ports get theirs from `lookup`.
    ///
    /// All nodes are created before any wire, so connections may point
    /// forward. A connection to an id that is not in the document is skipped
    /// with a warning.
    pub fn to_builder(&self, lookup: &impl PortLookup) -> Result<GraphBuilder> {
        let mut graph = GraphBuilder::new();
        for record in &self.nodes {
            let ports = match &record.ports {
                Some(ports) => ports.clone(),
                None => lookup.node_ports(&record.kind)?,
            };
            graph.add_node(&record.kind, &ports, Some(&record.id))?;
            graph.set_config(&record.id, record.data.clone())?;
        }

        for record in &self.nodes {
            for conn in &record.connections {
                if graph.get_node(&conn.to).is_none() {
                    warn!(from = %record.id, to = %conn.to, "Skipping connection to unknown node");
                    continue;
                }
                graph.connect(
                    (&record.id, &conn.from_port),
                    (&conn.to, &conn.to_port),
                    conn.condition.as_deref(),
                )?;
            }
        }
        Ok(graph)
    }
}

impl GraphBuilder {
    /// Build a graph from an interchange document.
    pub fn from_document(doc: &GraphDocument, lookup: &impl PortLookup) -> Result<Self> {
        doc.to_builder(lookup)
    }

    /// Capture this graph as an interchange document.
    ///
    /// Branch lists are left out of `data`: the conditions on the emitted
    /// connections recreate them, in the same order, when the document is loaded.
    pub fn to_document(&self) -> Result<GraphDocument> {
        let mut nodes = Vec::with_capacity(self.len());
        for node in self.nodes() {
            let mut data = node.config.clone();
            if let Value::Object(map) = &mut data {
                map.remove(BRANCHES_KEY);
            }

            let mut connections = Vec::new();
            for conn in self.connections().iter().filter(|c| c.from.node == node.id) {
                let target = self
                    .get_node(&conn.to.node)
                    .ok_or_else(|| FlowError::NodeNotFound(conn.to.node.clone()))?;
                let from_port = node.output_name(&conn.from.port).ok_or_else(|| {
                    FlowError::MissingPort {
                        node: node.id.clone(),
                        port: conn.from.port.clone(),
                    }
                })?;
                let to_port = target.input_name(&conn.to.port).ok_or_else(|| {
                    FlowError::MissingPort {
                        node: target.id.clone(),
                        port: conn.to.port.clone(),
                    }
                })?;
                connections.push(ConnectionRecord {
                    to: target.id.clone(),
                    from_port: from_port.to_string(),
                    to_port: to_port.to_string(),
                    condition: conn.condition.clone(),
                });
            }

            nodes.push(NodeRecord {
                id: node.id.clone(),
                kind: node.kind.clone(),
                data,
                ports: Some(node.port_spec()),
                connections,
            });
        }
        Ok(GraphDocument { nodes })
    }
}
