use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use agentflow_core::types::PortSpec;

/// Config key under which a condition node keeps its branch descriptors.
pub const BRANCHES_KEY: &str = "branches";

/// A named port with the id generated for it when its node was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub id: String,
}

/// One end of a connection: a node and one of its port ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub node: String,
    pub port: String,
}

/// A conditional successor rule attached to a `condition` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDescriptor {
    pub condition: String,
    pub target: String,
}

/// A node in the graph.
///
/// Port ids are generated once at creation so wires can be resolved by port
/// identity even when several nodes of the same kind share port names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: String,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
    /// Kind-specific configuration payload.
    #[serde(default)]
    pub config: Value,
}

impl Node {
    /// Create a node, generating a fresh id for every declared port.
    pub fn new(id: impl Into<String>, kind: impl Into<String>, ports: &PortSpec) -> Self {
        let make = |names: &[String]| -> Vec<Port> {
            names
                .iter()
                .map(|name| Port {
                    name: name.clone(),
                    id: Uuid::new_v4().to_string(),
                })
                .collect()
        };
        Self {
            id: id.into(),
            kind: kind.into(),
            inputs: make(&ports.inputs),
            outputs: make(&ports.outputs),
            config: Value::Null,
        }
    }

    /// Set the configuration payload.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn input_id(&self, name: &str) -> Option<&str> {
        find_id(&self.inputs, name)
    }

    pub fn output_id(&self, name: &str) -> Option<&str> {
        find_id(&self.outputs, name)
    }

    pub fn input_name(&self, id: &str) -> Option<&str> {
        find_name(&self.inputs, id)
    }

    pub fn output_name(&self, id: &str) -> Option<&str> {
        find_name(&self.outputs, id)
    }

    /// Declared port names, in declaration order.
    pub fn port_spec(&self) -> PortSpec {
        PortSpec {
            inputs: self.inputs.iter().map(|p| p.name.clone()).collect(),
            outputs: self.outputs.iter().map(|p| p.name.clone()).collect(),
        }
    }

    /// Branch descriptors recorded on this node, in declaration order.
    /// Malformed entries are skipped.
    pub fn branches(&self) -> Vec<BranchDescriptor> {
        self.config
            .get(BRANCHES_KEY)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append a branch descriptor, creating the branch list if absent.
    ///
    /// A non-object payload is replaced by an object so the list has somewhere
    /// to live; a bare expression string is preserved under `expression`.
    pub fn push_branch(&mut self, branch: BranchDescriptor) {
        if !self.config.is_object() {
            let previous = std::mem::take(&mut self.config);
            let mut map = serde_json::Map::new();
            if !previous.is_null() {
                map.insert("expression".into(), previous);
            }
            self.config = Value::Object(map);
        }
        if let Value::Object(map) = &mut self.config {
            let list = map
                .entry(BRANCHES_KEY)
                .or_insert_with(|| Value::Array(Vec::new()));
            if !list.is_array() {
                *list = Value::Array(Vec::new());
            }
            if let Value::Array(items) = list {
                items.push(serde_json::json!({
                    "condition": branch.condition,
                    "target": branch.target,
                }));
            }
        }
    }
}

fn find_id<'a>(ports: &'a [Port], name: &str) -> Option<&'a str> {
    ports.iter().find(|p| p.name == name).map(|p| p.id.as_str())
}

fn find_name<'a>(ports: &'a [Port], id: &str) -> Option<&'a str> {
    ports.iter().find(|p| p.id == id).map(|p| p.name.as_str())
}
