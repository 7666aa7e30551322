use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named values flowing into a node invocation, keyed by input port name.
/// A port with no upstream producer is simply absent from the map.
pub type NodeInputs = HashMap<String, serde_json::Value>;

/// Named values produced by one node invocation, keyed by output port name.
pub type NodeOutputs = HashMap<String, serde_json::Value>;

/// Result map of a whole run: node id -> that node's outputs.
pub type RunResults = HashMap<String, NodeOutputs>;

/// Unique identifier for one `execute` call.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared port shape of a node kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl PortSpec {
    pub fn new<I, O>(inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
        }
    }

    /// The single-`input`, single-`output` shape shared by the built-in kinds.
    pub fn unary() -> Self {
        Self::new(["input"], ["output"])
    }

    /// No inputs, one `output`.
    pub fn source() -> Self {
        Self::new(Vec::<String>::new(), ["output"])
    }
}

/// Events emitted by the engine while a run is in progress.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A run started with the given entry frontier.
    RunStarted {
        run_id: RunId,
        entry_nodes: Vec<String>,
        started_at: DateTime<Utc>,
    },
    /// A node processor is about to be invoked.
    NodeStarted { run_id: RunId, node_id: String, kind: String, wave: usize },
    /// A node processor returned successfully.
    NodeCompleted { run_id: RunId, node_id: String, elapsed_ms: u64 },
    /// A condition node selected a branch target.
    BranchTaken { run_id: RunId, node_id: String, condition: String, target: String },
    /// A condition node matched none of its branches.
    BranchUnmatched { run_id: RunId, node_id: String },
    /// The run finished; some nodes may never have become ready.
    RunCompleted { run_id: RunId, nodes_run: usize, elapsed_ms: u64 },
    /// A processor error aborted the run.
    RunFailed { run_id: RunId, node_id: String, error: String },
}
