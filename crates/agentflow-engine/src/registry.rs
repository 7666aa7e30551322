use std::collections::HashMap;
use std::sync::Arc;

use agentflow_core::error::{FlowError, Result};
use agentflow_core::traits::NodeProcessor;
use agentflow_core::types::PortSpec;

use crate::builtin::{ConditionNode, ConstantNode, ExpressionNode};
use crate::builtin::{CONDITION_KIND, CONSTANT_KIND, EXPRESSION_KIND};
use crate::expression::ExpressionEvaluator;

/// Port-shape lookup by node kind, used when nodes are created from a kind name.
pub trait PortLookup {
    fn node_ports(&self, kind: &str) -> Result<PortSpec>;
}

impl PortLookup for HashMap<String, PortSpec> {
    fn node_ports(&self, kind: &str) -> Result<PortSpec> {
        self.get(kind)
            .cloned()
            .ok_or_else(|| FlowError::UnknownNodeKind(kind.to_string()))
    }
}

/// A registered node kind: its processor and declared ports.
#[derive(Clone)]
pub struct NodeType {
    pub processor: Arc<dyn NodeProcessor>,
    pub ports: PortSpec,
}

/// Registry of available node kinds.
pub struct NodeTypeRegistry {
    kinds: HashMap<String, NodeType>,
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Register a node kind. A later registration under the same name replaces the earlier one.
    pub fn register_node_type(
        &mut self,
        kind: impl Into<String>,
        processor: impl NodeProcessor,
        ports: PortSpec,
    ) {
        self.register_shared(kind, Arc::new(processor), ports);
    }

    /// Register an already shared processor.
    pub fn register_shared(
        &mut self,
        kind: impl Into<String>,
        processor: Arc<dyn NodeProcessor>,
        ports: PortSpec,
    ) {
        self.kinds
            .insert(kind.into(), NodeType { processor, ports });
    }

    /// Unregister a kind by name.
    pub fn unregister(&mut self, kind: &str) -> bool {
        self.kinds.remove(kind).is_some()
    }

    pub fn get(&self, kind: &str) -> Option<&NodeType> {
        self.kinds.get(kind)
    }

    /// Processor for a kind.
    pub fn processor(&self, kind: &str) -> Result<Arc<dyn NodeProcessor>> {
        self.kinds
            .get(kind)
            .map(|t| t.processor.clone())
            .ok_or_else(|| FlowError::UnknownNodeKind(kind.to_string()))
    }

    /// Declared ports for a kind.
    pub fn get_node_ports(&self, kind: &str) -> Result<&PortSpec> {
        self.kinds
            .get(kind)
            .map(|t| &t.ports)
            .ok_or_else(|| FlowError::UnknownNodeKind(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.kinds.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Create a registry seeded with the `constant`, `expression` and `condition` kinds.
    pub fn with_builtins(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        let mut registry = Self::new();
        registry.register_node_type(CONSTANT_KIND, ConstantNode, PortSpec::source());
        registry.register_node_type(
            EXPRESSION_KIND,
            ExpressionNode::new(evaluator.clone()),
            PortSpec::unary(),
        );
        registry.register_node_type(
            CONDITION_KIND,
            ConditionNode::new(evaluator),
            PortSpec::unary(),
        );
        registry
    }
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PortLookup for NodeTypeRegistry {
    fn node_ports(&self, kind: &str) -> Result<PortSpec> {
        self.get_node_ports(kind).cloned()
    }
}
