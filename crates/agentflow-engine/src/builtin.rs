//! The three node kinds every registry starts with.
//!
//! - `constant`: no inputs, emits its configured value as `output`.
//! - `expression`: evaluates its configured expression over its inputs.
//! - `condition`: like `expression`, coerced to a boolean.
//!
//! None of them write to the execution context. Evaluation failures are logged
//! and degrade to `null` (expression) or `false` (condition) instead of
//! aborting the run.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::error;

use agentflow_core::context::ExecutionContext;
use agentflow_core::error::Result;
use agentflow_core::traits::NodeProcessor;
use agentflow_core::types::{NodeInputs, NodeOutputs, PortSpec};

use crate::builder::GraphBuilder;
use crate::expression::{is_truthy, ExpressionEvaluator, Scope};

pub const CONSTANT_KIND: &str = "constant";
pub const EXPRESSION_KIND: &str = "expression";
pub const CONDITION_KIND: &str = "condition";

/// Output port name used by every built-in kind.
pub const OUTPUT: &str = "output";

fn single_output(value: Value) -> NodeOutputs {
    NodeOutputs::from([(OUTPUT.to_string(), value)])
}

/// Emits `config.value`, or the whole config when it is not an object.
pub struct ConstantNode;

impl NodeProcessor for ConstantNode {
    fn process(
        &self,
        _inputs: NodeInputs,
        _ctx: ExecutionContext,
        config: Value,
    ) -> BoxFuture<'_, Result<NodeOutputs>> {
        Box::pin(async move {
            let value = match config {
                Value::Object(mut map) => map.remove("value").unwrap_or(Value::Null),
                other => other,
            };
            Ok(single_output(value))
        })
    }
}

/// The expression text of an expression/condition node.
///
/// Accepts either a bare string config or `{"expression": "..."}`; without
/// one, the node passes its `input` through.
fn expression_source(config: &Value) -> String {
    match config {
        Value::String(s) => s.clone(),
        other => other
            .get("expression")
            .and_then(Value::as_str)
            .unwrap_or("input")
            .to_string(),
    }
}

/// True when no input carries a value.
fn inputs_empty(inputs: &NodeInputs) -> bool {
    inputs.values().all(Value::is_null)
}

/// Variables visible to a node expression.
///
/// Each input port is bound by name, `inputs` holds them all as an object,
/// `context` is a detached snapshot of the run context, and `result` aliases
/// `input` so node and branch conditions can be written the same way.
fn node_scope(inputs: &NodeInputs, ctx: &ExecutionContext) -> Scope {
    let mut scope: Scope = inputs.clone().into_iter().collect();
    if let Some(input) = inputs.get("input") {
        scope
            .entry("result".to_string())
            .or_insert_with(|| input.clone());
    }
    scope.insert(
        "inputs".to_string(),
        Value::Object(inputs.clone().into_iter().collect()),
    );
    let context: serde_json::Map<String, Value> = ctx.snapshot().into_iter().collect();
    scope.insert("context".to_string(), Value::Object(context));
    scope
}

/// Evaluates a configured expression against its inputs.
pub struct ExpressionNode {
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl ExpressionNode {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self { evaluator }
    }
}

impl NodeProcessor for ExpressionNode {
    fn process(
        &self,
        inputs: NodeInputs,
        ctx: ExecutionContext,
        config: Value,
    ) -> BoxFuture<'_, Result<NodeOutputs>> {
        Box::pin(async move {
            if inputs_empty(&inputs) {
                return Ok(single_output(Value::Null));
            }
            let source = expression_source(&config);
            let scope = node_scope(&inputs, &ctx);
            let value = match self.evaluator.evaluate(&source, &scope) {
                Ok(value) => value,
                Err(e) => {
                    error!(expression = %source, error = %e, "Expression node evaluation failed");
                    Value::Null
                }
            };
            Ok(single_output(value))
        })
    }
}

/// Evaluates a configured expression and emits its truthiness.
pub struct ConditionNode {
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl ConditionNode {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self { evaluator }
    }
}

impl NodeProcessor for ConditionNode {
    fn process(
        &self,
        inputs: NodeInputs,
        ctx: ExecutionContext,
        config: Value,
    ) -> BoxFuture<'_, Result<NodeOutputs>> {
        Box::pin(async move {
            if inputs_empty(&inputs) {
                return Ok(single_output(Value::Bool(false)));
            }
            let source = expression_source(&config);
            let scope = node_scope(&inputs, &ctx);
            let passed = match self.evaluator.evaluate(&source, &scope) {
                Ok(value) => is_truthy(&value),
                Err(e) => {
                    error!(expression = %source, error = %e, "Condition node evaluation failed");
                    false
                }
            };
            Ok(single_output(Value::Bool(passed)))
        })
    }
}

impl GraphBuilder {
    /// Add a `constant` node emitting `value`.
    pub fn add_constant(&mut self, value: Value, id: Option<&str>) -> Result<String> {
        let id = self.add_node(CONSTANT_KIND, &PortSpec::source(), id)?;
        self.set_config(&id, json!({ "value": value }))?;
        Ok(id)
    }

    /// Add an `expression` node evaluating `expression`.
    pub fn add_expression(&mut self, expression: &str, id: Option<&str>) -> Result<String> {
        let id = self.add_node(EXPRESSION_KIND, &PortSpec::unary(), id)?;
        self.set_config(&id, json!({ "expression": expression }))?;
        Ok(id)
    }

    /// Add a `condition` node evaluating `expression`.
    pub fn add_condition(&mut self, expression: &str, id: Option<&str>) -> Result<String> {
        let id = self.add_node(CONDITION_KIND, &PortSpec::unary(), id)?;
        self.set_config(&id, json!({ "expression": expression }))?;
        Ok(id)
    }
}
