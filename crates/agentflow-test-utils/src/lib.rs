//! Processors and fixtures shared by agentflow tests.
//!
//! Processors here find out which node they run for through a `label` field
//! in the node config, since a processor is registered per kind, not per node.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use agentflow_core::context::ExecutionContext;
use agentflow_core::error::{FlowError, Result};
use agentflow_core::traits::NodeProcessor;
use agentflow_core::types::{NodeInputs, NodeOutputs};

/// Label a test processor reports for a node.
pub fn label(config: &Value) -> String {
    config
        .get("label")
        .and_then(Value::as_str)
        .unwrap_or("unlabelled")
        .to_string()
}

/// Config payload carrying only a label.
pub fn labelled(name: &str) -> Value {
    json!({ "label": name })
}

/// Order and inputs of processor invocations, shared across clones.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<(String, NodeInputs)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, label: String, inputs: NodeInputs) {
        self.calls.lock().unwrap().push((label, inputs));
    }

    /// Labels in invocation order.
    pub fn order(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(l, _)| l.clone()).collect()
    }

    /// Inputs seen by the first invocation with `label`.
    pub fn inputs_of(&self, label: &str) -> Option<NodeInputs> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, inputs)| inputs.clone())
    }

    /// How many times `label` ran.
    pub fn count(&self, label: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(l, _)| l == label).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

/// Records each call and emits `{"output": <label>, "inputs": {...}}`.
///
/// With an `emit` object in the config, that object becomes the outputs instead.
pub struct RecordingProcessor {
    recorder: Recorder,
}

impl RecordingProcessor {
    pub fn new(recorder: Recorder) -> Self {
        Self { recorder }
    }
}

impl NodeProcessor for RecordingProcessor {
    fn process(
        &self,
        inputs: NodeInputs,
        _ctx: ExecutionContext,
        config: Value,
    ) -> BoxFuture<'_, Result<NodeOutputs>> {
        Box::pin(async move {
            let name = label(&config);
            self.recorder.record(name.clone(), inputs.clone());
            if let Some(Value::Object(emit)) = config.get("emit") {
                return Ok(emit.clone().into_iter().collect());
            }
            let seen: serde_json::Map<String, Value> = inputs.into_iter().collect();
            Ok(HashMap::from([
                ("output".to_string(), Value::String(name)),
                ("inputs".to_string(), Value::Object(seen)),
            ]))
        })
    }
}

/// Always fails with [`FlowError::Processor`].
pub struct FailingProcessor {
    message: String,
}

impl FailingProcessor {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl NodeProcessor for FailingProcessor {
    fn process(
        &self,
        _inputs: NodeInputs,
        _ctx: ExecutionContext,
        config: Value,
    ) -> BoxFuture<'_, Result<NodeOutputs>> {
        Box::pin(async move {
            Err(FlowError::Processor {
                node: label(&config),
                message: self.message.clone(),
            })
        })
    }
}

/// Writes `config.value` to the context under `config.key` and echoes it.
pub struct ContextWriter;

impl NodeProcessor for ContextWriter {
    fn process(
        &self,
        _inputs: NodeInputs,
        ctx: ExecutionContext,
        config: Value,
    ) -> BoxFuture<'_, Result<NodeOutputs>> {
        Box::pin(async move {
            let key = config.get("key").and_then(Value::as_str).unwrap_or("key");
            let value = config.get("value").cloned().unwrap_or(Value::Null);
            ctx.set(key, value.clone());
            Ok(HashMap::from([("output".to_string(), value)]))
        })
    }
}

/// Emits the context value stored under `config.key`, or null.
pub struct ContextReader;

impl NodeProcessor for ContextReader {
    fn process(
        &self,
        _inputs: NodeInputs,
        ctx: ExecutionContext,
        config: Value,
    ) -> BoxFuture<'_, Result<NodeOutputs>> {
        Box::pin(async move {
            let key = config.get("key").and_then(Value::as_str).unwrap_or("key");
            let value = ctx.get(key).unwrap_or(Value::Null);
            Ok(HashMap::from([("output".to_string(), value)]))
        })
    }
}

/// Sleeps `config.ms` milliseconds, then passes `input` through.
pub struct DelayProcessor;

impl NodeProcessor for DelayProcessor {
    fn process(
        &self,
        inputs: NodeInputs,
        _ctx: ExecutionContext,
        config: Value,
    ) -> BoxFuture<'_, Result<NodeOutputs>> {
        Box::pin(async move {
            let ms = config.get("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let value = inputs.get("input").cloned().unwrap_or(Value::Null);
            Ok(HashMap::from([("output".to_string(), value)]))
        })
    }
}
