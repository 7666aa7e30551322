use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::try_join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use agentflow_core::config::{AppConfig, EngineConfig, WaveMode};
use agentflow_core::context::ExecutionContext;
use agentflow_core::error::{FlowError, Result};
use agentflow_core::event::EventBus;
use agentflow_core::traits::NodeProcessor;
use agentflow_core::types::{EngineEvent, NodeInputs, NodeOutputs, PortSpec, RunId, RunResults};

use crate::builtin::{CONDITION_KIND, OUTPUT};
use crate::compiled::CompiledGraph;
use crate::expression::{is_truthy, ExpressionEvaluator, Scope, SimpleEvaluator};
use crate::node::{BranchDescriptor, Node};
use crate::registry::NodeTypeRegistry;

/// Upper bound on scheduling rounds; only reachable when condition branches loop.
const MAX_WAVES: usize = 10_000;

/// Wave-by-wave scheduler for compiled graphs.
///
/// An engine owns its node-type registry and is reusable: every call to
/// [`Engine::execute`] starts from empty results and a fresh context.
pub struct Engine {
    registry: NodeTypeRegistry,
    evaluator: Arc<dyn ExpressionEvaluator>,
    config: EngineConfig,
    event_bus: Arc<EventBus>,
    results: RunResults,
}

impl Engine {
    /// Create an engine with default configuration and the built-in kinds.
    pub fn new() -> Self {
        Self::from_config(&AppConfig::default())
    }

    /// Create an engine from application config, using the default evaluator.
    pub fn from_config(config: &AppConfig) -> Self {
        let evaluator: Arc<dyn ExpressionEvaluator> =
            Arc::new(SimpleEvaluator::new(&config.expression));
        Self::with_evaluator(config.engine.clone(), evaluator)
    }

    /// Create an engine with a custom expression evaluator.
    ///
    /// The evaluator backs both the built-in expression kinds and branch conditions.
    pub fn with_evaluator(config: EngineConfig, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self {
            registry: NodeTypeRegistry::with_builtins(evaluator.clone()),
            event_bus: Arc::new(EventBus::new(config.event_capacity)),
            evaluator,
            config,
            results: RunResults::new(),
        }
    }

    /// Register a node kind on this engine. Last registration for a kind wins.
    pub fn register_node_type(
        &mut self,
        kind: impl Into<String>,
        processor: impl NodeProcessor,
        ports: PortSpec,
    ) {
        self.registry.register_node_type(kind, processor, ports);
    }

    pub fn registry(&self) -> &NodeTypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut NodeTypeRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// Results of the last successful run.
    pub fn results(&self) -> &RunResults {
        &self.results
    }

    /// Run a compiled graph with an empty context.
    pub async fn execute(&mut self, graph: &CompiledGraph) -> Result<RunResults> {
        self.execute_with_context(graph, HashMap::new()).await
    }

    /// Run a compiled graph, seeding the run context with `seed`.
    ///
    /// Returns every executed node's outputs. The first processor error aborts
    /// the run, discards partial results, and is returned unchanged.
    pub async fn execute_with_context(
        &mut self,
        graph: &CompiledGraph,
        seed: HashMap<String, Value>,
    ) -> Result<RunResults> {
        self.results.clear();

        if self.config.reject_cycles {
            graph.validate_acyclic()?;
        }

        let run_id = RunId::new();
        let ctx = ExecutionContext::from_map(seed);
        let start = Instant::now();

        match self.run(graph, &ctx, &run_id).await {
            Ok(()) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                info!(
                    run_id = %run_id,
                    nodes_run = self.results.len(),
                    nodes_total = graph.len(),
                    elapsed_ms,
                    "Graph run complete"
                );
                self.event_bus.publish(EngineEvent::RunCompleted {
                    run_id,
                    nodes_run: self.results.len(),
                    elapsed_ms,
                });
                Ok(self.results.clone())
            }
            Err((node_id, e)) => {
                error!(run_id = %run_id, node_id = %node_id, error = %e, "Graph run failed");
                self.event_bus.publish(EngineEvent::RunFailed {
                    run_id,
                    node_id,
                    error: e.to_string(),
                });
                self.results.clear();
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        graph: &CompiledGraph,
        ctx: &ExecutionContext,
        run_id: &RunId,
    ) -> std::result::Result<(), (String, FlowError)> {
        let mut remaining = graph.in_degrees();
        let mut frontier = graph.get_entry_nodes();

        info!(run_id = %run_id, entry_nodes = ?frontier, wave_mode = ?self.config.wave_mode, "Starting graph run");
        self.event_bus.publish(EngineEvent::RunStarted {
            run_id: run_id.clone(),
            entry_nodes: frontier.clone(),
            started_at: Utc::now(),
        });

        let mut wave = 0;
        while !frontier.is_empty() {
            if wave >= MAX_WAVES {
                warn!(run_id = %run_id, waves = wave, "Wave limit reached, terminating graph run");
                break;
            }
            debug!(run_id = %run_id, wave, frontier = ?frontier, "Executing wave");

            let mut next = Vec::new();
            match self.config.wave_mode {
                WaveMode::Sequential => {
                    for node_id in &frontier {
                        let outputs = self
                            .invoke(graph, node_id, ctx, run_id, wave)
                            .await
                            .map_err(|e| (node_id.clone(), e))?;
                        self.complete(graph, node_id, outputs, &mut remaining, &mut next, run_id);
                    }
                }
                WaveMode::Concurrent => {
                    let this = &*self;
                    let invocations = frontier.iter().map(|node_id| async move {
                        this.invoke(graph, node_id, ctx, run_id, wave)
                            .await
                            .map_err(|e| (node_id.clone(), e))
                    });
                    let outputs = try_join_all(invocations).await?;
                    for (node_id, outputs) in frontier.iter().zip(outputs) {
                        self.complete(graph, node_id, outputs, &mut remaining, &mut next, run_id);
                    }
                }
            }

            frontier = next;
            wave += 1;
        }

        let unreached = graph.len().saturating_sub(self.results.len());
        if unreached > 0 {
            debug!(run_id = %run_id, unreached, "Some nodes never became ready");
        }
        Ok(())
    }

    /// Gather inputs for one node and run its processor.
    async fn invoke(
        &self,
        graph: &CompiledGraph,
        node_id: &str,
        ctx: &ExecutionContext,
        run_id: &RunId,
        wave: usize,
    ) -> Result<NodeOutputs> {
        let node = graph
            .get_node(node_id)
            .ok_or_else(|| FlowError::NodeNotFound(node_id.to_string()))?;
        let inputs = self.gather_inputs(graph, node);
        let processor = self.registry.processor(&node.kind)?;

        debug!(node_id = %node.id, kind = %node.kind, inputs = inputs.len(), "Invoking node");
        self.event_bus.publish(EngineEvent::NodeStarted {
            run_id: run_id.clone(),
            node_id: node.id.clone(),
            kind: node.kind.clone(),
            wave,
        });

        let start = Instant::now();
        let outputs = processor
            .process(inputs, ctx.clone(), node.config.clone())
            .await?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        debug!(node_id = %node.id, elapsed_ms, "Node execution complete");
        self.event_bus.publish(EngineEvent::NodeCompleted {
            run_id: run_id.clone(),
            node_id: node.id.clone(),
            elapsed_ms,
        });
        Ok(outputs)
    }

    /// Read each declared input from the stored result of its upstream producer.
    ///
    /// The producer's output is looked up by the name of the port the wire
    /// leaves from. Unwired inputs, and producers that did not emit that
    /// output, leave the input absent.
    fn gather_inputs(&self, graph: &CompiledGraph, node: &Node) -> NodeInputs {
        let mut inputs = NodeInputs::new();
        for port in &node.inputs {
            let Some(upstream) = graph.upstream(&node.id, &port.id) else {
                continue;
            };
            let value = graph
                .get_node(&upstream.node)
                .and_then(|producer| producer.output_name(&upstream.port))
                .and_then(|name| {
                    self.results
                        .get(&upstream.node)
                        .and_then(|outputs| outputs.get(name))
                });
            if let Some(value) = value {
                inputs.insert(port.name.clone(), value.clone());
            }
        }
        inputs
    }

    /// Store a node's outputs and push its ready successors onto `next`.
    fn complete(
        &mut self,
        graph: &CompiledGraph,
        node_id: &str,
        outputs: NodeOutputs,
        remaining: &mut HashMap<String, usize>,
        next: &mut Vec<String>,
        run_id: &RunId,
    ) {
        let branches = graph
            .get_node(node_id)
            .filter(|n| n.kind == CONDITION_KIND)
            .map(Node::branches)
            .unwrap_or_default();

        if branches.is_empty() {
            for succ in graph.get_next_nodes(node_id) {
                if let Some(count) = remaining.get_mut(succ) {
                    if *count == 0 {
                        continue;
                    }
                    *count -= 1;
                    if *count == 0 {
                        push_unique(next, succ);
                    }
                }
            }
        } else {
            let result = outputs.get(OUTPUT).cloned().unwrap_or(Value::Null);
            match self.select_branch(&branches, &result) {
                Some(branch) => {
                    debug!(node_id, condition = %branch.condition, target = %branch.target, "Branch taken");
                    self.event_bus.publish(EngineEvent::BranchTaken {
                        run_id: run_id.clone(),
                        node_id: node_id.to_string(),
                        condition: branch.condition.clone(),
                        target: branch.target.clone(),
                    });
                    push_unique(next, &branch.target);
                }
                None => {
                    debug!(node_id, result = %result, "No branch matched, path ends");
                    self.event_bus.publish(EngineEvent::BranchUnmatched {
                        run_id: run_id.clone(),
                        node_id: node_id.to_string(),
                    });
                }
            }
        }

        self.results.insert(node_id.to_string(), outputs);
    }

    /// First branch whose condition holds for `result`, in declaration order.
    ///
    /// `result` is bound as a variable. A condition that never mentions it is
    /// taken only when it evaluates to exactly `true`. Evaluation errors count
    /// as a non-match.
    fn select_branch<'a>(
        &self,
        branches: &'a [BranchDescriptor],
        result: &Value,
    ) -> Option<&'a BranchDescriptor> {
        let scope: Scope = HashMap::from([("result".to_string(), result.clone())]);
        branches.iter().find(|branch| {
            match self.evaluator.evaluate(&branch.condition, &scope) {
                Ok(value) if self.evaluator.mentions(&branch.condition, "result") => {
                    is_truthy(&value)
                }
                Ok(value) => value == Value::Bool(true),
                Err(e) => {
                    warn!(condition = %branch.condition, error = %e, "Branch condition evaluation failed");
                    false
                }
            }
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn push_unique(frontier: &mut Vec<String>, id: &str) {
    if !frontier.iter().any(|existing| existing == id) {
        frontier.push(id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use agentflow_test_utils::{
        labelled, ContextReader, ContextWriter, DelayProcessor, FailingProcessor, Recorder,
        RecordingProcessor,
    };
    use serde_json::json;

    fn engine_with(recorder: &Recorder) -> Engine {
        let mut engine = Engine::new();
        engine.register_node_type(
            "record",
            RecordingProcessor::new(recorder.clone()),
            PortSpec::unary(),
        );
        engine.register_node_type(
            "join",
            RecordingProcessor::new(recorder.clone()),
            PortSpec::new(["left", "right"], ["output"]),
        );
        engine.register_node_type("fail", FailingProcessor::new("boom"), PortSpec::unary());
        engine.register_node_type("write", ContextWriter, PortSpec::unary());
        engine.register_node_type("read", ContextReader, PortSpec::unary());
        engine.register_node_type("delay", DelayProcessor, PortSpec::unary());
        engine
    }

    fn add(graph: &mut GraphBuilder, engine: &Engine, kind: &str, id: &str) {
        graph
            .add_registered_node(engine.registry(), kind, Some(id))
            .unwrap();
        graph.set_config(id, labelled(id)).unwrap();
    }

    #[tokio::test]
    async fn test_constant_feeds_expression() {
        let mut graph = GraphBuilder::new();
        graph.add_constant(json!(5), Some("c")).unwrap();
        graph.add_expression("input * 2", Some("e")).unwrap();
        graph.connect(("c", "output"), ("e", "input"), None).unwrap();

        let mut engine = Engine::new();
        let results = engine.execute(&graph.compile()).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results["c"]["output"], json!(5));
        assert_eq!(results["e"]["output"], json!(10));
        assert_eq!(engine.results(), &results);
    }

    #[tokio::test]
    async fn test_diamond_runs_join_once_after_both_sides() {
        let recorder = Recorder::new();
        let mut engine = engine_with(&recorder);
        let mut graph = GraphBuilder::new();
        for (kind, id) in [("record", "a"), ("record", "b"), ("record", "c"), ("join", "d")] {
            add(&mut graph, &engine, kind, id);
        }
        graph.connect(("a", "output"), ("b", "input"), None).unwrap();
        graph.connect(("a", "output"), ("c", "input"), None).unwrap();
        graph.connect(("b", "output"), ("d", "left"), None).unwrap();
        graph.connect(("c", "output"), ("d", "right"), None).unwrap();

        let results = engine.execute(&graph.compile()).await.unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(recorder.order(), vec!["a", "b", "c", "d"]);
        let joined = recorder.inputs_of("d").unwrap();
        assert_eq!(joined["left"], json!("b"));
        assert_eq!(joined["right"], json!("c"));
    }

    #[tokio::test]
    async fn test_two_wires_from_one_producer() {
        let recorder = Recorder::new();
        let mut engine = engine_with(&recorder);
        engine.register_node_type(
            "split",
            RecordingProcessor::new(recorder.clone()),
            PortSpec::new(Vec::<String>::new(), ["x", "y"]),
        );
        let mut graph = GraphBuilder::new();
        add(&mut graph, &engine, "split", "s");
        graph
            .set_config("s", json!({"label": "s", "emit": {"x": 1, "y": 2}}))
            .unwrap();
        add(&mut graph, &engine, "join", "j");
        graph.connect(("s", "x"), ("j", "left"), None).unwrap();
        graph.connect(("s", "y"), ("j", "right"), None).unwrap();

        engine.execute(&graph.compile()).await.unwrap();

        assert_eq!(recorder.count("j"), 1);
        let inputs = recorder.inputs_of("j").unwrap();
        assert_eq!(inputs["left"], json!(1));
        assert_eq!(inputs["right"], json!(2));
    }

    #[tokio::test]
    async fn test_unwired_input_is_absent() {
        let recorder = Recorder::new();
        let mut engine = engine_with(&recorder);
        let mut graph = GraphBuilder::new();
        add(&mut graph, &engine, "join", "lonely");
        graph.add_expression("input + 1", Some("e")).unwrap();

        let results = engine.execute(&graph.compile()).await.unwrap();

        assert!(recorder.inputs_of("lonely").unwrap().is_empty());
        assert_eq!(results["e"]["output"], Value::Null);
    }

    #[tokio::test]
    async fn test_overwritten_input_still_waits_for_first_producer() {
        let recorder = Recorder::new();
        let mut engine = engine_with(&recorder);
        let mut graph = GraphBuilder::new();
        for id in ["a00", "a0", "a", "b", "x"] {
            add(&mut graph, &engine, "record", id);
        }
        graph.connect(("a00", "output"), ("a0", "input"), None).unwrap();
        graph.connect(("a0", "output"), ("a", "input"), None).unwrap();
        graph.connect(("a", "output"), ("x", "input"), None).unwrap();
        graph.connect(("b", "output"), ("x", "input"), None).unwrap();

        engine.execute(&graph.compile()).await.unwrap();

        assert_eq!(recorder.order(), vec!["a00", "b", "a0", "a", "x"]);
        assert_eq!(recorder.inputs_of("x").unwrap()["input"], json!("b"));
    }

    fn branching(value: Value) -> GraphBuilder {
        let mut graph = GraphBuilder::new();
        graph.add_constant(value, Some("start")).unwrap();
        graph.add_condition("input === true", Some("check")).unwrap();
        graph.add_expression("input", Some("nodeX")).unwrap();
        graph.add_expression("input", Some("nodeY")).unwrap();
        graph.connect(("start", "output"), ("check", "input"), None).unwrap();
        graph
            .connect(("check", "output"), ("nodeX", "input"), Some("result === true"))
            .unwrap();
        graph
            .connect(("check", "output"), ("nodeY", "input"), Some("result === false"))
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_branch_selects_single_target() {
        let mut engine = Engine::new();
        let results = engine.execute(&branching(json!(true)).compile()).await.unwrap();

        assert_eq!(results["check"]["output"], json!(true));
        assert_eq!(results["nodeX"]["output"], json!(true));
        assert!(!results.contains_key("nodeY"));

        let results = engine.execute(&branching(json!("no")).compile()).await.unwrap();
        assert_eq!(results["check"]["output"], json!(false));
        assert!(results.contains_key("nodeY"));
        assert!(!results.contains_key("nodeX"));
    }

    #[tokio::test]
    async fn test_no_matching_branch_ends_path() {
        let mut graph = GraphBuilder::new();
        graph.add_constant(json!(5), Some("start")).unwrap();
        graph.add_condition("input > 10", Some("check")).unwrap();
        graph.add_expression("input", Some("big")).unwrap();
        graph.connect(("start", "output"), ("check", "input"), None).unwrap();
        graph
            .connect(("check", "output"), ("big", "input"), Some("result === true"))
            .unwrap();

        let mut engine = Engine::new();
        let mut rx = engine.event_bus().subscribe();
        let results = engine.execute(&graph.compile()).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(!results.contains_key("big"));

        let mut unmatched = false;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::BranchUnmatched { node_id, .. } = event {
                assert_eq!(node_id, "check");
                unmatched = true;
            }
        }
        assert!(unmatched);
    }

    #[tokio::test]
    async fn test_first_matching_branch_wins() {
        let mut graph = GraphBuilder::new();
        graph.add_constant(json!(7), Some("start")).unwrap();
        graph.add_condition("input", Some("check")).unwrap();
        graph.add_expression("input", Some("first")).unwrap();
        graph.add_expression("input", Some("second")).unwrap();
        graph.connect(("start", "output"), ("check", "input"), None).unwrap();
        graph.connect(("check", "output"), ("first", "input"), Some("result")).unwrap();
        graph.connect(("check", "output"), ("second", "input"), Some("result")).unwrap();

        let results = Engine::new().execute(&graph.compile()).await.unwrap();
        assert!(results.contains_key("first"));
        assert!(!results.contains_key("second"));
    }

    #[tokio::test]
    async fn test_condition_without_result_needs_exact_true() {
        let mut graph = GraphBuilder::new();
        graph.add_constant(json!(1), Some("start")).unwrap();
        graph.add_condition("input", Some("check")).unwrap();
        graph.add_expression("input", Some("truthy")).unwrap();
        graph.add_expression("input", Some("literal")).unwrap();
        graph.connect(("start", "output"), ("check", "input"), None).unwrap();
        graph.connect(("check", "output"), ("truthy", "input"), Some("1")).unwrap();
        graph.connect(("check", "output"), ("literal", "input"), Some("true")).unwrap();

        let results = Engine::new().execute(&graph.compile()).await.unwrap();
        assert!(!results.contains_key("truthy"));
        assert!(results.contains_key("literal"));
    }

    #[tokio::test]
    async fn test_processor_error_aborts_and_discards_results() {
        let recorder = Recorder::new();
        let mut engine = engine_with(&recorder);
        let mut graph = GraphBuilder::new();
        add(&mut graph, &engine, "record", "a");
        add(&mut graph, &engine, "fail", "f");
        add(&mut graph, &engine, "record", "c");
        graph.connect(("a", "output"), ("f", "input"), None).unwrap();
        graph.connect(("f", "output"), ("c", "input"), None).unwrap();

        let err = engine.execute(&graph.compile()).await.unwrap_err();

        assert!(matches!(err, FlowError::Processor { ref node, .. } if node == "f"));
        assert!(engine.results().is_empty());
        assert_eq!(recorder.order(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_unknown_kind_fails_at_run_time() {
        let mut graph = GraphBuilder::new();
        graph
            .add_node("call_agent", &PortSpec::unary(), Some("agent"))
            .unwrap();

        let err = Engine::new().execute(&graph.compile()).await.unwrap_err();
        assert!(matches!(err, FlowError::UnknownNodeKind(kind) if kind == "call_agent"));
    }

    #[tokio::test]
    async fn test_each_run_gets_a_fresh_context() {
        let recorder = Recorder::new();
        let mut engine = engine_with(&recorder);

        let mut writer = GraphBuilder::new();
        writer.add_node("write", &PortSpec::unary(), Some("w")).unwrap();
        writer.set_config("w", json!({"key": "shared", "value": 1})).unwrap();
        engine.execute(&writer.compile()).await.unwrap();

        let mut reader = GraphBuilder::new();
        reader.add_node("read", &PortSpec::unary(), Some("r")).unwrap();
        reader.set_config("r", json!({"key": "shared"})).unwrap();
        let compiled = reader.compile();

        let results = engine.execute(&compiled).await.unwrap();
        assert_eq!(results["r"]["output"], Value::Null);

        let seed = HashMap::from([("shared".to_string(), json!("seeded"))]);
        let results = engine.execute_with_context(&compiled, seed).await.unwrap();
        assert_eq!(results["r"]["output"], json!("seeded"));
    }

    #[tokio::test]
    async fn test_context_visible_to_later_waves() {
        let recorder = Recorder::new();
        let mut engine = engine_with(&recorder);
        let mut graph = GraphBuilder::new();
        graph.add_node("write", &PortSpec::unary(), Some("w")).unwrap();
        graph.set_config("w", json!({"key": "k", "value": "v"})).unwrap();
        graph.add_node("read", &PortSpec::unary(), Some("r")).unwrap();
        graph.set_config("r", json!({"key": "k"})).unwrap();
        graph.connect(("w", "output"), ("r", "input"), None).unwrap();

        let results = engine.execute(&graph.compile()).await.unwrap();
        assert_eq!(results["r"]["output"], json!("v"));
    }

    #[tokio::test]
    async fn test_repeated_runs_are_identical() {
        let compiled = branching(json!(true)).compile();
        let mut engine = Engine::new();
        let first = engine.execute(&compiled).await.unwrap();
        let second = engine.execute(&compiled).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cycle_members_never_run() {
        let mut graph = GraphBuilder::new();
        graph.add_constant(json!(1), Some("start")).unwrap();
        graph
            .add_node("join", &PortSpec::new(["left", "right"], ["output"]), Some("x"))
            .unwrap();
        graph.add_expression("input", Some("y")).unwrap();
        graph.connect(("start", "output"), ("x", "left"), None).unwrap();
        graph.connect(("x", "output"), ("y", "input"), None).unwrap();
        graph.connect(("y", "output"), ("x", "right"), None).unwrap();
        let compiled = graph.compile();

        let results = Engine::new().execute(&compiled).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.contains_key("start"));

        let config = EngineConfig {
            reject_cycles: true,
            ..EngineConfig::default()
        };
        let mut strict = Engine::with_evaluator(config, Arc::new(SimpleEvaluator::default()));
        let err = strict.execute(&compiled).await.unwrap_err();
        assert!(matches!(err, FlowError::CycleDetected(_)));
    }

    #[tokio::test]
    async fn test_concurrent_wave() {
        let recorder = Recorder::new();
        let config = EngineConfig {
            wave_mode: WaveMode::Concurrent,
            ..EngineConfig::default()
        };
        let mut engine = Engine::with_evaluator(config, Arc::new(SimpleEvaluator::default()));
        engine.register_node_type("delay", DelayProcessor, PortSpec::unary());
        engine.register_node_type(
            "join",
            RecordingProcessor::new(recorder.clone()),
            PortSpec::new(["left", "right"], ["output"]),
        );

        let mut graph = GraphBuilder::new();
        graph.add_constant(json!("go"), Some("c")).unwrap();
        for id in ["slow", "fast"] {
            graph.add_node("delay", &PortSpec::unary(), Some(id)).unwrap();
            graph.connect(("c", "output"), (id, "input"), None).unwrap();
        }
        graph.set_config("slow", json!({"ms": 30})).unwrap();
        graph.set_config("fast", json!({"ms": 1})).unwrap();
        graph.add_node("join", &PortSpec::new(["left", "right"], ["output"]), Some("j")).unwrap();
        graph.set_config("j", labelled("j")).unwrap();
        graph.connect(("slow", "output"), ("j", "left"), None).unwrap();
        graph.connect(("fast", "output"), ("j", "right"), None).unwrap();

        let results = engine.execute(&graph.compile()).await.unwrap();

        assert_eq!(results.len(), 4);
        let inputs = recorder.inputs_of("j").unwrap();
        assert_eq!(inputs["left"], json!("go"));
        assert_eq!(inputs["right"], json!("go"));
    }

    #[tokio::test]
    async fn test_concurrent_failure_discards_results() {
        let recorder = Recorder::new();
        let mut engine = engine_with(&recorder);
        engine.config.wave_mode = WaveMode::Concurrent;
        let mut graph = GraphBuilder::new();
        add(&mut graph, &engine, "record", "ok");
        add(&mut graph, &engine, "fail", "bad");

        let err = engine.execute(&graph.compile()).await.unwrap_err();
        assert!(matches!(err, FlowError::Processor { .. }));
        assert!(engine.results().is_empty());
    }

    #[tokio::test]
    async fn test_events_bracket_the_run() {
        let mut engine = Engine::new();
        let mut rx = engine.event_bus().subscribe();
        engine.execute(&branching(json!(true)).compile()).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert!(matches!(
            events.first(),
            Some(EngineEvent::RunStarted { entry_nodes, .. }) if entry_nodes == &vec!["start".to_string()]
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::BranchTaken { target, .. } if target == "nodeX"
        )));
        assert!(matches!(
            events.last(),
            Some(EngineEvent::RunCompleted { nodes_run: 3, .. })
        ));
    }
}
