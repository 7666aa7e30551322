use std::collections::HashMap;
use std::io::Write;

use serde_json::{json, Value};

use agentflow_core::types::{NodeOutputs, PortSpec};
use agentflow_core::{processor_fn, ExecutionContext, FlowError, NodeInputs};
use agentflow_engine::{ConnectionRecord, Engine, GraphBuilder, GraphDocument, NodeRecord};
use agentflow_test_utils::{labelled, ContextReader, Recorder, RecordingProcessor};

#[tokio::test]
async fn test_constant_then_expression() {
    let mut graph = GraphBuilder::new();
    let constant = graph.add_constant(json!(5), Some("constantNode")).unwrap();
    let expression = graph.add_expression("input * 2", Some("expressionNode")).unwrap();
    graph
        .connect((&constant, "output"), (&expression, "input"), None)
        .unwrap();

    let results = Engine::new().execute(&graph.compile()).await.unwrap();

    let expected: HashMap<String, NodeOutputs> = HashMap::from([
        ("constantNode".to_string(), NodeOutputs::from([("output".to_string(), json!(5))])),
        ("expressionNode".to_string(), NodeOutputs::from([("output".to_string(), json!(10))])),
    ]);
    assert_eq!(results, expected);
}

#[tokio::test]
async fn test_branching_runs_only_matching_target() {
    let mut graph = GraphBuilder::new();
    graph.add_constant(json!(true), Some("start")).unwrap();
    graph.add_condition("result === true", Some("check")).unwrap();
    graph.add_expression("input", Some("nodeX")).unwrap();
    graph.add_expression("input", Some("nodeY")).unwrap();
    graph.connect(("start", "output"), ("check", "input"), None).unwrap();
    graph
        .connect(("check", "output"), ("nodeX", "input"), Some("result === true"))
        .unwrap();
    graph
        .connect(("check", "output"), ("nodeY", "input"), Some("result === false"))
        .unwrap();

    let results = Engine::new().execute(&graph.compile()).await.unwrap();

    let mut ran: Vec<&str> = results.keys().map(String::as_str).collect();
    ran.sort_unstable();
    assert_eq!(ran, vec!["check", "nodeX", "start"]);
}

#[tokio::test]
async fn test_first_match_beats_later_true_branch() {
    let mut graph = GraphBuilder::new();
    graph.add_constant(json!(1), Some("start")).unwrap();
    graph
        .add_node("condition", &PortSpec::unary(), Some("check"))
        .unwrap();
    graph.set_config("check", json!({"expression": "input"})).unwrap();
    graph.add_expression("input", Some("A")).unwrap();
    graph.add_expression("input", Some("B")).unwrap();
    graph.connect(("start", "output"), ("check", "input"), None).unwrap();
    graph.connect(("check", "output"), ("A", "input"), Some("result === true")).unwrap();
    graph.connect(("check", "output"), ("B", "input"), Some("true")).unwrap();

    let results = Engine::new().execute(&graph.compile()).await.unwrap();
    assert!(results.contains_key("A"));
    assert!(!results.contains_key("B"));
}

#[tokio::test]
async fn test_first_match_with_numeric_condition_output() {
    let mut engine = Engine::new();
    engine.register_node_type(
        "condition",
        processor_fn(|_inputs, _ctx, _config| async {
            Ok(NodeOutputs::from([("output".to_string(), json!(1))]))
        }),
        PortSpec::unary(),
    );

    let mut graph = GraphBuilder::new();
    graph.add_node("condition", &PortSpec::unary(), Some("check")).unwrap();
    graph.add_expression("input", Some("A")).unwrap();
    graph.add_expression("input", Some("B")).unwrap();
    graph.connect(("check", "output"), ("A", "input"), Some("result === 1")).unwrap();
    graph.connect(("check", "output"), ("B", "input"), Some("true")).unwrap();

    let results = engine.execute(&graph.compile()).await.unwrap();

    let mut ran: Vec<&str> = results.keys().map(String::as_str).collect();
    ran.sort_unstable();
    assert_eq!(ran, vec!["A", "check"]);
    assert_eq!(results["A"]["output"], json!(1));
}

#[tokio::test]
async fn test_every_node_runs_once_after_its_producers() {
    let recorder = Recorder::new();
    let mut engine = Engine::new();
    engine.register_node_type(
        "step",
        RecordingProcessor::new(recorder.clone()),
        PortSpec::new(["a", "b"], ["output"]),
    );

    //  n1 ──> n2 ──> n4
    //   └───> n3 ──┘   └──> n5
    let mut graph = GraphBuilder::new();
    for id in ["n1", "n2", "n3", "n4", "n5"] {
        graph.add_registered_node(engine.registry(), "step", Some(id)).unwrap();
        graph.set_config(id, labelled(id)).unwrap();
    }
    graph.connect(("n1", "output"), ("n2", "a"), None).unwrap();
    graph.connect(("n1", "output"), ("n3", "a"), None).unwrap();
    graph.connect(("n2", "output"), ("n4", "a"), None).unwrap();
    graph.connect(("n3", "output"), ("n4", "b"), None).unwrap();
    graph.connect(("n4", "output"), ("n5", "a"), None).unwrap();

    let compiled = graph.compile();
    assert_eq!(compiled.get_entry_nodes(), vec!["n1".to_string()]);

    let results = engine.execute(&compiled).await.unwrap();
    assert_eq!(results.len(), 5);

    let order = recorder.order();
    assert_eq!(order.len(), 5);
    let position = |id: &str| order.iter().position(|o| o == id).unwrap();
    for conn in compiled.connections() {
        assert!(position(&conn.from.node) < position(&conn.to.node));
    }
}

#[tokio::test]
async fn test_soft_fail_wiring_leaves_no_trace() {
    let mut graph = GraphBuilder::new();
    graph.add_constant(json!(1), Some("c")).unwrap();
    graph.add_expression("input", Some("e")).unwrap();
    graph.connect(("c", "output"), ("e", "missing"), None).unwrap();

    let compiled = graph.compile();
    assert!(compiled.get_node_inputs("e").unwrap().is_empty());
    assert_eq!(compiled.get_entry_nodes().len(), 2);

    let results = Engine::new().execute(&compiled).await.unwrap();
    assert_eq!(results["e"]["output"], Value::Null);
}

#[tokio::test]
async fn test_context_does_not_leak_between_runs() {
    let mut engine = Engine::new();
    engine.register_node_type(
        "remember",
        processor_fn(|_inputs: NodeInputs, ctx: ExecutionContext, _config| async move {
            let seen = ctx.get("agent").unwrap_or(Value::Null);
            ctx.set("agent", json!("researcher"));
            Ok(NodeOutputs::from([("output".to_string(), seen)]))
        }),
        PortSpec::source(),
    );
    engine.register_node_type("read", ContextReader, PortSpec::unary());

    let mut graph = GraphBuilder::new();
    graph.add_node("remember", &PortSpec::source(), Some("m")).unwrap();
    graph.add_node("read", &PortSpec::unary(), Some("r")).unwrap();
    graph.set_config("r", json!({"key": "agent"})).unwrap();
    graph.connect(("m", "output"), ("r", "input"), None).unwrap();
    let compiled = graph.compile();

    for _ in 0..2 {
        let results = engine.execute(&compiled).await.unwrap();
        assert_eq!(results["m"]["output"], Value::Null);
        assert_eq!(results["r"]["output"], json!("researcher"));
    }
}

#[tokio::test]
async fn test_processor_error_reaches_caller_unchanged() {
    let mut engine = Engine::new();
    engine.register_node_type(
        "call_agent",
        processor_fn(|_inputs, _ctx, _config| async {
            Err(FlowError::Processor {
                node: "agent".into(),
                message: "Agent not found: writer".into(),
            })
        }),
        PortSpec::unary(),
    );

    let mut graph = GraphBuilder::new();
    graph.add_constant(json!("hi"), Some("c")).unwrap();
    graph.add_node("call_agent", &PortSpec::unary(), Some("agent")).unwrap();
    graph.connect(("c", "output"), ("agent", "input"), None).unwrap();

    let err = engine.execute(&graph.compile()).await.unwrap_err();
    assert_eq!(err.to_string(), "Node agent failed: Agent not found: writer");
    assert!(engine.results().is_empty());
}

#[tokio::test]
async fn test_document_file_runs() {
    let doc = GraphDocument {
        nodes: vec![
            NodeRecord {
                id: "start".into(),
                kind: "constant".into(),
                data: json!({"value": 12}),
                ports: None,
                connections: vec![ConnectionRecord::new("check")],
            },
            NodeRecord {
                id: "check".into(),
                kind: "condition".into(),
                data: json!({"expression": "input > context.threshold"}),
                ports: None,
                connections: vec![
                    ConnectionRecord {
                        condition: Some("result === true".into()),
                        ..ConnectionRecord::new("high")
                    },
                    ConnectionRecord {
                        condition: Some("result === false".into()),
                        ..ConnectionRecord::new("low")
                    },
                ],
            },
            NodeRecord {
                id: "high".into(),
                kind: "expression".into(),
                data: json!("'high'"),
                ports: None,
                connections: vec![],
            },
            NodeRecord {
                id: "low".into(),
                kind: "expression".into(),
                data: json!("'low'"),
                ports: None,
                connections: vec![],
            },
        ],
    };

    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(doc.to_json().unwrap().as_bytes()).expect("write graph");

    let mut engine = Engine::new();
    let loaded = GraphDocument::load(file.path()).unwrap();
    let compiled = GraphBuilder::from_document(&loaded, engine.registry())
        .unwrap()
        .compile();

    let seed = HashMap::from([("threshold".to_string(), json!(10))]);
    let results = engine.execute_with_context(&compiled, seed).await.unwrap();
    assert_eq!(results["high"]["output"], json!("high"));
    assert!(!results.contains_key("low"));

    let seed = HashMap::from([("threshold".to_string(), json!(20))]);
    let results = engine.execute_with_context(&compiled, seed).await.unwrap();
    assert_eq!(results["low"]["output"], json!("low"));
    assert!(!results.contains_key("high"));
}
