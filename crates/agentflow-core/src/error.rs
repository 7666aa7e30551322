use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // Graph construction errors
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Unknown node kind: {0}")]
    UnknownNodeKind(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Port '{port}' does not exist on node {node}")]
    MissingPort { node: String, port: String },

    #[error("Cycle detected between nodes: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    // Evaluation errors
    #[error("Expression evaluation failed: {0}")]
    Expression(String),

    // Errors raised by node processors
    #[error("Node {node} failed: {message}")]
    Processor { node: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
