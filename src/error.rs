// Crate-level error taxonomy.
//
// Every variant except `InternalBug` is caught at a node boundary and folded
// into an `AgentResult` by the coordinator; `InternalBug` is the only one
// that is allowed to propagate past `Workflow::run`.

use std::error::Error;
use std::fmt;

#[derive(Debug, Clone)]
pub enum WorkflowError {
    /// The LLM's intent-classification reply was not parseable JSON.
    IntentParseError(String),
    /// The LLM produced a Cypher statement containing a write clause.
    CypherRejected(String),
    /// The graph store rejected or failed to execute a read-only query.
    CypherExecutionError(String),
    /// JSON-RPC `initialize` or the underlying HTTP transport failed.
    ToolProtocolError(String),
    /// A JSON-RPC response carried a `error` object instead of `result`.
    ToolLogicError { sensor: String, message: String },
    /// A node or the whole workflow exceeded its deadline.
    Timeout(String),
    /// The caller cancelled the request.
    Cancelled,
    /// A bug in the coordinator itself, not an agent-level failure.
    InternalBug(String),
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::IntentParseError(msg) => write!(f, "intent parse error: {msg}"),
            WorkflowError::CypherRejected(msg) => write!(f, "cypher rejected: {msg}"),
            WorkflowError::CypherExecutionError(msg) => write!(f, "cypher execution error: {msg}"),
            WorkflowError::ToolProtocolError(msg) => write!(f, "tool protocol error: {msg}"),
            WorkflowError::ToolLogicError { sensor, message } => {
                write!(f, "tool logic error for sensor {sensor}: {message}")
            }
            WorkflowError::Timeout(node) => write!(f, "timeout in node: {node}"),
            WorkflowError::Cancelled => write!(f, "cancelled"),
            WorkflowError::InternalBug(msg) => write!(f, "internal bug: {msg}"),
        }
    }
}

impl Error for WorkflowError {}

impl WorkflowError {
    /// True for the single variant allowed to propagate out of `Workflow::run`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkflowError::InternalBug(_))
    }
}

/// Errors raised while assembling a `Config`.
#[derive(Debug, Clone)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl Error for ConfigError {}
