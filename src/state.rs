// Shared workflow state and the trace data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ScopeDepth {
    One = 1,
    Two = 2,
    Three = 3,
}

impl ScopeDepth {
    pub fn hops(self) -> u8 {
        self as u8
    }
}

/// Optional constraint naming a node in the graph that restricts the graph
/// agent's results. Never a security boundary, only a retrieval hint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScopeHint {
    pub node_type: String,
    pub node_name: String,
    pub plant: Option<String>,
    pub area: Option<String>,
    pub equipment: Option<String>,
    pub scope_depth: ScopeDepth,
    pub breadcrumb: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum RequestMode {
    Global,
    Contextual,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Request {
    pub question: String,
    pub context: Option<ScopeHint>,
    pub mode: Option<RequestMode>,
}

/// The three booleans deciding which downstream agents the coordinator
/// schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Intent {
    pub needs_graph: bool,
    pub needs_maintenance: bool,
    pub needs_time_series: bool,
}

impl Intent {
    /// The safe-fallback flags used when the classifier LLM reply cannot be
    /// parsed: graph + maintenance, the safest overlap.
    pub fn fallback() -> Self {
        Intent {
            needs_graph: true,
            needs_maintenance: true,
            needs_time_series: false,
        }
    }

    pub fn off_domain() -> Self {
        Intent {
            needs_graph: false,
            needs_maintenance: false,
            needs_time_series: false,
        }
    }
}

pub type GraphRow = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphResult {
    pub cypher: String,
    pub rows: Vec<GraphRow>,
    pub row_count: usize,
    pub error: Option<String>,
}

impl GraphResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WorkOrderStatus {
    Open = 1,
    InProgress = 7,
    Closed = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WorkOrderPriority {
    High = 1,
    Medium = 2,
    Low = 3,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkOrder {
    pub nr: String,
    pub short_description: String,
    pub description: String,
    pub comment: String,
    pub status: WorkOrderStatus,
    pub priority: WorkOrderPriority,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub finished_date: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub sensor_name: String,
    pub original_sensor_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceResult {
    pub work_orders: Vec<WorkOrder>,
    pub sensors_queried: BTreeSet<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub sensor_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub sensor_name: String,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TimeSeriesResult {
    pub measurements: Vec<Measurement>,
    pub anomalies: Vec<Anomaly>,
    pub is_mock: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Synthesis {
    pub text: String,
    pub cited_agents: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Success,
    Error,
    Skipped,
}

/// One per node execution, appended to `trace` in actual completion order.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub summary: String,
    pub output: Value,
    pub error: Option<String>,
}

impl AgentResult {
    /// `summary` is clamped to a 200-char cap.
    pub fn new(
        agent_name: impl Into<String>,
        status: AgentStatus,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        summary: impl Into<String>,
        output: Value,
        error: Option<String>,
    ) -> Self {
        let mut summary = summary.into();
        if summary.len() > 200 {
            summary.truncate(200);
        }
        AgentResult {
            agent_name: agent_name.into(),
            status,
            started_at,
            duration_ms,
            summary,
            output,
            error,
        }
    }

    pub fn skipped(agent_name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        AgentResult::new(
            agent_name,
            AgentStatus::Skipped,
            started_at,
            0,
            "not selected for this question",
            Value::Null,
            None,
        )
    }
}

/// The shared, incrementally-populated state threaded through one workflow
/// run. Only the coordinator mutates top-level fields; agents hand back
/// immutable result objects for the coordinator to assign.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub question: String,
    pub scope: Option<ScopeHint>,
    pub intent: Option<Intent>,
    pub graph_result: Option<GraphResult>,
    pub maintenance_result: Option<MaintenanceResult>,
    pub time_series_result: Option<TimeSeriesResult>,
    pub synthesis: Option<Synthesis>,
    pub trace: Vec<AgentResult>,
    pub errors: Vec<String>,
}

impl WorkflowState {
    pub fn new(question: String, scope: Option<ScopeHint>) -> Self {
        WorkflowState {
            question,
            scope,
            intent: None,
            graph_result: None,
            maintenance_result: None,
            time_series_result: None,
            synthesis: None,
            trace: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Distinct sensor names present in `graph_result.rows`, in row order.
    /// Looks for any row value under a key named `name` or `tag`.
    pub fn graph_sensor_names(&self, limit: usize) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        let Some(graph_result) = &self.graph_result else {
            return names;
        };
        for row in &graph_result.rows {
            for key in ["tag", "name", "s.name", "s.properties.tag"] {
                if let Some(Value::String(s)) = row.get(key) {
                    if seen.insert(s.clone()) {
                        names.push(s.clone());
                        if names.len() >= limit {
                            return names;
                        }
                    }
                }
            }
        }
        names
    }
}

/// The final response handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResponse {
    pub answer: String,
    pub trace: Vec<AgentResult>,
    pub errors: Vec<String>,
}
