// Maintenance Agent: work-order lookup via the remote tool protocol, keyed
// by canonicalized sensor tag.

use crate::agents::NamedAgent;
use crate::state::{GraphResult, MaintenanceResult, WorkOrder, WorkOrderPriority, WorkOrderStatus};
use crate::tool_protocol::ToolSession;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::OnceLock;

const MAX_SENSORS: usize = 10;
const TOOL_NAME: &str = "get_work_orders_by_sensor";

/// Matches an instrument tag's non-qualifier prefix: two area digit groups,
/// a two-letter function code, and a three-digit loop number.
/// `4010FI001.DACA.PV` is the worked example; the source does not
/// enumerate every tag variant the real maintenance system emits, so this
/// is exposed here (rather than buried in a private fn) for a reimplementer
/// to extend.
pub fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{2})(\d{2})([A-Z]{2})(\d{3})$").expect("static tag pattern is valid")
    })
}

/// Maps an instrument tag such as `4010FI001.DACA.PV` to the maintenance
/// system's canonical form `40-10-FI-001`. Tokens that do not match
/// `tag_pattern` are passed through unchanged. Idempotent: canonicalizing
/// an already-canonical tag is a no-op because the hyphens make it fail
/// `tag_pattern` and fall through the pass-through branch unchanged.
pub fn canonicalize_sensor_name(raw: &str) -> String {
    let prefix = raw.split('.').next().unwrap_or(raw);
    match tag_pattern().captures(prefix) {
        Some(caps) => format!("{}-{}-{}-{}", &caps[1], &caps[2], &caps[3], &caps[4]),
        None => raw.to_string(),
    }
}

#[derive(Deserialize)]
struct WireWorkOrder {
    nr: String,
    #[serde(default)]
    short_description: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    comment: String,
    status: u8,
    priority: u8,
    from_date: Option<DateTime<Utc>>,
    to_date: Option<DateTime<Utc>>,
    finished_date: Option<DateTime<Utc>>,
    url: Option<String>,
}

fn status_from_u8(raw: u8) -> WorkOrderStatus {
    match raw {
        7 => WorkOrderStatus::InProgress,
        8 => WorkOrderStatus::Closed,
        _ => WorkOrderStatus::Open,
    }
}

fn priority_from_u8(raw: u8) -> WorkOrderPriority {
    match raw {
        1 => WorkOrderPriority::High,
        3 => WorkOrderPriority::Low,
        _ => WorkOrderPriority::Medium,
    }
}

pub struct MaintenanceAgent<'a> {
    tools: &'a dyn ToolSession,
}

impl<'a> NamedAgent for MaintenanceAgent<'a> {
    fn name(&self) -> &'static str {
        "maintenance_agent"
    }
}

impl<'a> MaintenanceAgent<'a> {
    pub fn new(tools: &'a dyn ToolSession) -> Self {
        MaintenanceAgent { tools }
    }

    /// Consumes up to the first 10 distinct sensor names found in
    /// `graph_result.rows` and issues one tool call per sensor.
    pub async fn execute(&self, graph_result: &GraphResult) -> MaintenanceResult {
        if let Err(e) = self.tools.ensure_initialized().await {
            return MaintenanceResult {
                work_orders: Vec::new(),
                sensors_queried: BTreeSet::new(),
                error: Some(format!("maintenance server unavailable: {e}")),
            };
        }

        let sensors = graph_sensor_names(graph_result, MAX_SENSORS);
        if sensors.is_empty() {
            return MaintenanceResult {
                work_orders: Vec::new(),
                sensors_queried: BTreeSet::new(),
                error: None,
            };
        }

        let mut work_orders = Vec::new();
        let mut sensors_queried = BTreeSet::new();
        let mut per_sensor_errors = Vec::new();

        for original in &sensors {
            let canonical = canonicalize_sensor_name(original);
            sensors_queried.insert(canonical.clone());

            let args = json!({ "sensor_name": canonical });
            match self.tools.call_tool(TOOL_NAME, args).await {
                Ok(result) => {
                    for wo in parse_work_orders(&result, &canonical, original) {
                        work_orders.push(wo);
                    }
                }
                Err(e) => per_sensor_errors.push(format!("{original}: {e}")),
            }
        }

        let error = if per_sensor_errors.is_empty() {
            None
        } else {
            Some(per_sensor_errors.join("; "))
        };

        MaintenanceResult {
            work_orders,
            sensors_queried,
            error,
        }
    }

    /// Graceful degradation: initialization itself failed, so the whole
    /// agent returns an empty result with a fixed "unavailable" error
    /// rather than aborting the workflow.
    pub fn unavailable() -> MaintenanceResult {
        MaintenanceResult {
            work_orders: Vec::new(),
            sensors_queried: BTreeSet::new(),
            error: Some("maintenance server unavailable".to_string()),
        }
    }
}

fn parse_work_orders(value: &Value, canonical: &str, original: &str) -> Vec<WorkOrder> {
    let raw: Vec<WireWorkOrder> = match serde_json::from_value(value.clone()) {
        Ok(wos) => wos,
        Err(_) => return Vec::new(),
    };

    raw.into_iter()
        .map(|wo| WorkOrder {
            nr: wo.nr,
            short_description: wo.short_description,
            description: wo.description,
            comment: wo.comment,
            status: status_from_u8(wo.status),
            priority: priority_from_u8(wo.priority),
            from_date: wo.from_date,
            to_date: wo.to_date,
            finished_date: wo.finished_date,
            url: wo.url,
            sensor_name: canonical.to_string(),
            original_sensor_name: original.to_string(),
        })
        .collect()
}

fn graph_sensor_names(graph_result: &GraphResult, limit: usize) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut names = Vec::new();
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_protocol::test_support::ScriptedToolSession;
    use std::collections::HashMap;

    fn row(tag: &str) -> serde_json::Map<String, Value> {
        json!({"tag": tag}).as_object().unwrap().clone()
    }

    #[test]
    fn canonicalizes_instrument_tag() {
        assert_eq!(canonicalize_sensor_name("4010FI001.DACA.PV"), "40-10-FI-001");
    }

    #[test]
    fn passes_through_non_matching_tag() {
        assert_eq!(canonicalize_sensor_name("not-a-tag"), "not-a-tag");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let once = canonicalize_sensor_name("4010FI001.DACA.PV");
        let twice = canonicalize_sensor_name(&once);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn empty_graph_rows_yield_empty_success() {
        let tools = ScriptedToolSession {
            by_sensor: HashMap::new(),
        };
        let agent = MaintenanceAgent::new(&tools);
        let graph_result = GraphResult {
            cypher: "MATCH (s:Sensor) RETURN s.name".to_string(),
            rows: vec![],
            row_count: 0,
            error: None,
        };
        let result = agent.execute(&graph_result).await;
        assert!(result.work_orders.is_empty());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn fetches_work_orders_per_sensor_and_canonicalizes() {
        let mut by_sensor = HashMap::new();
        by_sensor.insert(
            "40-10-FI-001".to_string(),
            Ok(json!([{
                "nr": "WO-1",
                "short_description": "Replace gasket",
                "description": "Replace gasket",
                "comment": "",
                "status": 1,
                "priority": 2,
                "from_date": null,
                "to_date": null,
                "finished_date": null,
                "url": null
            }])),
        );
        let tools = ScriptedToolSession { by_sensor };
        let agent = MaintenanceAgent::new(&tools);
        let graph_result = GraphResult {
            cypher: "...".to_string(),
            rows: vec![row("4010FI001.DACA.PV")],
            row_count: 1,
            error: None,
        };
        let result = agent.execute(&graph_result).await;
        assert_eq!(result.work_orders.len(), 1);
        let wo = &result.work_orders[0];
        assert_eq!(wo.sensor_name, "40-10-FI-001");
        assert_eq!(wo.original_sensor_name, "4010FI001.DACA.PV");
        assert!(result.sensors_queried.contains("40-10-FI-001"));
    }

    #[tokio::test]
    async fn caps_sensor_count_at_ten() {
        let tools = ScriptedToolSession {
            by_sensor: HashMap::new(),
        };
        let agent = MaintenanceAgent::new(&tools);
        let rows: Vec<_> = (0..15).map(|i| row(&format!("sensor-{i}"))).collect();
        let graph_result = GraphResult {
            cypher: "...".to_string(),
            rows,
            row_count: 15,
            error: None,
        };
        let result = agent.execute(&graph_result).await;
        assert_eq!(result.sensors_queried.len(), 10);
    }
}
