// Workflow Coordinator: owns the node graph, dispatch, and the shared
// `WorkflowState`. The single public entry point is `Workflow::run`.
//
// Each agent's `execute` already folds its own failures into a result value
// instead of returning `Result<T, E>` — all agent-level errors are captured
// and never surfaced as workflow failures — so there is no panic to catch
// here; what the coordinator actually guards against is a node that never
// returns, via `run_node`'s per-node timeout and cancellation race.

use crate::agents::graph::GraphAgent;
use crate::agents::intent::IntentClassifier;
use crate::agents::maintenance::MaintenanceAgent;
use crate::agents::synthesizer::Synthesizer;
use crate::agents::time_series::{Backend as TimeSeriesBackend, TimeSeriesAgent};
use crate::agents::NamedAgent;
use crate::config::NodeTimeouts;
use crate::graph_store::GraphStore;
use crate::llm::ChatCompletionClient;
use crate::state::{
    AgentResult, AgentStatus, GraphResult, Intent, MaintenanceResult, ScopeHint, TimeSeriesResult,
    WorkflowResponse, WorkflowState,
};
use crate::tool_protocol::ToolSession;
use chrono::{Duration as ChronoDuration, Utc};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub struct Workflow<'a> {
    llm: &'a dyn ChatCompletionClient,
    store: &'a dyn GraphStore,
    maintenance_tools: Option<&'a dyn ToolSession>,
    time_series_backend: TimeSeriesBackend<'a>,
    timeouts: NodeTimeouts,
}

impl<'a> Workflow<'a> {
    pub fn new(
        llm: &'a dyn ChatCompletionClient,
        store: &'a dyn GraphStore,
        maintenance_tools: Option<&'a dyn ToolSession>,
        time_series_backend: TimeSeriesBackend<'a>,
        timeouts: NodeTimeouts,
    ) -> Self {
        Workflow {
            llm,
            store,
            maintenance_tools,
            time_series_backend,
            timeouts,
        }
    }

    pub async fn run(
        &self,
        question: String,
        scope: Option<ScopeHint>,
        cancel: CancellationToken,
    ) -> WorkflowResponse {
        let mut state = WorkflowState::new(question, scope);
        let deadline = Instant::now() + self.timeouts.workflow();

        if cancel.is_cancelled() {
            return cancelled_response(state);
        }

        // --- intent ---------------------------------------------------
        let intent_outcome = run_node(
            remaining(deadline),
            &cancel,
            self.classify_intent(&state),
        )
        .await;

        match intent_outcome {
            NodeOutcome::Cancelled => return cancelled_response(state),
            NodeOutcome::TimedOut => {
                log::warn!("node intent: timed out");
                state.trace.push(node_timeout_result("intent"));
                state.errors.push("timeout in node: intent".to_string());
                // No flags were decided; the safest move is to treat this
                // like `needs_graph = false` so no downstream agent is
                // scheduled on a guess.
            }
            NodeOutcome::Completed((result, intent)) => {
                state.trace.push(result);
                state.intent = Some(intent);
            }
        }

        let needs_graph = state.intent.map(|i| i.needs_graph).unwrap_or(false);
        if !needs_graph {
            return self.finish_with_synthesis(state, deadline, cancel).await;
        }

        // --- graph ------------------------------------------------------
        if cancel.is_cancelled() {
            return cancelled_response(state);
        }
        let graph_timeout = self.timeouts.graph().min(remaining(deadline));
        let graph_outcome = run_node(graph_timeout, &cancel, self.execute_graph(&state)).await;

        let graph_success = match graph_outcome {
            NodeOutcome::Cancelled => return cancelled_response(state),
            NodeOutcome::TimedOut => {
                log::warn!("node graph_agent: timed out");
                state.trace.push(node_timeout_result("graph_agent"));
                state.errors.push("timeout in node: graph_agent".to_string());
                false
            }
            NodeOutcome::Completed((result, graph_result)) => {
                let success = graph_result.is_success();
                if let Some(err) = &graph_result.error {
                    state.errors.push(format!("graph_agent: {err}"));
                }
                state.trace.push(result);
                state.graph_result = Some(graph_result);
                success
            }
        };

        // --- maintenance / time-series (conditional fanout) --------------
        let intent = state.intent.unwrap();
        let run_maintenance = intent.needs_maintenance && graph_success;
        let run_time_series = intent.needs_time_series && graph_success;

        if intent.needs_maintenance && !graph_success {
            log::debug!("node maintenance_agent: skipped, graph_agent did not succeed");
            state
                .trace
                .push(AgentResult::skipped("maintenance_agent", Utc::now()));
        }
        if intent.needs_time_series && !graph_success {
            log::debug!("node time_series_agent: skipped, graph_agent did not succeed");
            state
                .trace
                .push(AgentResult::skipped("time_series_agent", Utc::now()));
        }

        if cancel.is_cancelled() {
            return cancelled_response(state);
        }

        let graph_snapshot = state.graph_result.clone().unwrap_or_default();

        match (run_maintenance, run_time_series) {
            (true, true) => {
                let maintenance_timeout = self.timeouts.maintenance().min(remaining(deadline));
                let time_series_timeout = self.timeouts.time_series().min(remaining(deadline));

                let (maintenance_outcome, time_series_outcome) = tokio::join!(
                    run_node(
                        maintenance_timeout,
                        &cancel,
                        self.execute_maintenance(&graph_snapshot),
                    ),
                    run_node(
                        time_series_timeout,
                        &cancel,
                        self.execute_time_series(&graph_snapshot),
                    )
                );

                if matches!(maintenance_outcome, NodeOutcome::Cancelled)
                    || matches!(time_series_outcome, NodeOutcome::Cancelled)
                {
                    return cancelled_response(state);
                }

                let maintenance_entry = self.settle_maintenance(&mut state, maintenance_outcome);
                let time_series_entry = self.settle_time_series(&mut state, time_series_outcome);

                // Trace order follows actual completion order; both branches
                // record their own completion instant, so sort by that
                // rather than assignment order.
                let mut pending = vec![maintenance_entry, time_series_entry];
                pending.sort_by_key(completion_instant);
                state.trace.extend(pending);
            }
            (true, false) => {
                let maintenance_timeout = self.timeouts.maintenance().min(remaining(deadline));
                let outcome = run_node(
                    maintenance_timeout,
                    &cancel,
                    self.execute_maintenance(&graph_snapshot),
                )
                .await;
                if matches!(outcome, NodeOutcome::Cancelled) {
                    return cancelled_response(state);
                }
                let entry = self.settle_maintenance(&mut state, outcome);
                state.trace.push(entry);
            }
            (false, true) => {
                let time_series_timeout = self.timeouts.time_series().min(remaining(deadline));
                let outcome = run_node(
                    time_series_timeout,
                    &cancel,
                    self.execute_time_series(&graph_snapshot),
                )
                .await;
                if matches!(outcome, NodeOutcome::Cancelled) {
                    return cancelled_response(state);
                }
                let entry = self.settle_time_series(&mut state, outcome);
                state.trace.push(entry);
            }
            (false, false) => {}
        }

        self.finish_with_synthesis(state, deadline, cancel).await
    }

    async fn finish_with_synthesis(
        &self,
        mut state: WorkflowState,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> WorkflowResponse {
        if cancel.is_cancelled() {
            return cancelled_response(state);
        }

        let synthesizer_timeout = self.timeouts.synthesizer().min(remaining(deadline));
        let outcome = run_node(synthesizer_timeout, &cancel, self.synthesize(&state)).await;

        match outcome {
            NodeOutcome::Cancelled => return cancelled_response(state),
            NodeOutcome::TimedOut => {
                log::warn!("node synthesizer: timed out");
                state.trace.push(node_timeout_result("synthesizer"));
                state.errors.push("timeout in node: synthesizer".to_string());
                state.synthesis = Some(crate::state::Synthesis {
                    text: "The workflow timed out before a full answer could be composed."
                        .to_string(),
                    cited_agents: Default::default(),
                });
            }
            NodeOutcome::Completed((result, synthesis)) => {
                state.trace.push(result);
                state.synthesis = Some(synthesis);
            }
        }

        WorkflowResponse {
            answer: state
                .synthesis
                .map(|s| s.text)
                .unwrap_or_default(),
            trace: state.trace,
            errors: state.errors,
        }
    }

    fn settle_maintenance(
        &self,
        state: &mut WorkflowState,
        outcome: NodeOutcome<(AgentResult, MaintenanceResult)>,
    ) -> AgentResult {
        match outcome {
            NodeOutcome::Cancelled => unreachable!("caller handles cancellation before settling"),
            NodeOutcome::TimedOut => {
                log::warn!("node maintenance_agent: timed out");
                state
                    .errors
                    .push("timeout in node: maintenance_agent".to_string());
                node_timeout_result("maintenance_agent")
            }
            NodeOutcome::Completed((result, maintenance_result)) => {
                if let Some(err) = &maintenance_result.error {
                    state.errors.push(format!("maintenance_agent: {err}"));
                }
                state.maintenance_result = Some(maintenance_result);
                result
            }
        }
    }

    fn settle_time_series(
        &self,
        state: &mut WorkflowState,
        outcome: NodeOutcome<(AgentResult, TimeSeriesResult)>,
    ) -> AgentResult {
        match outcome {
            NodeOutcome::Cancelled => unreachable!("caller handles cancellation before settling"),
            NodeOutcome::TimedOut => {
                log::warn!("node time_series_agent: timed out");
                state
                    .errors
                    .push("timeout in node: time_series_agent".to_string());
                node_timeout_result("time_series_agent")
            }
            NodeOutcome::Completed((result, time_series_result)) => {
                if let Some(err) = &time_series_result.error {
                    state.errors.push(format!("time_series_agent: {err}"));
                }
                state.time_series_result = Some(time_series_result);
                result
            }
        }
    }

    async fn classify_intent(&self, state: &WorkflowState) -> (AgentResult, Intent) {
        log::debug!("node intent: entering, selected=true");
        let started_at = Utc::now();
        let start = Instant::now();
        let classifier = IntentClassifier::new(self.llm);
        let intent = classifier
            .classify(&state.question, state.scope.as_ref())
            .await;
        let summary = format!(
            "needs_graph={} needs_maintenance={} needs_time_series={}",
            intent.needs_graph, intent.needs_maintenance, intent.needs_time_series
        );
        let duration_ms = start.elapsed().as_millis() as u64;
        let output = serde_json::to_value(intent).unwrap_or(serde_json::Value::Null);
        let result = AgentResult::new(
            classifier.name(),
            AgentStatus::Success,
            started_at,
            duration_ms,
            summary,
            output,
            None,
        );
        log::info!(
            "node intent: completed status={:?} duration_ms={}",
            result.status,
            duration_ms
        );
        (result, intent)
    }

    async fn execute_graph(&self, state: &WorkflowState) -> (AgentResult, GraphResult) {
        log::debug!("node graph_agent: entering, selected=true");
        let started_at = Utc::now();
        let start = Instant::now();
        let agent = GraphAgent::new(self.llm, self.store);
        let graph_result = agent
            .execute(&state.question, state.scope.as_ref())
            .await;
        let status = if graph_result.is_success() {
            AgentStatus::Success
        } else {
            AgentStatus::Error
        };
        let summary = if graph_result.is_success() {
            format!("returned {} row(s)", graph_result.row_count)
        } else {
            graph_result.error.clone().unwrap_or_default()
        };
        if let Some(err) = &graph_result.error {
            log::warn!("node graph_agent: error={err}");
        }
        let duration_ms = start.elapsed().as_millis() as u64;
        let output = serde_json::to_value(&graph_result).unwrap_or(serde_json::Value::Null);
        let result = AgentResult::new(
            agent.name(),
            status,
            started_at,
            duration_ms,
            summary,
            output,
            graph_result.error.clone(),
        );
        log::info!(
            "node graph_agent: completed status={:?} duration_ms={}",
            result.status,
            duration_ms
        );
        (result, graph_result)
    }

    async fn execute_maintenance(
        &self,
        graph_result: &GraphResult,
    ) -> (AgentResult, MaintenanceResult) {
        log::debug!("node maintenance_agent: entering, selected=true");
        let started_at = Utc::now();
        let start = Instant::now();

        let maintenance_result = match self.maintenance_tools {
            Some(tools) => MaintenanceAgent::new(tools).execute(graph_result).await,
            None => MaintenanceAgent::unavailable(),
        };

        let status = if maintenance_result.error.is_none() {
            AgentStatus::Success
        } else {
            AgentStatus::Error
        };
        let summary = if maintenance_result.error.is_none() {
            format!("found {} work order(s)", maintenance_result.work_orders.len())
        } else {
            maintenance_result.error.clone().unwrap_or_default()
        };
        if let Some(err) = &maintenance_result.error {
            log::warn!("node maintenance_agent: error={err}");
        }
        let duration_ms = start.elapsed().as_millis() as u64;
        let output = serde_json::to_value(&maintenance_result).unwrap_or(serde_json::Value::Null);
        let result = AgentResult::new(
            "maintenance_agent",
            status,
            started_at,
            duration_ms,
            summary,
            output,
            maintenance_result.error.clone(),
        );
        log::info!(
            "node maintenance_agent: completed status={:?} duration_ms={}",
            result.status,
            duration_ms
        );
        (result, maintenance_result)
    }

    async fn execute_time_series(
        &self,
        graph_result: &GraphResult,
    ) -> (AgentResult, TimeSeriesResult) {
        log::debug!("node time_series_agent: entering, selected=true");
        let started_at = Utc::now();
        let start = Instant::now();
        let agent = TimeSeriesAgent::new(self.time_series_backend);
        let time_series_result = agent.execute(graph_result).await;

        let status = if time_series_result.error.is_none() {
            AgentStatus::Success
        } else {
            AgentStatus::Error
        };
        let summary = if time_series_result.error.is_none() {
            format!(
                "{} measurement(s), {} anomaly(ies), mock={}",
                time_series_result.measurements.len(),
                time_series_result.anomalies.len(),
                time_series_result.is_mock
            )
        } else {
            time_series_result.error.clone().unwrap_or_default()
        };
        if let Some(err) = &time_series_result.error {
            log::warn!("node time_series_agent: error={err}");
        }
        let duration_ms = start.elapsed().as_millis() as u64;
        let output = serde_json::to_value(&time_series_result).unwrap_or(serde_json::Value::Null);
        let result = AgentResult::new(
            agent.name(),
            status,
            started_at,
            duration_ms,
            summary,
            output,
            time_series_result.error.clone(),
        );
        log::info!(
            "node time_series_agent: completed status={:?} duration_ms={}",
            result.status,
            duration_ms
        );
        (result, time_series_result)
    }

    async fn synthesize(&self, state: &WorkflowState) -> (AgentResult, crate::state::Synthesis) {
        log::debug!("node synthesizer: entering, selected=true");
        let started_at = Utc::now();
        let start = Instant::now();
        let synthesizer = Synthesizer::new(self.llm);
        let synthesis = synthesizer.synthesize(state).await;
        let summary = format!(
            "cited {} agent(s): {} chars",
            synthesis.cited_agents.len(),
            synthesis.text.len()
        );
        let duration_ms = start.elapsed().as_millis() as u64;
        let output = serde_json::to_value(&synthesis).unwrap_or(serde_json::Value::Null);
        let result = AgentResult::new(
            synthesizer.name(),
            AgentStatus::Success,
            started_at,
            duration_ms,
            summary,
            output,
            None,
        );
        log::info!(
            "node synthesizer: completed status={:?} duration_ms={}",
            result.status,
            duration_ms
        );
        (result, synthesis)
    }
}

enum NodeOutcome<T> {
    Completed(T),
    TimedOut,
    Cancelled,
}

/// Races a node's future against the cancellation token and a deadline, so
/// in-flight I/O honors cancellation and releases its connections —
/// dropping the future at the `select!` arm drops whatever `reqwest`/
/// `neo4rs` call it was awaiting.
async fn run_node<T>(
    timeout: Duration,
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> NodeOutcome<T> {
    tokio::select! {
        _ = cancel.cancelled() => NodeOutcome::Cancelled,
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(value) => NodeOutcome::Completed(value),
            Err(_) => NodeOutcome::TimedOut,
        },
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn node_timeout_result(agent_name: &str) -> AgentResult {
    AgentResult::new(
        agent_name.to_string(),
        AgentStatus::Error,
        Utc::now(),
        0,
        "node deadline exceeded",
        serde_json::Value::Null,
        Some("timeout".to_string()),
    )
}

fn completion_instant(result: &AgentResult) -> chrono::DateTime<Utc> {
    result.started_at + ChronoDuration::milliseconds(result.duration_ms as i64)
}

fn cancelled_response(state: WorkflowState) -> WorkflowResponse {
    log::warn!("workflow cancelled after {} trace entry(ies)", state.trace.len());
    let mut errors = state.errors;
    errors.push("cancelled".to_string());
    WorkflowResponse {
        answer: String::new(),
        trace: state.trace,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::test_support::FixedGraphStore;
    use crate::llm::test_support::ScriptedClient;
    use crate::tool_protocol::test_support::ScriptedToolSession;
    use serde_json::json;
    use std::collections::HashMap;

    fn timeouts() -> NodeTimeouts {
        NodeTimeouts {
            graph_ms: 5_000,
            maintenance_ms: 5_000,
            time_series_ms: 5_000,
            synthesizer_ms: 5_000,
            workflow_ms: 20_000,
        }
    }

    #[tokio::test]
    async fn off_domain_question_runs_only_intent_and_synthesizer() {
        let llm = ScriptedClient::new(vec![
            Ok(r#"{"needs_graph":false,"needs_maintenance":false,"needs_time_series":false}"#.to_string()),
            Ok("I can only help with plant questions.".to_string()),
        ]);
        let store = FixedGraphStore::rows(vec![]);
        let workflow = Workflow::new(&llm, &store, None, TimeSeriesBackend::Mock, timeouts());
        let response = workflow.run("Hello".to_string(), None, CancellationToken::new()).await;

        assert_eq!(response.trace.len(), 2);
        assert_eq!(response.trace[0].agent_name, "intent");
        assert_eq!(response.trace[1].agent_name, "synthesizer");
        assert!(response.errors.is_empty());
    }

    #[tokio::test]
    async fn graph_only_question_runs_three_nodes() {
        let llm = ScriptedClient::new(vec![
            Ok(r#"{"needs_graph":true,"needs_maintenance":false,"needs_time_series":false}"#.to_string()),
            Ok("MATCH (s:Sensor) RETURN s.name AS name LIMIT 50".to_string()),
            Ok("Here are the sensors in area 40-10.".to_string()),
        ]);
        let store = FixedGraphStore::rows(vec![json!({"name": "4010FI001.DACA.PV"})
            .as_object()
            .unwrap()
            .clone()]);
        let workflow = Workflow::new(&llm, &store, None, TimeSeriesBackend::Mock, timeouts());
        let response = workflow
            .run("What sensors are in area 40-10?".to_string(), None, CancellationToken::new())
            .await;

        assert_eq!(response.trace.len(), 3);
        assert_eq!(response.trace[0].agent_name, "intent");
        assert_eq!(response.trace[1].agent_name, "graph_agent");
        assert_eq!(response.trace[2].agent_name, "synthesizer");
        assert!(response.errors.is_empty());
    }

    #[tokio::test]
    async fn both_maintenance_and_time_series_selected_runs_fanout() {
        let llm = ScriptedClient::new(vec![
            Ok(r#"{"needs_graph":true,"needs_maintenance":true,"needs_time_series":true}"#.to_string()),
            Ok("MATCH (s:Sensor) RETURN s.name AS name LIMIT 50".to_string()),
            Ok("Complete status of 40-10.".to_string()),
        ]);
        let store = FixedGraphStore::rows(vec![json!({"name": "4010FI001.DACA.PV"})
            .as_object()
            .unwrap()
            .clone()]);
        let mut by_sensor = HashMap::new();
        by_sensor.insert("40-10-FI-001".to_string(), Ok(json!([])));
        let tools = ScriptedToolSession { by_sensor };
        let workflow = Workflow::new(
            &llm,
            &store,
            Some(&tools),
            TimeSeriesBackend::Mock,
            timeouts(),
        );
        let response = workflow
            .run("Complete status of 40-10".to_string(), None, CancellationToken::new())
            .await;

        assert_eq!(response.trace.len(), 5);
        let names: Vec<_> = response.trace.iter().map(|r| r.agent_name.clone()).collect();
        assert_eq!(names[0], "intent");
        assert_eq!(names[1], "graph_agent");
        assert!(names[2..4].contains(&"maintenance_agent".to_string()));
        assert!(names[2..4].contains(&"time_series_agent".to_string()));
        assert_eq!(names[4], "synthesizer");
    }

    #[tokio::test]
    async fn graph_failure_skips_downstream_agents() {
        let llm = ScriptedClient::new(vec![
            Ok(r#"{"needs_graph":true,"needs_maintenance":true,"needs_time_series":true}"#.to_string()),
            Ok("MATCH (n) DETACH DELETE n".to_string()),
            Ok("That operation is not supported; here is what I can tell you.".to_string()),
        ]);
        let store = FixedGraphStore::rows(vec![]);
        let workflow = Workflow::new(&llm, &store, None, TimeSeriesBackend::Mock, timeouts());
        let response = workflow
            .run("Delete sensor 40-10-FI-001".to_string(), None, CancellationToken::new())
            .await;

        let statuses: Vec<_> = response
            .trace
            .iter()
            .map(|r| (r.agent_name.clone(), r.status))
            .collect();
        assert!(statuses.contains(&("graph_agent".to_string(), AgentStatus::Error)));
        assert!(statuses.contains(&("maintenance_agent".to_string(), AgentStatus::Skipped)));
        assert!(statuses.contains(&("time_series_agent".to_string(), AgentStatus::Skipped)));
        assert!(!response.errors.is_empty());
    }

    #[tokio::test]
    async fn maintenance_unavailable_still_lets_time_series_and_synthesis_through() {
        let llm = ScriptedClient::new(vec![
            Ok(r#"{"needs_graph":true,"needs_maintenance":true,"needs_time_series":true}"#.to_string()),
            Ok("MATCH (s:Sensor) RETURN s.name AS name LIMIT 50".to_string()),
            Ok("I couldn't reach the maintenance system, but here is the rest.".to_string()),
        ]);
        let store = FixedGraphStore::rows(vec![json!({"name": "4010FI001.DACA.PV"})
            .as_object()
            .unwrap()
            .clone()]);
        // No maintenance tool session configured: agent is unavailable.
        let workflow = Workflow::new(&llm, &store, None, TimeSeriesBackend::Mock, timeouts());
        let response = workflow
            .run("Complete status of 40-10".to_string(), None, CancellationToken::new())
            .await;

        let maintenance_entry = response
            .trace
            .iter()
            .find(|r| r.agent_name == "maintenance_agent")
            .unwrap();
        assert_eq!(maintenance_entry.status, AgentStatus::Error);
        let time_series_entry = response
            .trace
            .iter()
            .find(|r| r.agent_name == "time_series_agent")
            .unwrap();
        assert_eq!(time_series_entry.status, AgentStatus::Success);
        assert!(response.errors.iter().any(|e| e.contains("maintenance")));
    }

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits_before_any_node() {
        let llm = ScriptedClient::new(vec![]);
        let store = FixedGraphStore::rows(vec![]);
        let workflow = Workflow::new(&llm, &store, None, TimeSeriesBackend::Mock, timeouts());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let response = workflow.run("Anything".to_string(), None, cancel).await;

        assert!(response.trace.is_empty());
        assert_eq!(response.errors, vec!["cancelled".to_string()]);
    }
}
