// Synthesizer: composes the final natural-language answer from whatever
// agent outputs exist. Always runs last; never fatal.

use crate::agents::NamedAgent;
use crate::llm::{ChatCompletionClient, Message};
use crate::state::{Synthesis, WorkflowState};
use std::collections::BTreeSet;

/// Per-agent excerpt budget injected into the synthesis prompt: no more
/// than ~2 KB per agent.
const EXCERPT_BUDGET_BYTES: usize = 2_048;

const SYSTEM_PROMPT: &str = r#"You are the final-answer synthesizer for an industrial plant question-answering system.
Compose a professional, industrial-tone natural-language answer from the agent context you are given.
Rules:
- Explicitly cite which agents contributed (graph, maintenance, time-series) in your reasoning, not necessarily by name in the prose.
- Never fabricate sensor names or work-order numbers that are not present in the context you were given.
- If a requested data source was unavailable or errored, explicitly acknowledge that in the answer rather than silently omitting it.
- Keep the answer concise and grounded only in the supplied context."#;

pub struct Synthesizer<'a> {
    llm: &'a dyn ChatCompletionClient,
}

impl<'a> NamedAgent for Synthesizer<'a> {
    fn name(&self) -> &'static str {
        "synthesizer"
    }
}

impl<'a> Synthesizer<'a> {
    pub fn new(llm: &'a dyn ChatCompletionClient) -> Self {
        Synthesizer { llm }
    }

    pub async fn synthesize(&self, state: &WorkflowState) -> Synthesis {
        // Invariant 3: no graph means no downstream agent ran; the
        // synthesizer sees only the question.
        if state.intent.map(|i| !i.needs_graph).unwrap_or(true) && state.graph_result.is_none() {
            return Synthesis {
                text: off_domain_reply(&state.question),
                cited_agents: BTreeSet::new(),
            };
        }

        let (context, cited_agents) = build_context(state);

        let user_prompt = format!(
            "Question: {}\n\nAgent context:\n{}",
            state.question, context
        );
        let messages = [Message::system(SYSTEM_PROMPT), Message::user(user_prompt)];

        match self.llm.complete(&messages, 2_000).await {
            Ok(text) if !text.trim().is_empty() => Synthesis {
                text: text.trim().to_string(),
                cited_agents,
            },
            _ => Synthesis {
                text: template_fallback(state),
                cited_agents,
            },
        }
    }
}

fn off_domain_reply(question: &str) -> String {
    format!(
        "I can help with questions about the plant's assets, maintenance, and sensor data, \
         but \"{question}\" doesn't look like one of those. Could you rephrase it around a \
         plant, area, equipment, or sensor?"
    )
}

/// Builds the compact context string: per present agent result, its
/// summary plus a bounded excerpt of its output.
fn build_context(state: &WorkflowState) -> (String, BTreeSet<String>) {
    let mut sections = Vec::new();
    let mut cited = BTreeSet::new();

    if let Some(graph) = &state.graph_result {
        cited.insert("graph".to_string());
        let body = if let Some(err) = &graph.error {
            format!("graph agent failed: {err}")
        } else {
            format!(
                "graph agent returned {} row(s) via Cypher `{}`:\n{}",
                graph.row_count,
                graph.cypher,
                excerpt(&serde_json::to_string(&graph.rows).unwrap_or_default())
            )
        };
        sections.push(body);
    }

    if let Some(maintenance) = &state.maintenance_result {
        cited.insert("maintenance".to_string());
        let body = if let Some(err) = &maintenance.error {
            format!("maintenance agent unavailable: {err}")
        } else {
            format!(
                "maintenance agent found {} work order(s):\n{}",
                maintenance.work_orders.len(),
                excerpt(&serde_json::to_string(&maintenance.work_orders).unwrap_or_default())
            )
        };
        sections.push(body);
    }

    if let Some(time_series) = &state.time_series_result {
        cited.insert("time-series".to_string());
        let body = if let Some(err) = &time_series.error {
            format!("time-series agent failed: {err}")
        } else {
            format!(
                "time-series agent returned {} measurement(s), {} anomaly(ies) (mock={}):\n{}",
                time_series.measurements.len(),
                time_series.anomalies.len(),
                time_series.is_mock,
                excerpt(&serde_json::to_string(&time_series.anomalies).unwrap_or_default())
            )
        };
        sections.push(body);
    }

    (sections.join("\n\n"), cited)
}

fn excerpt(raw: &str) -> &str {
    if raw.len() <= EXCERPT_BUDGET_BYTES {
        raw
    } else {
        // Round down to a char boundary so truncation can never panic on
        // multi-byte UTF-8.
        let mut end = EXCERPT_BUDGET_BYTES;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        &raw[..end]
    }
}

/// Deterministic fallback used on LLM failure or an empty reply:
/// concatenate per-agent summaries, prefixed by a header.
fn template_fallback(state: &WorkflowState) -> String {
    let mut lines = vec![format!("Here is what I found for: {}", state.question)];

    if let Some(graph) = &state.graph_result {
        if let Some(err) = &graph.error {
            lines.push(format!("- Graph lookup failed: {err}"));
        } else {
            lines.push(format!("- Graph lookup returned {} row(s).", graph.row_count));
        }
    }

    if let Some(maintenance) = &state.maintenance_result {
        if let Some(err) = &maintenance.error {
            lines.push(format!("- Maintenance data unavailable: {err}"));
        } else {
            lines.push(format!(
                "- Maintenance lookup found {} work order(s).",
                maintenance.work_orders.len()
            ));
        }
    }

    if let Some(time_series) = &state.time_series_result {
        if let Some(err) = &time_series.error {
            lines.push(format!("- Time-series lookup failed: {err}"));
        } else {
            lines.push(format!(
                "- Time-series lookup found {} anomaly(ies) across {} measurement(s).",
                time_series.anomalies.len(),
                time_series.measurements.len()
            ));
        }
    }

    lines.join("\n")
}
