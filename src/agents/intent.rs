// Intent Classifier.

use crate::agents::NamedAgent;
use crate::llm::{ChatCompletionClient, Message};
use crate::state::{Intent, ScopeHint};
use serde::Deserialize;

const SYSTEM_PROMPT: &str = r#"You are the intent classifier for an industrial plant question-answering system.
Given a user's question, decide which of three downstream data sources are needed to answer it:
- needs_graph: the plant's asset graph (plants, areas, equipment, sensors) must be consulted.
- needs_maintenance: work-order / maintenance history for named sensors is needed.
- needs_time_series: recent measurements or anomaly flags for named sensors are needed.

Rules:
- If either needs_maintenance or needs_time_series is true, needs_graph MUST also be true, because those agents require sensor names discovered from the graph.
- If the question is entirely unrelated to the plant (greetings, chit-chat, anything off-domain), set all three flags to false.

Reply with ONLY a JSON object of the exact shape:
{"needs_graph": bool, "needs_maintenance": bool, "needs_time_series": bool}
No prose, no code fences."#;

#[derive(Deserialize)]
struct IntentReply {
    needs_graph: bool,
    needs_maintenance: bool,
    needs_time_series: bool,
}

pub struct IntentClassifier<'a> {
    llm: &'a dyn ChatCompletionClient,
}

impl<'a> NamedAgent for IntentClassifier<'a> {
    fn name(&self) -> &'static str {
        "intent"
    }
}

impl<'a> IntentClassifier<'a> {
    pub fn new(llm: &'a dyn ChatCompletionClient) -> Self {
        IntentClassifier { llm }
    }

    pub async fn classify(&self, question: &str, scope: Option<&ScopeHint>) -> Intent {
        let mut user_prompt = format!("Question: {question}");
        if let Some(scope) = scope {
            user_prompt.push_str(&format!(
                "\nScope hint: {} \"{}\" (depth {})",
                scope.node_type,
                scope.node_name,
                scope.scope_depth.hops()
            ));
        }

        let messages = [Message::system(SYSTEM_PROMPT), Message::user(user_prompt)];

        let reply = match self.llm.complete(&messages, 200).await {
            Ok(reply) => reply,
            Err(_) => return Intent::fallback(),
        };

        let cleaned = strip_code_fence(&reply);
        match serde_json::from_str::<IntentReply>(cleaned) {
            Ok(parsed) => {
                let mut intent = Intent {
                    needs_graph: parsed.needs_graph,
                    needs_maintenance: parsed.needs_maintenance,
                    needs_time_series: parsed.needs_time_series,
                };
                // Invariant: selecting a downstream agent implies graph.
                if intent.needs_maintenance || intent.needs_time_series {
                    intent.needs_graph = true;
                }
                intent
            }
            Err(_) => Intent::fallback(),
        }
    }
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_support::ScriptedClient;

    #[tokio::test]
    async fn parses_well_formed_reply() {
        let llm = ScriptedClient::new(vec![Ok(
            r#"{"needs_graph":true,"needs_maintenance":true,"needs_time_series":false}"#.to_string(),
        )]);
        let classifier = IntentClassifier::new(&llm);
        let intent = classifier.classify("Are there work orders in 40-10?", None).await;
        assert!(intent.needs_graph);
        assert!(intent.needs_maintenance);
        assert!(!intent.needs_time_series);
    }

    #[tokio::test]
    async fn falls_back_on_malformed_reply() {
        let llm = ScriptedClient::new(vec![Ok("not json at all".to_string())]);
        let classifier = IntentClassifier::new(&llm);
        let intent = classifier.classify("whatever", None).await;
        assert_eq!(intent, Intent::fallback());
    }

    #[tokio::test]
    async fn forces_graph_true_when_maintenance_selected() {
        let llm = ScriptedClient::new(vec![Ok(
            r#"{"needs_graph":false,"needs_maintenance":true,"needs_time_series":false}"#.to_string(),
        )]);
        let classifier = IntentClassifier::new(&llm);
        let intent = classifier.classify("work orders?", None).await;
        assert!(intent.needs_graph);
    }

    #[tokio::test]
    async fn off_domain_question_clears_all_flags() {
        let llm = ScriptedClient::new(vec![Ok(
            r#"{"needs_graph":false,"needs_maintenance":false,"needs_time_series":false}"#.to_string(),
        )]);
        let classifier = IntentClassifier::new(&llm);
        let intent = classifier.classify("Hello", None).await;
        assert_eq!(intent, Intent::off_domain());
    }
}
