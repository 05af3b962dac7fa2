// Graph Agent: question -> Cypher -> result set.

use crate::agents::NamedAgent;
use crate::graph_store::GraphStore;
use crate::llm::{ChatCompletionClient, Message};
use crate::state::{GraphResult, ScopeHint};
use regex::Regex;
use std::sync::OnceLock;

const ROW_CAP: usize = 50;

const SCHEMA_CONTEXT: &str = r#"Node labels: Plant, AssetArea, Equipment, Sensor.
Relationship types: HAS_AREA, HAS_EQUIPMENT, HAS_SENSOR.
Representative properties: Plant.name, AssetArea.name, Equipment.name, Equipment.tag, Sensor.name, Sensor.properties.tag."#;

fn write_clause_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(CREATE|MERGE|DELETE|SET|DROP|REMOVE)\b")
            .expect("static write-clause pattern is valid")
    })
}

pub struct GraphAgent<'a> {
    llm: &'a dyn ChatCompletionClient,
    store: &'a dyn GraphStore,
}

impl<'a> NamedAgent for GraphAgent<'a> {
    fn name(&self) -> &'static str {
        "graph_agent"
    }
}

impl<'a> GraphAgent<'a> {
    pub fn new(llm: &'a dyn ChatCompletionClient, store: &'a dyn GraphStore) -> Self {
        GraphAgent { llm, store }
    }

    pub async fn execute(&self, question: &str, scope: Option<&ScopeHint>) -> GraphResult {
        let cypher = match self.generate_cypher(question, scope).await {
            Ok(cypher) => cypher,
            Err(reason) => {
                return GraphResult {
                    cypher: String::new(),
                    rows: Vec::new(),
                    row_count: 0,
                    error: Some(reason),
                }
            }
        };

        if let Some(reason) = reject_if_write(&cypher) {
            return GraphResult {
                cypher,
                rows: Vec::new(),
                row_count: 0,
                error: Some(reason),
            };
        }

        match self.store.query(&cypher).await {
            Ok(rows) => {
                let row_count = rows.len();
                let mut rows = rows;
                rows.truncate(ROW_CAP);
                GraphResult {
                    cypher,
                    rows,
                    row_count,
                    error: None,
                }
            }
            Err(e) => GraphResult {
                cypher,
                rows: Vec::new(),
                row_count: 0,
                error: Some(e.to_string()),
            },
        }
    }

    async fn generate_cypher(
        &self,
        question: &str,
        scope: Option<&ScopeHint>,
    ) -> Result<String, String> {
        let mut system_prompt = format!(
            "You are a Cypher query generator for an industrial plant graph database.\n{SCHEMA_CONTEXT}\n\
            Reply with a single read-only Cypher statement that answers the question. \
            Never use CREATE, MERGE, DELETE, SET, DROP, or REMOVE. Limit results to at most {ROW_CAP} rows. \
            Reply with ONLY the Cypher statement, no prose, no code fences."
        );

        if let Some(scope) = scope {
            system_prompt.push_str(&format!(
                "\nHard constraint: restrict results to {} = \"{}\". If it is an AssetArea, include its equipment and sensors transitively, restricting traversal to at most {} hop(s) from the named node.",
                scope.node_type,
                scope.node_name,
                scope.scope_depth.hops()
            ));
        }

        let messages = [
            Message::system(system_prompt),
            Message::user(question.to_string()),
        ];

        let reply = self
            .llm
            .complete(&messages, 500)
            .await
            .map_err(|e| e.to_string())?;

        let cypher = strip_code_fence(&reply).trim().to_string();
        if cypher.is_empty() {
            return Err("empty LLM reply".to_string());
        }
        Ok(cypher)
    }
}

fn reject_if_write(cypher: &str) -> Option<String> {
    if write_clause_pattern().is_match(cypher) {
        Some("write clause rejected".to_string())
    } else {
        None
    }
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    trimmed
        .strip_prefix("```cypher")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::test_support::FixedGraphStore;
    use crate::llm::test_support::ScriptedClient;
    use serde_json::json;

    #[tokio::test]
    async fn happy_path_returns_rows() {
        let llm = ScriptedClient::new(vec![Ok(
            "MATCH (s:Sensor) RETURN s.name AS name LIMIT 50".to_string(),
        )]);
        let store = FixedGraphStore::rows(vec![json!({"name": "4010FI001.DACA.PV"})
            .as_object()
            .unwrap()
            .clone()]);
        let agent = GraphAgent::new(&llm, &store);
        let result = agent.execute("What sensors are in 40-10?", None).await;
        assert!(result.is_success());
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows.len(), 1);
    }

    #[tokio::test]
    async fn rejects_write_clause() {
        let llm = ScriptedClient::new(vec![Ok("MATCH (s:Sensor) DETACH DELETE s".to_string())]);
        let store = FixedGraphStore::rows(vec![]);
        let agent = GraphAgent::new(&llm, &store);
        let result = agent.execute("Delete sensor 40-10-FI-001", None).await;
        assert_eq!(result.error.as_deref(), Some("write clause rejected"));
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn truncates_to_fifty_rows_but_keeps_true_row_count() {
        let llm = ScriptedClient::new(vec![Ok("MATCH (s:Sensor) RETURN s.name".to_string())]);
        let many_rows: Vec<_> = (0..51)
            .map(|i| json!({"name": format!("sensor-{i}")}).as_object().unwrap().clone())
            .collect();
        let store = FixedGraphStore::rows(many_rows);
        let agent = GraphAgent::new(&llm, &store);
        let result = agent.execute("list all sensors", None).await;
        assert_eq!(result.row_count, 51);
        assert_eq!(result.rows.len(), 50);
    }

    #[tokio::test]
    async fn store_error_surfaces_as_graph_error() {
        let llm = ScriptedClient::new(vec![Ok("MATCH (s:Sensor) RETURN s.name".to_string())]);
        let store = FixedGraphStore::failing("connection refused");
        let agent = GraphAgent::new(&llm, &store);
        let result = agent.execute("list sensors", None).await;
        assert!(result.error.is_some());
        assert_eq!(result.row_count, 0);
    }

    #[test]
    fn write_clause_regex_allows_read_only_call_yield_but_catches_write_keywords() {
        assert!(reject_if_write("CALL db.index.fulltext.queryNodes('x', 'y') YIELD node").is_none());
        assert!(reject_if_write("MATCH (n) DETACH DELETE n").is_some());
        assert!(reject_if_write("MATCH (n) RETURN n").is_none());
    }
}
