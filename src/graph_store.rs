// Graph-store boundary: a read-only Cypher query function over a
// Cypher-capable graph store.

use crate::error::WorkflowError;
use crate::state::GraphRow;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

pub const SCAN_CEILING: usize = 1_000;

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Runs `cypher` read-only and returns up to `SCAN_CEILING` rows as
    /// plain scalar/map values. The caller (the graph agent) is responsible
    /// for rejecting write clauses before this is reached.
    async fn query(&self, cypher: &str) -> Result<Vec<GraphRow>, WorkflowError>;
}

/// `neo4rs`-backed graph store. One session per workflow, released on exit
/// whether it completes normally or errors.
pub struct Neo4rsGraphStore {
    graph: neo4rs::Graph,
}

impl Neo4rsGraphStore {
    pub async fn connect(
        uri: &str,
        user: &str,
        password: &str,
        database: &str,
    ) -> Result<Self, WorkflowError> {
        let config = neo4rs::ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .db(database)
            .build()
            .map_err(|e| WorkflowError::CypherExecutionError(format!("bad graph config: {e}")))?;
        let graph = neo4rs::Graph::connect(config)
            .await
            .map_err(|e| WorkflowError::CypherExecutionError(format!("connect failed: {e}")))?;
        Ok(Neo4rsGraphStore { graph })
    }

    /// Flattens a decoded row into plain scalar fields: graph-native
    /// node/relationship/date objects are converted by `neo4rs`'s own serde
    /// support into nested JSON, which already gives plain mappings of
    /// scalar fields.
    fn row_to_map(row: neo4rs::Row) -> Result<GraphRow, WorkflowError> {
        let decoded: HashMap<String, Value> = row
            .to()
            .map_err(|e| WorkflowError::CypherExecutionError(format!("row decode failed: {e}")))?;
        Ok(decoded.into_iter().collect())
    }
}

#[async_trait]
impl GraphStore for Neo4rsGraphStore {
    async fn query(&self, cypher: &str) -> Result<Vec<GraphRow>, WorkflowError> {
        let mut stream = self
            .graph
            .execute(neo4rs::query(cypher))
            .await
            .map_err(|e| WorkflowError::CypherExecutionError(e.to_string()))?;

        let mut rows = Vec::new();
        while rows.len() < SCAN_CEILING {
            match stream
                .next()
                .await
                .map_err(|e| WorkflowError::CypherExecutionError(e.to_string()))?
            {
                Some(row) => rows.push(Self::row_to_map(row)?),
                None => break,
            }
        }
        Ok(rows)
    }
}
