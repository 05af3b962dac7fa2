// Crate configuration, assembled from the process environment.
//
// A plain struct built by a constructor, no TOML/YAML layer; values come
// from `std::env` (optionally seeded by a `.env` file) rather than a config
// file path.

use crate::error::ConfigError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NodeTimeouts {
    pub graph_ms: u64,
    pub maintenance_ms: u64,
    pub time_series_ms: u64,
    pub synthesizer_ms: u64,
    pub workflow_ms: u64,
}

impl Default for NodeTimeouts {
    fn default() -> Self {
        NodeTimeouts {
            graph_ms: 10_000,
            maintenance_ms: 15_000,
            time_series_ms: 10_000,
            synthesizer_ms: 20_000,
            workflow_ms: 45_000,
        }
    }
}

impl NodeTimeouts {
    pub fn graph(&self) -> Duration {
        Duration::from_millis(self.graph_ms)
    }
    pub fn maintenance(&self) -> Duration {
        Duration::from_millis(self.maintenance_ms)
    }
    pub fn time_series(&self) -> Duration {
        Duration::from_millis(self.time_series_ms)
    }
    pub fn synthesizer(&self) -> Duration {
        Duration::from_millis(self.synthesizer_ms)
    }
    pub fn workflow(&self) -> Duration {
        Duration::from_millis(self.workflow_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,

    pub graph_uri: String,
    pub graph_user: String,
    pub graph_password: String,
    pub graph_database: String,

    pub maintenance_mcp_url: Option<String>,
    pub time_series_use_real: bool,

    pub node_timeouts: NodeTimeouts,

    pub log_level: String,
    pub log_format: LogFormat,
}

fn required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError(format!("missing required environment variable {key}")))
}

fn optional_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError(format!("{key} must be an integer number of milliseconds"))),
        Err(_) => Ok(default),
    }
}

fn optional_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

impl Config {
    /// Loads a `.env` file if present, then reads configuration from the
    /// environment. A missing required value is a construction-time error,
    /// never a panic reached later at call time.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let defaults = NodeTimeouts::default();
        let node_timeouts = NodeTimeouts {
            graph_ms: optional_u64("GRAPH_TIMEOUT_MS", defaults.graph_ms)?,
            maintenance_ms: optional_u64("MAINTENANCE_TIMEOUT_MS", defaults.maintenance_ms)?,
            time_series_ms: optional_u64("TIME_SERIES_TIMEOUT_MS", defaults.time_series_ms)?,
            synthesizer_ms: optional_u64("SYNTHESIZER_TIMEOUT_MS", defaults.synthesizer_ms)?,
            workflow_ms: optional_u64("WORKFLOW_TIMEOUT_MS", defaults.workflow_ms)?,
        };

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Config {
            llm_api_key: required("LLM_API_KEY")?,
            llm_base_url: required("LLM_BASE_URL")?,
            llm_model: required("LLM_MODEL")?,

            graph_uri: required("GRAPH_URI")?,
            graph_user: required("GRAPH_USER")?,
            graph_password: required("GRAPH_PASSWORD")?,
            graph_database: env::var("GRAPH_DATABASE").unwrap_or_else(|_| "neo4j".to_string()),

            maintenance_mcp_url: env::var("MAINTENANCE_MCP_URL").ok(),
            time_series_use_real: optional_bool("TIME_SERIES_USE_REAL", false),

            node_timeouts,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
        })
    }
}
