// Integration coverage for Config::from_env's construction-time error
// behavior: a missing required variable is an error, never a panic
// reached later at call time.

use plant_agent_core::Config;
use std::env;
use std::sync::Mutex;

// Config::from_env reads process-global environment state, so serialize
// access across tests in this file to avoid cross-test interference.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_known_vars() {
    for key in [
        "LLM_API_KEY",
        "LLM_BASE_URL",
        "LLM_MODEL",
        "GRAPH_URI",
        "GRAPH_USER",
        "GRAPH_PASSWORD",
        "GRAPH_DATABASE",
        "MAINTENANCE_MCP_URL",
        "TIME_SERIES_USE_REAL",
        "GRAPH_TIMEOUT_MS",
    ] {
        // SAFETY: serialized behind ENV_LOCK, single-threaded test access.
        unsafe { env::remove_var(key) };
    }
}

fn set_var(key: &str, value: &str) {
    // SAFETY: serialized behind ENV_LOCK, single-threaded test access.
    unsafe { env::set_var(key, value) };
}

#[test]
fn missing_required_llm_api_key_is_a_config_error_not_a_panic() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_known_vars();

    let result = Config::from_env();
    assert!(result.is_err());
}

#[test]
fn fully_specified_environment_loads_with_documented_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_known_vars();

    set_var("LLM_API_KEY", "test-key");
    set_var("LLM_BASE_URL", "https://llm.internal.example/v1");
    set_var("LLM_MODEL", "plant-ops-7b");
    set_var("GRAPH_URI", "bolt://localhost:7687");
    set_var("GRAPH_USER", "neo4j");
    set_var("GRAPH_PASSWORD", "secret");

    let config = Config::from_env().expect("all required vars are set");
    assert_eq!(config.graph_database, "neo4j");
    assert_eq!(config.llm_base_url, "https://llm.internal.example/v1");
    assert_eq!(config.llm_model, "plant-ops-7b");
    assert!(config.maintenance_mcp_url.is_none());
    assert!(!config.time_series_use_real);
    assert_eq!(config.node_timeouts.workflow_ms, 45_000);

    clear_known_vars();
}

#[test]
fn missing_llm_base_url_or_model_is_a_config_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_known_vars();

    set_var("LLM_API_KEY", "test-key");
    set_var("GRAPH_URI", "bolt://localhost:7687");
    set_var("GRAPH_USER", "neo4j");
    set_var("GRAPH_PASSWORD", "secret");

    // LLM_BASE_URL and LLM_MODEL are both unset: no hard-coded provider
    // endpoint or model to fall back to.
    let result = Config::from_env();
    assert!(result.is_err());

    set_var("LLM_BASE_URL", "https://llm.internal.example/v1");
    let result = Config::from_env();
    assert!(result.is_err(), "LLM_MODEL is still unset");

    clear_known_vars();
}

#[test]
fn invalid_timeout_override_is_a_config_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_known_vars();

    set_var("LLM_API_KEY", "test-key");
    set_var("LLM_BASE_URL", "https://llm.internal.example/v1");
    set_var("LLM_MODEL", "plant-ops-7b");
    set_var("GRAPH_URI", "bolt://localhost:7687");
    set_var("GRAPH_USER", "neo4j");
    set_var("GRAPH_PASSWORD", "secret");
    set_var("GRAPH_TIMEOUT_MS", "not-a-number");

    let result = Config::from_env();
    assert!(result.is_err());

    clear_known_vars();
}
