//! Demonstration binary: loads configuration, wires up the real (non-mock)
//! external dependencies, and runs one question taken from the command
//! line, printing the answer and execution trace. It exists to prove the
//! crate links and runs end-to-end; it carries no HTTP/CSV/UI surface.

use plant_agent_core::agents::time_series::Backend as TimeSeriesBackend;
use plant_agent_core::config::{Config, LogFormat};
use plant_agent_core::graph_store::Neo4rsGraphStore;
use plant_agent_core::llm::OpenAiCompatibleClient;
use plant_agent_core::tool_protocol::RemoteToolSession;
use plant_agent_core::workflow::Workflow;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "What sensors are in area 40-10?".to_string());

    let config = Config::from_env()?;
    init_logger(&config);

    log::info!("connecting to graph store at {}", config.graph_uri);
    let graph_store = Neo4rsGraphStore::connect(
        &config.graph_uri,
        &config.graph_user,
        &config.graph_password,
        &config.graph_database,
    )
    .await?;

    let llm = OpenAiCompatibleClient::new(
        config.llm_base_url.clone(),
        config.llm_api_key.clone(),
        config.llm_model.clone(),
    );

    let maintenance_tools = config
        .maintenance_mcp_url
        .as_ref()
        .map(|url| RemoteToolSession::new(url.clone()));

    let time_series_backend = if config.time_series_use_real {
        log::warn!("TIME_SERIES_USE_REAL is set but no real backend session is wired up here; falling back to mock");
        TimeSeriesBackend::Mock
    } else {
        TimeSeriesBackend::Mock
    };

    let workflow = Workflow::new(
        &llm,
        &graph_store,
        maintenance_tools.as_ref().map(|t| t as &dyn plant_agent_core::tool_protocol::ToolSession),
        time_series_backend,
        config.node_timeouts.clone(),
    );

    let response = workflow
        .run(question, None, CancellationToken::new())
        .await;

    println!("Answer:\n{}\n", response.answer);
    println!("Trace:");
    for entry in &response.trace {
        println!(
            "  - {:<20} {:?}  {:>5}ms  {}",
            entry.agent_name, entry.status, entry.duration_ms, entry.summary
        );
    }
    if !response.errors.is_empty() {
        println!("\nErrors:");
        for error in &response.errors {
            println!("  - {error}");
        }
    }

    Ok(())
}

fn init_logger(config: &Config) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.clone()),
    );
    if config.log_format == LogFormat::Json {
        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                r#"{{"level":"{}","target":"{}","message":"{}"}}"#,
                record.level(),
                record.target(),
                record.args()
            )
        });
    }
    builder.init();
}
