//! hsaql MCP server with OpenAI integration
//!
//! Model Context Protocol server that turns natural language questions about
//! the HSA dataset into SQL using OpenAI and executes them against DuckDB.

use hsaql_duck::{DatasetSource, DuckExecutor};
use hsaql_schema::get_schema;
use rust_mcp_sdk::mcp_server::{hyper_server, HyperServerOptions};
use std::sync::Arc;
use tracing::{info, warn};

mod config;
mod llm;
mod logging;
mod mcp;
mod query;
mod translate;

use config::Config;
use llm::OpenAiProvider;
use query::QueryService;
use translate::QueryTranslator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = std::env::var("HSAQL_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path)?;

    config.apply_logging_env();
    logging::init();

    // Missing credentials or dataset are the only fatal errors
    let api_key = Config::get_openai_api_key()?;
    info!("OpenAI API key loaded");

    let executor = DuckExecutor::for_schema(DatasetSource::file(&config.dataset.path), get_schema())
        .with_budget(config.execution.budget());
    executor.check_source()?;
    info!("Dataset: {}", config.dataset.path);

    if config.dataset.check_schema {
        match executor.describe_source() {
            Ok(described) => {
                let drift = get_schema().diff(&described);
                if !drift.is_empty() {
                    warn!(
                        missing = ?drift.missing,
                        undeclared = ?drift.undeclared,
                        mismatched = ?drift.mismatched,
                        "Dataset columns differ from the declared schema"
                    );
                }
            }
            // A CSV lacking a declared column cannot be opened with forced types
            Err(e) => warn!("Could not read dataset columns: {}", e),
        }
    }

    let provider = OpenAiProvider::from_api_key(api_key, &config.llm);
    info!("Using OpenAI model: {}", provider.model());
    let translator = QueryTranslator::new(Arc::new(provider), get_schema(), config.llm.timeout());
    let queries = QueryService::new(Arc::new(executor), config.execution.timeout());

    // Create MCP server handler
    let handler = mcp::HsaqlServerHandler::new(translator, queries);
    let server_info = mcp::HsaqlServerHandler::server_info();

    let host = config.server.host.clone();
    let port = config.server.port;

    info!("Starting hsaql MCP server on {}:{}", host, port);
    info!("Protocol: MCP with SSE (Server-Sent Events) support");

    // Create MCP server with SSE support
    let server = hyper_server::create_server(
        server_info,
        handler,
        HyperServerOptions {
            host,
            port,
            sse_support: true,
            ..Default::default()
        },
    );

    server.start().await?;

    Ok(())
}
