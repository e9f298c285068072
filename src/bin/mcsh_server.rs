//! Model Context Shell MCP server binary entry point.
//!
//! Run with: cargo run --bin mcsh-server

use rmcp::{transport::stdio, ServiceExt};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use mcsh::config::EngineConfig;
use mcsh::facade::Engine;
use mcsh::mcp::ModelContextShellService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::from_env().map_err(|e| {
        eprintln!("startup failed: invalid configuration: {e}");
        e
    })?;

    info!("Model Context Shell v{}", env!("CARGO_PKG_VERSION"));
    if config.runtime_addr.is_none() {
        info!("MCSH_RUNTIME_ADDR unset: starting with no remote tool servers");
    }

    let engine = Engine::new(&config);
    let service = ModelContextShellService::new(engine)
        .serve(stdio())
        .await?;

    info!("model-context-shell running, waiting for requests...");
    service.waiting().await?;

    info!("model-context-shell shutting down");
    Ok(())
}
