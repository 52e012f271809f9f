//! Warden server entry point
//!
//! Loads configuration, opens storage, wires the model runtime and the demo
//! tool set through the mediation layer, and serves the HTTP API.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use warden_api::{AppState, HeaderAuthProvider, WardenServer};
use warden_common::SystemConfig;
use warden_mediation::hitl::RiskPolicy;
use warden_mediation::tools::demo_tools;
use warden_mediation::{ChatCompletionsRuntime, Orchestrator, RiskAssessor, ToolRegistry};

#[derive(Parser)]
#[command(name = "warden-server")]
#[command(version = "0.1.0")]
#[command(about = "Risk-aware tool mediation server for conversational assistants")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "WARDEN_CONFIG", default_value = "warden.toml")]
    config: String,

    /// PostgreSQL connection string, overrides `storage.postgres_url`
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "RUST_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Server {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate configuration and print the tool policy
    ValidateConfig,
}

fn load_config(cli: &Cli) -> Result<SystemConfig> {
    let mut config = if Path::new(&cli.config).exists() {
        SystemConfig::from_file(&cli.config).with_context(|| format!("loading {}", cli.config))?
    } else {
        warn!("Configuration file {} not found, using defaults", cli.config);
        SystemConfig::default()
    };
    if let Some(url) = &cli.database_url {
        config.storage.postgres_url = Some(url.clone());
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.as_deref().unwrap_or("info");
    warden_common::init_tracing_with_level(log_level)?;

    info!("Warden server v0.1.0 starting");

    let config = load_config(&cli).map_err(|e| {
        error!("Failed to load configuration: {:#}", e);
        e
    })?;
    info!("Configuration loaded successfully");

    match cli.command {
        Some(Commands::ValidateConfig) => validate(&config),
        Some(Commands::Server { host, port }) => {
            let mut config = config;
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            start_server(config).await
        }
        None => start_server(config).await,
    }
}

fn validate(config: &SystemConfig) -> Result<()> {
    let assessor = RiskAssessor::new(RiskPolicy::from_config(&config.risk));
    let registry = ToolRegistry::builder().register_all(demo_tools()).build(&assessor)?;

    println!("✓ Configuration is valid");
    println!("  Model: {} at {}", config.model.model, config.model.endpoint);
    println!("  Storage: {}", if config.storage.postgres_url.is_some() { "postgres" } else { "in-memory" });
    println!("  Audit fails closed at: {}", config.audit.fail_closed_at);
    println!("  Tools:");
    for name in registry.names() {
        if let Some(tool) = registry.get(name) {
            let category = tool.category.map(|c| c.to_string()).unwrap_or_else(|| "unlisted".to_string());
            println!("    - {} ({}, {})", name, category, tool.agent_role);
        }
    }
    Ok(())
}

async fn start_server(config: SystemConfig) -> Result<()> {
    info!("Starting Warden server on {}:{}", config.server.host, config.server.port);

    let persistence = warden_storage::initialize_storage(&config.storage)
        .await
        .context("opening storage")?;
    let runtime = Arc::new(ChatCompletionsRuntime::from_config(&config.model)?);
    let assessor = Arc::new(RiskAssessor::new(RiskPolicy::from_config(&config.risk)));
    let registry = ToolRegistry::builder().register_all(demo_tools()).build(&assessor)?;
    info!("Registered {} mediated tools", registry.len());

    let orchestrator = Orchestrator::new(runtime, Arc::new(registry), assessor, persistence, &config);
    let state = AppState::new(Arc::new(orchestrator), Arc::new(HeaderAuthProvider));

    WardenServer::new(config.server.clone(), state).run().await
}
