mod config;
mod status_cmd;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use atlas_core::LlmProvider;
use atlas_gateway::{GatewayState, start_server};
use atlas_orchestrator::{EngineConfig, ModeSource, Orchestrator};
use atlas_planner::providers::mock::MockProvider;
use atlas_planner::providers::openai_compat::OpenAiCompatProvider;
use atlas_planner::{LlmCrew, LlmIntentClassifier, ProviderRegistry, ProviderRouter};

use config::Config;

#[derive(Parser)]
#[command(name = "atlas")]
#[command(about = "Atlas: multi-agent chat orchestrator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator HTTP server
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show health and provider circuit state of a running server
    Status {
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            atlas_logging::init_logger(&config.log_dir, &config.log_level)?;
            let config = Config {
                port: port.unwrap_or(config.port),
                ..config
            };
            run_server(config).await?;
        }
        Commands::Status { port } => {
            status_cmd::run(port.unwrap_or(config.port)).await?;
        }
    }

    Ok(())
}

fn build_registry(config: &Config) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    for name in &config.provider_order {
        let provider: Arc<dyn LlmProvider> = match name.as_str() {
            "ollama" => {
                let mut ollama = OpenAiCompatProvider::ollama(&config.ollama_url);
                if let Some(model) = &config.ollama_model {
                    ollama = ollama.with_model(model);
                }
                info!(url = %config.ollama_url, "Registered Ollama provider");
                Arc::new(ollama)
            }
            "fallback" => {
                let mut fallback = OpenAiCompatProvider::new("fallback", &config.fallback_api_base);
                if let Some(key) = &config.fallback_api_key {
                    fallback = fallback.with_api_key(key);
                }
                if let Some(model) = &config.fallback_model {
                    fallback = fallback.with_model(model);
                }
                info!(url = %config.fallback_api_base, "Registered fallback provider");
                Arc::new(fallback)
            }
            "mock" => {
                warn!("Registered mock provider; replies are canned");
                Arc::new(MockProvider::new("mock"))
            }
            other => {
                warn!(provider = %other, "Unknown provider in PROVIDER_ORDER, skipping");
                continue;
            }
        };
        registry.register(name.clone(), provider);
    }
    registry
}

async fn run_server(config: Config) -> Result<()> {
    info!(
        port = config.port,
        bind = %config.bind_address,
        providers = ?config.provider_order,
        "Starting Atlas orchestrator"
    );

    let registry = build_registry(&config);
    if registry.is_empty() {
        warn!("No providers registered; every agent call will fail");
    }

    let router = Arc::new(
        ProviderRouter::new(Arc::new(registry))
            .with_order(config.provider_order.clone())
            .with_timeout(config.provider_timeout()),
    );

    let classifier = LlmIntentClassifier::new(router.clone())
        .with_heuristic_fallback(config.heuristic_fallback);
    let crew = LlmCrew::new(router.clone());

    let engine_config = EngineConfig {
        mode: ModeSource::Env,
        max_refinement_cycles: config.max_refinement_cycles,
        intent_cache_capacity: config.intent_cache_size,
        intent_cache_ttl: Duration::from_millis(config.intent_cache_ttl_ms),
        session_idle_ttl: Duration::from_secs(config.session_idle_ttl_secs),
    };
    let orchestrator = Orchestrator::new(Arc::new(classifier), Arc::new(crew), engine_config)
        .with_router(router);

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.bind_address, config.port))?;

    start_server(addr, GatewayState::new(Arc::new(orchestrator))).await
}
