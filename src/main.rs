use clap::Parser;
use dialect_proxy::config::config_search_paths;
use dialect_proxy::providers::ProviderPreset;
use dialect_proxy::{build_router, AppState, Backend, HttpBackend, ProxyConfig, SharedPromptLog};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "dialect-proxy",
    about = "Serve OpenAI, Claude and Gemini clients from any one of those backends",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend preset name (overrides config)
    #[arg(long)]
    backend: Option<String>,

    /// Prompt log file (JSONL, overrides config)
    #[arg(long)]
    prompt_log: Option<PathBuf>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dialect_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref backend) = cli.backend {
        config.backend.name = backend.clone();
        if let Some(preset) = ProviderPreset::from_name(backend) {
            config.backend.base_url = Some(preset.base_url.to_string());
            config.backend.api_key_env = Some(preset.default_api_key_env.to_string());
            config.backend.protocol = Some(preset.protocol);
        }
    }
    if let Some(path) = cli.prompt_log {
        config.prompt_log = Some(path);
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let backend = HttpBackend::from_config(&config, client)?;
    backend.initialize().await?;

    info!("dialect-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Backend:   {} ({})", config.backend.name, backend.protocol());
    info!("  Base URL:  {}", config.effective_base_url()?);
    info!("  Models:    {} mapped", config.models.len());

    let mut state = AppState::new(config.clone(), Arc::new(backend))?;
    if let Some(ref path) = config.prompt_log {
        state = state.with_prompt_log(SharedPromptLog::new(path)?);
        info!("  Prompt log: {}", path.display());
    }

    let app = build_router(Arc::new(state));
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OpenAI clients: OPENAI_BASE_URL=http://{}/v1", bind_addr);
    info!("  Claude clients: ANTHROPIC_BASE_URL=http://{}", bind_addr);
    info!("  Gemini clients: http://{}/v1beta", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
