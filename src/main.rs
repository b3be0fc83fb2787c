use claude_bridge::config::config_search_paths;
use claude_bridge::{build_router, AppState, GatewayConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-bridge",
    about = "Serve the Anthropic Messages API on top of an OpenAI-compatible provider",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream base URL (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Log file path (overrides config)
    #[arg(long)]
    log_file: Option<PathBuf>,

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
                .unwrap_or_else(|_| "claude_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        println!("  (none found: environment variables)");
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(base_url) = cli.base_url {
        config.upstream.base_url = base_url;
    }
    if let Some(log_file) = cli.log_file {
        config.log.file = log_file;
    }

    // Fail at startup, not on the first request.
    let api_key = config.resolve_api_key()?;
    let logger = SharedLogger::new(&config.log.file, config.log.level)?;

    info!("claude-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:   {}", config.upstream.chat_completions_url());
    info!("  Big model:  {}", config.models.big);
    info!("  Small model: {}", config.models.small);
    info!(
        "  Cache:      {}",
        if config.cache.enabled {
            format!("enabled (marker '{}')", config.cache.marker)
        } else {
            "disabled".to_string()
        }
    );
    info!("  Log file:   {}", config.log.file.display());

    logger.info(
        "startup",
        format!(
            "Starting claude-bridge upstream={} big={} small={}",
            config.upstream.base_url, config.models.big, config.models.small
        ),
    );

    let bind_addr = config.bind_addr();
    let port = config.server.port;
    let state = Arc::new(AppState::new(config, api_key, logger)?);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  ANTHROPIC_BASE_URL=http://localhost:{} claude", port);

    axum::serve(listener, app).await?;

    Ok(())
}
