use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use pearlbot_settings::build_router;
use pearlbot_settings::config::{Config, LogFormat};
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "pearlbot-settings")]
#[command(about = "Embedded Shopify admin page for PearlBot chatbot credentials")]
struct Args {
    /// Overrides PEARLBOT_BIND_ADDR.
    #[arg(long)]
    bind_addr: Option<SocketAddr>,
    /// Overrides PEARLBOT_LOG_FORMAT (`text` or `json`).
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env().context("load configuration")?;
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(raw) = args.log_format.as_deref() {
        config.log_format = LogFormat::parse(raw).context("parse --log-format")?;
    }

    init_tracing(&config);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        target: "pearlbot.settings",
        addr = %local_addr,
        app_url = config.shopify_app_url.as_deref().unwrap_or("<unset>"),
        "pearlbot-settings listening",
    );

    let app = build_router(config);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve http")?;

    tracing::info!(target: "pearlbot.settings", "pearlbot-settings stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "pearlbot.settings", error = %error, "ctrl-c handler failed");
    }
}
