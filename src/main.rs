mod config;
mod proxy;
mod rewrite;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use reqwest::Client;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::proxy::{ProxyService, router as proxy_router};

#[derive(Parser, Debug)]
#[command(name = "copilot-relay")]
#[command(about = "Rewrite-and-forward relay for code-assistant completion traffic", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 默认启用 info 级别日志，若用户设置了 RUST_LOG 则按其配置。
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let cfg = Arc::new(Config::load(&cli.config)?);
    let client = build_client(&cfg)?;

    let proxy = ProxyService::new(client, cfg.clone());
    let app: Router = proxy_router(proxy);

    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind))?;
    tracing::info!(
        "copilot-relay listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Build the shared upstream client: pooled connections with HTTP/2 over
/// ALPN, an optional outbound proxy, and the configured per-request timeout
/// (0 disables the deadline entirely).
fn build_client(cfg: &Config) -> Result<Client> {
    let mut builder = Client::builder();
    if cfg.timeout > 0 {
        builder = builder.timeout(Duration::from_secs(cfg.timeout));
    }
    if !cfg.proxy_url.is_empty() {
        let proxy = reqwest::Proxy::all(&cfg.proxy_url)
            .with_context(|| format!("invalid proxy_url {}", cfg.proxy_url))?;
        builder = builder.proxy(proxy);
    }
    Ok(builder.build()?)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
