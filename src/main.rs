use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use hook_dispatch::actions::{ActionRegistry, CloneActionFactory, GitCloner};
use hook_dispatch::config::{Cli, HandlerConfig};
use hook_dispatch::server::{self, AppState};

/// How long shutdown waits for launched units to finish.
const UNIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Install rustls crypto provider before any TLS usage. Err means one is
    // already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = HandlerConfig::from_env().context("Invalid configuration")?;

    // ── Actions ──────────────────────────────────────────────────────────
    // Registration order is execution order and report order.
    let mut registry = ActionRegistry::new();
    registry.register(Arc::new(CloneActionFactory::new(
        config.clone.clone(),
        Arc::new(GitCloner::new().with_timeout(config.clone.timeout)),
    )));
    let registry = Arc::new(registry);

    tracing::info!(actions = ?registry.names(), "Actions registered");
    if config.ingress.allowed_prefixes.iter().any(|p| p == "*") {
        tracing::warn!("HOOK_ALLOWED_SOURCES allows every source address");
    } else if config.ingress.allowed_prefixes.is_empty() {
        tracing::warn!("HOOK_ALLOWED_SOURCES is empty, every POST will be rejected");
    }
    tracing::info!(
        enabled = config.notify.enabled,
        relay = %format!("{}:{}", config.notify.smtp_host, config.notify.smtp_port),
        from = %config.notify.from_address,
        "Notification settings"
    );
    tracing::info!(workdir = %config.clone.workdir.display(), "Clone working directory");
    tracing::info!(max_body_bytes = config.max_body_bytes, "Request body limit");

    let state = AppState::from_config(&config, registry);
    let isolation = state.isolation.clone();

    let addr = cli.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Server started at {addr}");

    server::serve(listener, state, shutdown_signal())
        .await
        .context("Server error")?;

    let stuck = isolation.drain(UNIT_DRAIN_TIMEOUT).await;
    if stuck > 0 {
        tracing::warn!(units = stuck, "Abandoning units still running at shutdown");
    }
    tracing::info!("Server stopped at {addr}");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Interrupt received, shutting down");
}
