use anyhow::{Context, Result};
use rinha_gateway::{api, GatewayConfig, PaymentGateway, ReqwestHttpClient, Storage};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        (match std::env::var("RUST_ENV").as_deref() {
            Ok("production") => "rinha_gateway=info,server=info,tower_http=warn,axum=warn",
            Ok("development") => "rinha_gateway=debug,server=debug,tower_http=debug",
            Ok("test") => "rinha_gateway=warn,server=warn,tower_http=warn",
            _ => "rinha_gateway=info,server=info,tower_http=warn,axum=warn",
        })
        .to_string()
    });

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(env_filter));

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_file(cfg!(debug_assertions))
                    .compact(),
            )
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting payment gateway...");

    let config = GatewayConfig::from_env()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;
    config.log_configuration();

    let storage = Storage::from_config(&config)
        .await
        .context("failed to initialise storage backend")?;
    let http_client = Arc::new(
        ReqwestHttpClient::new(config.payment_timeout.max(config.health_timeout))
            .context("failed to build HTTP client")?,
    );

    let gateway = PaymentGateway::start(storage, http_client, config.clone());
    let app = api::router(gateway.clone());

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(bind_address = %bind_addr, "Server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    gateway.shutdown().await;
    info!("Server stopped");

    Ok(())
}
