use std::net::{Ipv6Addr, SocketAddr};

use tokio::signal::ctrl_c;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "portal=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let metrics = portal::telemetry::setup_metrics_recorder()?;
    let state = portal::initialize_state(metrics).await?;
    let port = state.config.port;
    let app = portal::app(state);

    let addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match ctrl_c().await {
        Ok(()) => tracing::info!("received Ctrl+C, shutting down"),
        Err(err) => {
            tracing::error!(%err, "cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        },
    }
}
