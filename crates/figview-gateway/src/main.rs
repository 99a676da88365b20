//! figview asset gateway server
//!
//! Serves the allowlisted proxy, the web font proxy and the session endpoints.
//!
//! ## Environment
//!
//! - `FIGVIEW_GATEWAY_ADDR`: listen address (default `0.0.0.0:3030`)
//! - `FIGVIEW_PRODUCTION`: mark session cookies `Secure`
//! - `RUST_LOG`: log filter

use std::io;

use figview_gateway::{GatewayConfig, GatewayServer};
use tracing::{error, info};

#[tokio::main]
async fn main() -> io::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "figview_gateway=info,tower_http=info".into()),
        )
        .init();

    let config = GatewayConfig::from_env().map_err(|err| {
        error!("{}", err);
        io::Error::new(io::ErrorKind::InvalidInput, err)
    })?;
    let server = GatewayServer::from_config(&config).map_err(|err| {
        error!("Failed to build upstream client: {}", err);
        io::Error::other(err)
    })?;

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("figview gateway listening on {}", config.addr);
    if config.production {
        info!("Production mode: session cookies are Secure");
    }

    axum::serve(listener, server.router()).await
}
