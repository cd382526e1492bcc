//! blindcsp - certification service provider for anonymous voting credentials
//!
//! ```bash
//! CSP_KEY=<64 hex chars> blindcsp --data-dir /var/lib/blindcsp --handler ipaddr
//! ```

use blindcsp::api::{self, AppState};
use blindcsp::config::Config;
use blindcsp::protocol::{AuthProtocol, HandlerRegistry};
use blindcsp::SigningEngine;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    // key and handler first: nothing is opened if either is bad
    let handler = HandlerRegistry::with_builtins().build(&config.handler)?;
    let engine = SigningEngine::open(&config.key, &config.data_dir)?;
    info!(
        handler = handler.name(),
        data_dir = %config.data_dir.display(),
        "Signing engine ready"
    );
    if handler.require_certificate() {
        // TLS termination lives in front of this service
        warn!(
            handler = handler.name(),
            "Handler expects client certificates; terminate mutual TLS upstream"
        );
    }

    let state = Arc::new(AppState::new(AuthProtocol::new(Arc::new(engine), handler)));
    let app = api::router(state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("blindcsp listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
