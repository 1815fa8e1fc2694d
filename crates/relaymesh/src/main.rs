//! Relay server binary: logging init, settings load, run.
//!
//! Usage: `relaymesh [settings.json]`. Without an argument the defaults
//! from [`RelayConfig`] apply; the file only needs the fields it wants to
//! override.

use relaymesh::transport::WebSocketTransport;
use relaymesh::{RelayConfig, RelayError, RelayServerBuilder};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RelayConfig::load(path)?,
        None => {
            tracing::info!("no settings file given, using defaults");
            RelayConfig::default()
        }
    };

    let transport = WebSocketTransport::bind(&config.bind_addr, config.packet_limits()).await?;
    let server = RelayServerBuilder::new().config(config).build(transport).await?;
    server.run().await
}
