//! The compressed room-listing endpoint.
//!
//! A single axum route serving the gzip+base64 JSON snapshot the main
//! loop keeps refreshed. Requests only ever clone a cached string — the
//! HTTP side never touches room state, so it can't block the relay loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use crate::dispatcher::ListingCache;
use crate::RelayError;

/// Binds the listing endpoint and serves it on its own task.
///
/// Returns the bound address (useful when the config asked for port 0).
pub(crate) async fn serve(
    addr: &str,
    cache: Arc<ListingCache>,
) -> Result<SocketAddr, RelayError> {
    let listener = TcpListener::bind(addr).await.map_err(RelayError::Listing)?;
    let local_addr = listener.local_addr().map_err(RelayError::Listing)?;

    let app = Router::new()
        .route("/compressed/servers", get(compressed_servers))
        .with_state(cache);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "listing endpoint terminated");
        }
    });

    tracing::info!(%local_addr, "room listing endpoint serving");
    Ok(local_addr)
}

async fn compressed_servers(State(cache): State<Arc<ListingCache>>) -> String {
    cache.get()
}
