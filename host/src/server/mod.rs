//! HTTP server assembly and lifecycle.

pub mod api;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::AppState;

/// Bind and serve until `shutdown` fires, then drain connections
/// gracefully. The caller bounds the drain with its own deadline.
pub async fn serve(
    state: AppState,
    addr: String,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let router = api::create_router().with_state(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, "server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
