//! HTTP server for in-progress render frames.
//!
//! When a public `frame_url` is configured, status cards point at
//! `<frame_url>/<channel>/<token>.<ext>` instead of uploaded attachments.
//! The token only defeats client caches; every request for a channel gets
//! that channel's latest frame.

use crate::error::Result;
use crate::settings::ChannelSettingsStore;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::future::Future;
use tracing::{debug, info};

async fn frame_handler(
    State(store): State<ChannelSettingsStore>,
    Path((channel, token)): Path<(String, String)>,
) -> Response {
    match store.peek(&channel).await.and_then(|s| s.frame()) {
        Some((bytes, content_type)) => (
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "no-store"),
            ],
            bytes,
        )
            .into_response(),
        None => {
            debug!(%channel, %token, "no frame to serve");
            (StatusCode::NOT_FOUND, "404 Not Found").into_response()
        }
    }
}

/// Router serving the latest frame of each channel.
pub fn router(store: ChannelSettingsStore) -> Router {
    Router::new()
        .route("/{channel}/{token}", get(frame_handler))
        .with_state(store)
}

/// Serve frames on `bind` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(
    bind: &str,
    store: ChannelSettingsStore,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %bind, "Frame server listening");
    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
