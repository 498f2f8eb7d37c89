//! Accept loop and TTL reaper.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::connection::{handle_connection, AppState};
use crate::session::SessionStore;

/// Transport limits. Frames and messages above `max_frame_bytes` are refused.
pub fn ws_config(max_frame_bytes: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_frame_bytes);
    config.max_frame_size = Some(max_frame_bytes);
    config
}

/// Accept connections forever, one task each.
pub async fn serve(listener: TcpListener, state: Arc<AppState>, config: WebSocketConfig) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    match accept_async_with_config(stream, Some(config)).await {
                        Ok(ws) => handle_connection(ws, addr, state).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}

/// Periodically drop expired session records.
pub fn spawn_reaper(store: SessionStore, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let reaped = store.reap_expired().await;
            let count = store.count().await;
            tracing::debug!(reaped, sessions = count, "Reaper tick");
        }
    })
}
