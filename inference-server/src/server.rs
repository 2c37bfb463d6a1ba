/// HTTP and WebSocket surface
///
/// `GET /ws` upgrades to the streaming protocol, one `InferenceSession` per
/// connection. `GET /health` reports liveness and the open session count.

use crate::config::ServerConfig;
use crate::session::InferenceSession;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

#[derive(Clone)]
struct AppState {
    config: Arc<ServerConfig>,
    sessions: Arc<AtomicUsize>,
}

/// Health check payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub active_sessions: usize,
    pub wake_words: Vec<String>,
}

/// Build the service router
pub fn router(config: Arc<ServerConfig>) -> Router {
    let state = AppState {
        config,
        sessions: Arc::new(AtomicUsize::new(0)),
    };

    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, config: Arc<ServerConfig>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Inference service listening on {}", listener.local_addr()?);
    axum::serve(listener, router(config))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        active_sessions: state.sessions.load(Ordering::SeqCst),
        wake_words: state.config.wake_words.clone(),
    })
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let open = state.sessions.fetch_add(1, Ordering::SeqCst) + 1;
    info!(open, "Client connected");

    let (mut sender, mut receiver) = socket.split();
    let mut session = InferenceSession::new(Arc::clone(&state.config));

    while let Some(message) = receiver.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket receive failed: {}", e);
                break;
            }
        };

        let reply = match session.handle_text(&text).to_json() {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Failed to encode reply: {}", e);
                continue;
            }
        };

        if sender.send(Message::Text(reply)).await.is_err() {
            debug!("Client went away mid-reply");
            break;
        }
    }

    let open = state.sessions.fetch_sub(1, Ordering::SeqCst) - 1;
    info!(open, chunks = session.chunks_scored(), "Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_reports_idle_service() {
        let app = router(Arc::new(ServerConfig::default()));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["activeSessions"], 0);
        assert_eq!(json["wakeWords"][0], "orion");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = router(Arc::new(ServerConfig::default()));

        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_plain_get_on_ws_route_is_rejected() {
        let app = router(Arc::new(ServerConfig::default()));

        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
