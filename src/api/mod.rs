//! Dashbridge HTTP and WebSocket surface
//!
//! Two listeners share one [`AppState`]:
//!
//! ## HTTP (`[server].port`)
//! - `GET /api/screenshot` - Latest pushed screenshot, 404 before the first
//! - `GET /api/screenshot/take` - Request a capture (202)
//! - `GET /api/notifications` - Controller notifications (502 on failure)
//! - `GET /health/live` - Liveness probe
//! - `GET /health` - Transport status
//!
//! ## Dashboards (`[server].ws_port`)
//! - `GET /` or `GET /ws` - WebSocket upgrade

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::websocket::websocket_handler;

/// Build the HTTP router with all routes and middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/screenshot", get(routes::screenshot::latest_screenshot))
        .route("/screenshot/take", get(routes::screenshot::take_screenshot))
        .route("/notifications", get(routes::notifications::list_notifications));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/", get(routes::health::full_health));

    Router::new()
        .nest("/api", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Router for the dashboard WebSocket listener
pub fn build_ws_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(websocket_handler))
        .route("/ws", get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run both listeners until `shutdown` is cancelled
pub async fn serve(state: AppState, config: &ServerConfig, shutdown: CancellationToken) -> Result<(), ApiError> {
    let state = Arc::new(state);

    let http_addr = config.http_addr();
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;
    tracing::info!("HTTP API listening on {}", http_addr);

    let ws_addr = config.ws_addr();
    let ws_listener = tokio::net::TcpListener::bind(&ws_addr).await?;
    tracing::info!("Dashboard WebSocket listening on {}", ws_addr);

    let http = axum::serve(http_listener, build_router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let ws = axum::serve(ws_listener, build_ws_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned());

    tokio::try_join!(async { http.await }, async { ws.await })
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("HTTP servers shut down gracefully");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::upstream::testing::{controller_config, FakeController};
    use crate::upstream::SubscriberState;
    use crate::websocket::ServerMessage;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use futures_util::{SinkExt, StreamExt};
    use std::future::IntoFuture;
    use super::test_support::{test_state, test_state_with};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;
    use tower::util::ServiceExt;

    async fn get(app: Router, uri: &str) -> axum::response::Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_live() {
        let (state, _) = test_state();
        let response = get(build_router(state), "/health/live").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_full() {
        let (state, _) = test_state_with(ControllerConfig::default(), SubscriberState::Listening);
        let (tx, _rx) = mpsc::channel(16);
        state.hub.register(tx).await.unwrap();

        let response = get(build_router(state), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["upstream"], "listening");
        assert_eq!(body["mqtt"], "connected");
        assert_eq!(body["clients"], 1);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_health_degraded_while_disconnected() {
        let (state, _) = test_state();
        let body = body_json(get(build_router(state), "/health").await).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["upstream"], "disconnected");
    }

    #[tokio::test]
    async fn test_screenshot_not_found_before_first_push() {
        let (state, _) = test_state();
        let response = get(build_router(state), "/api/screenshot").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn test_screenshot_serves_latest_push() {
        let (state, _) = test_state();
        let first = BASE64.encode(b"first");
        let second = format!("data:image/jpeg;base64,{}", BASE64.encode(b"second"));
        state.pipeline.store_and_publish(&first).await.unwrap();
        state.pipeline.store_and_publish(&second).await.unwrap();

        let response = get(build_router(state), "/api/screenshot").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"second");
    }

    #[tokio::test]
    async fn test_take_screenshot_accepted() {
        let (state, _) = test_state();
        let response = get(build_router(Arc::clone(&state)), "/api/screenshot/take").await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["status"], "no_clients");

        let (tx, mut rx) = mpsc::channel(16);
        state.hub.register(tx).await.unwrap();
        let response = get(build_router(state), "/api/screenshot/take").await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = body_json(response).await;
        assert_eq!(body["status"], "requested");
        assert_eq!(body["clients"], 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::ScreenshotRequest.to_text().unwrap()
        );
    }

    #[tokio::test]
    async fn test_notifications_bad_gateway() {
        let controller = controller_config("ws://127.0.0.1:1".to_string());
        let (state, _) = test_state_with(controller, SubscriberState::Disconnected);

        let response = get(build_router(state), "/api/notifications").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_notifications_round_trip() {
        let fake = FakeController::start(&[]).await;
        let (state, _) = test_state_with(controller_config(fake.url()), SubscriberState::Listening);

        let response = get(build_router(state), "/api/notifications").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await[0]["notification_id"], "backup_failed");
    }

    #[tokio::test]
    async fn test_dashboard_socket_end_to_end() {
        let (state, publisher) = test_state();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, build_ws_router(Arc::clone(&state))).into_future());

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();

        socket
            .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
            .await
            .unwrap();
        let Some(Ok(Message::Text(reply))) = socket.next().await else {
            panic!("no pong");
        };
        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["type"], "pong");
        assert_eq!(state.hub.connection_count().await, 1);

        socket
            .send(Message::Text(
                r#"{"type":"state_update","state":{"volume":70}}"#.to_string(),
            ))
            .await
            .unwrap();
        socket.close(None).await.unwrap();

        // the server drops the client once the close is processed
        for _ in 0..50 {
            if state.hub.connection_count().await == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(state.hub.connection_count().await, 0);
        assert_eq!(state.store.snapshot().volume, 70);
        assert_eq!(publisher.states().last().unwrap().volume, 70);
    }
}
