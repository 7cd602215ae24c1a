//! Axum-based WebSocket server.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderValue, Method},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::connection::handle_ws_connection;
use crate::state::GatewayState;

/// Build the HTTP router: `/ws`, `/health` and, with the `metrics` feature,
/// `/metrics`.
pub fn router(state: Arc<GatewayState>) -> Router {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(cors_layer(state.config.cors_origins()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET])
        .allow_headers(Any)
}

/// Start the gateway and run until Ctrl-C.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{port}", state.config.bind_addr());
    let listener = TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");
    serve(state, listener, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// The presence monitor and room collector run for as long as the server
/// does and are stopped before this returns.
pub async fn serve<F>(state: Arc<GatewayState>, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let presence = state.presence.clone().spawn(cancel.clone());
    let collector = state.collector.clone().spawn(cancel.clone());

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await;

    cancel.cancel();
    let (presence, collector) = tokio::join!(presence, collector);
    if let Err(e) = presence.and(collector) {
        error!(%e, "Background task failed");
    }

    result?;
    info!("Gateway stopped");
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let max = state.config.max_message_bytes();
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_ws_connection(state, socket))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "connections": state.connection_count(),
        "rooms": state.registry.len(),
    }))
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    use axum::http::StatusCode;

    match &state.metrics_handle {
        Some(handle) => {
            crate::metrics::record_engine_snapshot(&state);
            (StatusCode::OK, handle.render()).into_response()
        }
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(%e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
