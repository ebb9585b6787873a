use std::net::SocketAddr;

use axum::{extract::Json, routing::get, Router};
use media_server::ActiveStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::health::ServerHealth;
use crate::http_server::websocket;
use crate::state::State;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse<T> {
    code: u32,
    message: String,
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }
}

async fn handler_get_streams(
    state: axum::extract::State<State>,
) -> Json<ApiResponse<Vec<ActiveStream>>> {
    Json(ApiResponse::success(state.live.streams().await))
}

async fn handler_get_servers(
    state: axum::extract::State<State>,
) -> Json<ApiResponse<Vec<ServerHealth>>> {
    Json(ApiResponse::success(state.health.list()))
}

pub fn router(state: State) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let websocket_layer = websocket::create_websocket_server(state.clone());

    Router::new()
        .route("/api/streams", get(handler_get_streams))
        .route("/api/servers", get(handler_get_servers))
        .layer(websocket_layer)
        .layer(cors)
        .with_state(state)
}

pub async fn start_api_server(state: State, addr: SocketAddr, cancel: CancellationToken) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            log::info!("API server listening on http://{}", addr);
            listener
        }
        Err(e) => {
            log::error!("Failed to bind to address {}: {}", addr, e);
            log::error!("Please check if the port is already in use or try a different port");
            return;
        }
    };

    let router = router(state);
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
    {
        log::error!("Server error: {}", e);
    }
    log::info!("API server stopped");
}
