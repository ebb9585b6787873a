use serde_json::json;
use socketioxide::{extract::SocketRef, layer::SocketIoLayer, SocketIo};
use tokio::sync::broadcast;

use crate::state::State;

/// `/ws` namespace: every consolidated update is emitted as a `streams` event.
pub fn create_websocket_server(state: State) -> SocketIoLayer {
    let (layer, io) = SocketIo::new_layer();

    io.ns("/ws", move |socket: SocketRef| {
        let mut rx = state.live.subscribe();

        let socket_clone = socket.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(update) => {
                        let message = json!({
                            "origin": update.origin,
                            "server_id": update.server_id,
                            "streams": update.streams,
                        });
                        if let Err(e) = socket_clone.emit("streams", &message) {
                            log::warn!("Failed to emit streams to WebSocket client: {}", e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        log::info!("Live channel closed, stopping WebSocket stream");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("WebSocket client lagged, skipped {} updates", skipped);
                    }
                }
            }
        });

        socket.on_disconnect(|socket: SocketRef| {
            log::info!("WebSocket client disconnected: {}", socket.id);
        });

        log::info!("WebSocket client connected: {}", socket.id);
    });

    layer
}
