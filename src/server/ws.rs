use crate::core::broadcaster::Broadcaster;
use crate::core::events::EngineEvent;
use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let broadcaster = state.engine.broadcaster().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

/// One observer per connection: greet, forward every published event, log
/// whatever the client sends, and unsubscribe once either side goes away.
async fn handle_socket(socket: WebSocket, broadcaster: Broadcaster) {
    info!("New WebSocket client connected");
    let (mut sender, mut receiver) = socket.split();

    let greeting = EngineEvent::Connected { message: "WebSocket connected successfully".to_string() };
    match serde_json::to_string(&greeting) {
        Ok(text) => {
            if sender.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        Err(e) => warn!("failed to encode greeting: {e}"),
    }

    let (observer, mut events) = broadcaster.subscribe_channel();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<serde_json::Value>(text.as_str()) {
                            Ok(v) => info!("Received from client: {v}"),
                            Err(e) => warn!("Invalid WebSocket message: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            payload = events.recv() => {
                match payload {
                    Some(p) => {
                        if sender.send(Message::Text(p.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    broadcaster.unsubscribe(observer);
    info!("WebSocket client disconnected");
}
