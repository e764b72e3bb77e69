//! WebSocket stream of the sync bus
//!
//! A new connection first receives every retained topic, then live
//! `{topic, payload, retained}` frames. Text frames from the client are
//! queued as schedule commands.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::ApiState;
use crate::publisher::BusMessage;

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before replaying so nothing published in between is lost
    let live = BroadcastStream::new(state.bus.subscribe());
    let replay = state.bus.retained_all();
    tracing::info!(retained = replay.len(), "WebSocket connected");

    let mut send_task = tokio::spawn(async move {
        for message in &replay {
            if !send_frame(&mut sender, message).await {
                return;
            }
        }

        let mut live = live;
        while let Some(item) = live.next().await {
            match item {
                Ok(message) => {
                    if !send_frame(&mut sender, &message).await {
                        break;
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "WebSocket subscriber lagged");
                }
            }
        }
    });

    let commands = state.commands.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(e) = commands.send(text.to_string()).await {
                        tracing::warn!(error = %e, "dropping WebSocket command");
                        break;
                    }
                }
                Message::Close(_) => {
                    tracing::debug!("WebSocket closed by client");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!("WebSocket disconnected");
}

/// Send one bus message; false once the socket is gone
async fn send_frame<S>(sender: &mut S, message: &BusMessage) -> bool
where
    S: SinkExt<Message> + Unpin,
{
    let frame = match message.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, topic = %message.topic, "failed to encode frame");
            return true;
        }
    };
    sender.send(Message::Text(frame.into())).await.is_ok()
}
