// WebSocket subscriptions: one socket follows one conversation and receives
// every message inserted into it as a JSON text frame.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::{
    error::{AppError, Result},
    middleware::auth::authenticate,
    routes::conversations::fetch_conversation_for,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    pub conversation_id: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response> {
    let conversation_id = authorize(&state, &query).await.map_err(|err| {
        tracing::warn!(conversation_id = %query.conversation_id, error = %err, "rejected websocket handshake");
        err
    })?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, conversation_id, state)))
}

/// Checks the token and that its user takes part in the conversation.
async fn authorize(state: &AppState, query: &WsQuery) -> Result<String> {
    let token = query.token.as_deref().ok_or(AppError::Unauthorized)?;
    let user = authenticate(state, token).await?;
    let conversation = fetch_conversation_for(&state.db.pool, &query.conversation_id, &user.id).await?;
    Ok(conversation.id)
}

async fn handle_socket(socket: WebSocket, conversation_id: String, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(tokio::sync::Mutex::new(sender));

    let mut updates = BroadcastStream::new(state.hub.subscribe(&conversation_id).await);

    let forward_sender = sender.clone();
    let forward_id = conversation_id.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(item) = updates.next().await {
            let event = match item {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::debug!(conversation_id = %forward_id, skipped, "subscriber lagged");
                    continue;
                }
            };
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode event");
                    continue;
                }
            };
            let mut sender = forward_sender.lock().await;
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Inbound frames other than ping and close carry no meaning here.
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Close(_) => break,
            Message::Ping(data) => {
                let mut sender = sender.lock().await;
                let _ = sender.send(Message::Pong(data)).await;
            }
            _ => {}
        }
    }

    forward_task.abort();
    // The receiver lives in the task; wait for it to drop before pruning.
    let _ = forward_task.await;
    state.hub.prune(&conversation_id).await;
    tracing::debug!(conversation_id = %conversation_id, "websocket closed");
}
