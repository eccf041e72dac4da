use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    hub::{ChatEvent, SubscriptionId, Topic},
    services::ChatEngine,
    AppState,
};

const OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsIncomingMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsOutgoingMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub payload: serde_json::Value,
}

impl WsOutgoingMessage {
    fn new(msg_type: &str, payload: serde_json::Value) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            payload,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
struct UnsubscribePayload {
    subscription_id: SubscriptionId,
}

#[derive(Debug, Deserialize)]
struct TypingPayload {
    conversation_id: Uuid,
    #[serde(default)]
    user_name: String,
    #[serde(default = "default_is_typing")]
    is_typing: bool,
}

fn default_is_typing() -> bool {
    true
}

/// Hub subscriptions owned by one socket, dropped when it closes.
type Subscriptions = Arc<Mutex<Vec<SubscriptionId>>>;

pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> AppResult<Response> {
    if query.user_id.trim().is_empty() {
        return Err(AppError::validation("user_id must not be empty"));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, query.user_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create channel for sending messages to this client
    let (tx, mut rx) = mpsc::channel::<WsOutgoingMessage>(OUTBOUND_BUFFER);

    if let Err(e) = state.engine.start_presence_session(&user_id).await {
        tracing::warn!(user_id = %user_id, "Failed to start presence session: {}", e);
    }
    tracing::info!(user_id = %user_id, "WebSocket connected");

    // Task to send messages to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // Task to receive messages from WebSocket
    let subscriptions: Subscriptions = Arc::new(Mutex::new(Vec::new()));
    let engine = state.engine.clone();
    let recv_subscriptions = subscriptions.clone();
    let recv_user_id = user_id.clone();

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let reply = match serde_json::from_str::<WsIncomingMessage>(&text) {
                        Ok(msg) => {
                            handle_incoming_message(
                                &engine,
                                &recv_subscriptions,
                                &tx,
                                &recv_user_id,
                                msg,
                            )
                            .await
                        }
                        Err(e) => Err(AppError::validation(format!("malformed frame: {}", e))),
                    };
                    let outgoing = match reply {
                        Ok(Some(outgoing)) => outgoing,
                        Ok(None) => continue,
                        Err(e) => WsOutgoingMessage::new(
                            "error",
                            serde_json::json!({ "error": e.to_string(), "retryable": e.is_transient() }),
                        ),
                    };
                    if tx.send(outgoing).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Err(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either side to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Cleanup
    for id in subscriptions.lock().await.drain(..) {
        state.engine.unsubscribe(id);
    }
    if let Err(e) = state.engine.end_presence_session(&user_id).await {
        tracing::warn!(user_id = %user_id, "Failed to end presence session: {}", e);
    }
    tracing::info!(user_id = %user_id, "WebSocket disconnected");
}

async fn handle_incoming_message(
    engine: &Arc<ChatEngine>,
    subscriptions: &Subscriptions,
    tx: &mpsc::Sender<WsOutgoingMessage>,
    user_id: &str,
    msg: WsIncomingMessage,
) -> AppResult<Option<WsOutgoingMessage>> {
    match msg.msg_type.as_str() {
        "ping" => Ok(Some(WsOutgoingMessage::new("pong", serde_json::json!({})))),
        "subscribe" => {
            let topic: Topic = parse_payload(msg.payload)?;
            let id = engine.subscribe(topic.clone(), forward_to(tx.clone(), topic.clone()));
            subscriptions.lock().await.push(id);
            Ok(Some(WsOutgoingMessage::new(
                "subscribed",
                serde_json::json!({ "subscription_id": id, "topic": topic }),
            )))
        }
        "unsubscribe" => {
            let payload: UnsubscribePayload = parse_payload(msg.payload)?;
            let mut owned = subscriptions.lock().await;
            let Some(position) = owned.iter().position(|id| *id == payload.subscription_id) else {
                return Err(AppError::validation("unknown subscription"));
            };
            let id = owned.remove(position);
            engine.unsubscribe(id);
            Ok(Some(WsOutgoingMessage::new(
                "unsubscribed",
                serde_json::json!({ "subscription_id": id }),
            )))
        }
        "typing" => {
            let payload: TypingPayload = parse_payload(msg.payload)?;
            engine
                .set_typing(
                    payload.conversation_id,
                    user_id,
                    &payload.user_name,
                    payload.is_typing,
                )
                .await?;
            Ok(None)
        }
        "heartbeat" => {
            let status = engine.heartbeat(user_id).await?;
            Ok(Some(WsOutgoingMessage::new(
                "presence",
                serde_json::to_value(status)?,
            )))
        }
        other => {
            tracing::warn!("Unknown message type: {}", other);
            Err(AppError::validation(format!("unknown message type: {}", other)))
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(payload: serde_json::Value) -> AppResult<T> {
    serde_json::from_value(payload).map_err(|e| AppError::validation(format!("invalid payload: {}", e)))
}

/// Hub callback that queues events for the socket without blocking the
/// publisher. A full buffer drops the event.
fn forward_to(
    tx: mpsc::Sender<WsOutgoingMessage>,
    topic: Topic,
) -> impl Fn(&ChatEvent) + Send + Sync + 'static {
    move |event| {
        let payload = match serde_json::to_value(event) {
            Ok(event) => serde_json::json!({ "topic": topic, "event": event }),
            Err(e) => {
                tracing::error!("Failed to serialize event: {}", e);
                return;
            }
        };
        if let Err(mpsc::error::TrySendError::Full(_)) =
            tx.try_send(WsOutgoingMessage::new("event", payload))
        {
            tracing::warn!(?topic, "WebSocket client lagging, event dropped");
        }
    }
}
