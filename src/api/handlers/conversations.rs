use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        AttachmentRef, Conversation, ConversationStatus, Message, MessageType, NewConversation,
        NewMessage, ParticipantRole, TypingIndicator,
    },
    services::InitialMessage,
    AppState,
};

use super::MessageResponse;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(flatten)]
    pub conversation: NewConversation,
    pub initial_message: Option<InitialMessage>,
}

pub async fn create_or_get_conversation(
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> AppResult<Json<Conversation>> {
    let conversation = state
        .engine
        .create_or_get_conversation(req.conversation, req.initial_message)
        .await?;

    Ok(Json(conversation))
}

#[derive(Debug, Deserialize)]
pub struct StoreConversationsQuery {
    pub admin_id: Option<String>,
}

pub async fn get_store_conversations(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    Query(query): Query<StoreConversationsQuery>,
) -> AppResult<Json<Vec<Conversation>>> {
    let conversations = state
        .engine
        .list_store_conversations(&store_id, query.admin_id.as_deref())
        .await?;

    Ok(Json(conversations))
}

pub async fn get_customer_conversations(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> AppResult<Json<Vec<Conversation>>> {
    let conversations = state
        .engine
        .list_customer_conversations(&customer_id)
        .await?;

    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Conversation>> {
    let conversation = state.engine.get_conversation(conversation_id).await?;
    Ok(Json(conversation))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ConversationStatus,
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> AppResult<Json<Conversation>> {
    let conversation = state
        .engine
        .set_conversation_status(conversation_id, req.status)
        .await?;

    Ok(Json(conversation))
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub assigned_to: Option<String>,
}

pub async fn assign(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<AssignRequest>,
) -> AppResult<Json<Conversation>> {
    let conversation = state
        .engine
        .assign_conversation(conversation_id, req.assigned_to)
        .await?;

    Ok(Json(conversation))
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let messages = state
        .engine
        .get_messages(conversation_id, query.limit, query.offset)
        .await?;

    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: String,
    pub sender_type: ParticipantRole,
    pub sender_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    pub attachment: Option<AttachmentRef>,
    pub reply_to: Option<Uuid>,
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let message = state
        .engine
        .send_message(NewMessage {
            conversation_id,
            sender_id: req.sender_id,
            sender_type: req.sender_type,
            sender_name: req.sender_name,
            content: req.content,
            message_type: req.message_type,
            attachment: req.attachment,
            reply_to: req.reply_to,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub reader_id: String,
    /// Derived from the conversation when omitted.
    pub reader_role: Option<ParticipantRole>,
}

#[derive(Debug, Serialize)]
pub struct StatusChangeResponse {
    pub message_ids: Vec<Uuid>,
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> AppResult<Json<StatusChangeResponse>> {
    let reader_role = match req.reader_role {
        Some(role) => role,
        None => state
            .engine
            .get_conversation(conversation_id)
            .await?
            .role_of(&req.reader_id)
            .ok_or_else(|| AppError::validation("reader is not a participant of this conversation"))?,
    };

    let message_ids = state
        .engine
        .mark_messages_as_read(conversation_id, &req.reader_id, reader_role)
        .await?;

    Ok(Json(StatusChangeResponse { message_ids }))
}

#[derive(Debug, Deserialize)]
pub struct MarkDeliveredRequest {
    pub recipient_id: String,
}

pub async fn mark_delivered(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<MarkDeliveredRequest>,
) -> AppResult<Json<StatusChangeResponse>> {
    let message_ids = state
        .engine
        .mark_messages_as_delivered(conversation_id, &req.recipient_id)
        .await?;

    Ok(Json(StatusChangeResponse { message_ids }))
}

#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
}

pub async fn start_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<TypingRequest>,
) -> AppResult<Json<TypingIndicator>> {
    let indicator = state
        .engine
        .set_typing(conversation_id, &req.user_id, &req.user_name, true)
        .await?;

    Ok(Json(indicator))
}

pub async fn stop_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(req): Query<TypingRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .engine
        .set_typing(conversation_id, &req.user_id, &req.user_name, false)
        .await?;

    Ok(Json(MessageResponse::new("Typing stopped")))
}

pub async fn get_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Vec<TypingIndicator>>> {
    let typers = state.engine.get_active_typers(conversation_id).await?;
    Ok(Json(typers))
}
