use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Message, MessageReaction, MessageStatus},
    AppState,
};

use super::MessageResponse;

pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<Message>> {
    let message = state.engine.get_message(message_id).await?;
    Ok(Json(message))
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<EditMessageRequest>,
) -> AppResult<Json<Message>> {
    let message = state.engine.edit_message(message_id, &req.content).await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    state.engine.delete_message(message_id).await?;
    Ok(Json(MessageResponse::new("Message deleted")))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: MessageStatus,
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> AppResult<Json<Message>> {
    let message = state
        .engine
        .advance_message_status(message_id, req.status)
        .await?;

    Ok(Json(message))
}

pub async fn get_reactions(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<Vec<MessageReaction>>> {
    let reactions = state.engine.list_reactions(message_id).await?;
    Ok(Json(reactions))
}

#[derive(Debug, Deserialize)]
pub struct AddReactionRequest {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub emoji: String,
}

pub async fn add_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<AddReactionRequest>,
) -> AppResult<Json<MessageReaction>> {
    let reaction = state
        .engine
        .add_reaction(message_id, &req.user_id, &req.user_name, &req.emoji)
        .await?;

    Ok(Json(reaction))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    Path((message_id, user_id)): Path<(Uuid, String)>,
) -> AppResult<Json<MessageResponse>> {
    state.engine.remove_reaction(message_id, &user_id).await?;
    Ok(Json(MessageResponse::new("Reaction removed")))
}
