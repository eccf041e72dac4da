use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{AttachmentMetadata, AttachmentRef},
    AppState,
};

/// Accepts a `file` field and an optional `conversation_id` field. Returns
/// the descriptor to put on a message; the bytes never touch the engine.
pub async fn upload_attachment(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<AttachmentRef>)> {
    let gateway = state
        .attachments
        .clone()
        .ok_or_else(|| AppError::validation("attachment uploads are disabled"))?;

    let mut conversation_id = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("Failed to read multipart field: {}", e)))?
    {
        match field.name().unwrap_or("") {
            "conversation_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::validation(format!("Failed to read field: {}", e)))?;
                let id = Uuid::parse_str(text.trim())
                    .map_err(|_| AppError::validation("conversation_id must be a UUID"))?;
                conversation_id = Some(id);
            }
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::validation(format!("Failed to read file: {}", e)))?;
                file = Some((file_name, mime_type, data));
            }
            _ => continue,
        }
    }

    let (file_name, mime_type, data) =
        file.ok_or_else(|| AppError::validation("missing 'file' field"))?;
    if data.is_empty() {
        return Err(AppError::validation("uploaded file is empty"));
    }

    let attachment = gateway
        .upload(
            data,
            AttachmentMetadata {
                file_name,
                mime_type,
                conversation_id,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(attachment)))
}
