use serde::{Deserialize, Serialize};

/// Descriptor returned by the attachment gateway. Stored verbatim on messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub url: String,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    pub file_name: String,
    pub mime_type: String,
    /// Conversation the file is being attached in, used to namespace the object key.
    pub conversation_id: Option<uuid::Uuid>,
}
