use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::{
    config::Credentials,
    primitives::ByteStream,
    types::{BucketCannedAcl, ObjectCannedAcl},
    Client, Config,
};
use bytes::Bytes;
use uuid::Uuid;

use super::AttachmentGateway;
use crate::{
    config::MinioConfig,
    error::{AppError, AppResult},
    models::{AttachmentMetadata, AttachmentRef},
};

/// Attachment gateway backed by MinIO (or any S3-compatible store).
#[derive(Clone)]
pub struct MinioClient {
    client: Client,
    config: MinioConfig,
}

impl MinioClient {
    pub async fn new(config: &MinioConfig) -> AppResult<Self> {
        let creds = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "minio",
        );

        let s3_config = Config::builder()
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .credentials_provider(creds)
            .force_path_style(true)
            .build();

        let client = Client::from_conf(s3_config);

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub async fn ensure_bucket(&self) -> AppResult<()> {
        let bucket = &self.config.attachments_bucket;
        let result = self.client.head_bucket().bucket(bucket).send().await;

        if result.is_err() {
            self.client
                .create_bucket()
                .bucket(bucket)
                .acl(BucketCannedAcl::PublicRead)
                .send()
                .await
                .map_err(|e| AppError::Storage(format!("Failed to create bucket: {}", e)))?;
            tracing::info!("Created bucket: {}", bucket);
        }

        Ok(())
    }

    pub fn get_file_url(&self, key: &str) -> String {
        let bucket = &self.config.attachments_bucket;
        match &self.config.public_url {
            Some(public_url) => format!("{}/{}/{}", public_url, bucket, key),
            None => format!("{}/{}/{}", self.config.endpoint, bucket, key),
        }
    }
}

/// Object key for an upload: scoped by conversation, unique per upload.
pub fn object_key(metadata: &AttachmentMetadata) -> String {
    let scope = metadata
        .conversation_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "unscoped".to_string());
    let safe_name: String = metadata
        .file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}/{}-{}", scope, Uuid::new_v4(), safe_name)
}

#[async_trait]
impl AttachmentGateway for MinioClient {
    async fn upload(&self, data: Bytes, metadata: AttachmentMetadata) -> AppResult<AttachmentRef> {
        let key = object_key(&metadata);
        let file_size = data.len() as i64;

        self.client
            .put_object()
            .bucket(&self.config.attachments_bucket)
            .key(&key)
            .body(ByteStream::from(data))
            .content_type(&metadata.mime_type)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to upload file: {}", e)))?;

        tracing::debug!(key = %key, size = file_size, "Attachment uploaded");

        Ok(AttachmentRef {
            url: self.get_file_url(&key),
            file_name: metadata.file_name,
            file_size,
            mime_type: metadata.mime_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_is_scoped_and_sanitized() {
        let conversation_id = Uuid::new_v4();
        let key = object_key(&AttachmentMetadata {
            file_name: "my photo (1).png".into(),
            mime_type: "image/png".into(),
            conversation_id: Some(conversation_id),
        });
        assert!(key.starts_with(&format!("{}/", conversation_id)));
        assert!(key.ends_with("-my_photo__1_.png"));
    }
}
