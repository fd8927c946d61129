use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

use crate::config::AppConfig;
use crate::error::AppError;

/// Where a user's profile photo lives. Uploading a new photo overwrites it.
pub fn photo_key(user_id: &str) -> String {
    format!("profiles/{user_id}/photo")
}

/// Where an uploaded note's file lives.
pub fn note_key(note_id: &str) -> String {
    format!("notes/{note_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("could not store {key}: {reason}")]
    Upload { key: String, reason: String },
    #[error("could not read {key}: {reason}")]
    Download { key: String, reason: String },
    #[error("could not remove {key}: {reason}")]
    Remove { key: String, reason: String },
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        tracing::warn!("{e}");
        AppError::Internal("file storage is unavailable".into())
    }
}

/// A photo or note file read back from the bucket.
#[derive(Debug)]
pub struct StoredFile {
    pub data: Vec<u8>,
    /// Type given at upload, if the bucket kept it.
    pub content_type: Option<String>,
}

/// Bucket holding profile photos and shared note files.
///
/// Works against AWS or any S3-compatible store. Setting `S3_ENDPOINT`
/// switches to path-style addressing, which MinIO and most self-hosted
/// stores require.
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub async fn new(config: &AppConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.s3_region.clone()));
        if let Some(endpoint) = &config.s3_endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let s3 = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.s3_endpoint.is_some())
            .build();
        Self {
            client: Client::from_conf(s3),
            bucket: config.s3_bucket.clone(),
        }
    }

    #[tracing::instrument(skip(self, data), fields(size = data.len()), err)]
    pub async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn download(&self, key: &str) -> Result<StoredFile, StorageError> {
        let failed = |reason: String| StorageError::Download {
            key: key.to_string(),
            reason,
        };
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        let content_type = object.content_type().map(str::to_string);
        let data = object
            .body
            .collect()
            .await
            .map_err(|e| failed(e.to_string()))?
            .into_bytes()
            .to_vec();
        Ok(StoredFile { data, content_type })
    }

    /// Deleting a key that does not exist succeeds, as S3 itself does.
    #[tracing::instrument(skip(self), err)]
    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Remove {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::*;

    #[test]
    fn keys_are_namespaced_by_kind() {
        assert_eq!(photo_key("u1"), "profiles/u1/photo");
        assert_eq!(note_key("n1"), "notes/n1");
    }

    #[test]
    fn storage_failures_hide_details_from_clients() {
        let err = StorageError::Upload {
            key: "notes/n1".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "could not store notes/n1: connection refused");
        let resp = AppError::from(err).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
