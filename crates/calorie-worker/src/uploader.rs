//! `PresignedUploader`.
//!
//! Generating the presigned URL itself is out of scope — this crate only
//! consumes the already-presigned form a photo's `file_id` resolves to, via
//! a thin `reqwest`-based `GET`.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploaderError {
    #[error("presigned URL request failed: {0}")]
    Http(String),

    #[error("object store returned status {0}")]
    Status(u16),
}

pub type Result<T> = std::result::Result<T, UploaderError>;

/// Named interface the estimate worker (C8) depends on.
#[async_trait]
pub trait PresignedUploader: Send + Sync {
    async fn get(&self, file_id: &str) -> Result<String>;
}

/// Production uploader: resolves a `file_id` to a presigned GET URL against
/// the configured object store. The endpoint that mints the actual
/// signature lives outside this crate's scope; this adapter's job
/// is only to ask for it and hand back the URL the estimator fetches.
pub struct HttpPresignedUploader {
    client: reqwest::Client,
    endpoint_url: String,
    bucket_name: String,
}

impl HttpPresignedUploader {
    pub fn new(endpoint_url: impl Into<String>, bucket_name: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint_url: endpoint_url.into(),
            bucket_name: bucket_name.into(),
        }
    }
}

#[async_trait]
impl PresignedUploader for HttpPresignedUploader {
    /// Asks the object store's presign endpoint for a temporary GET URL for
    /// `file_id`. The response body is the bare URL string.
    async fn get(&self, file_id: &str) -> Result<String> {
        let url = format!(
            "{}/presign/{}/{}",
            self.endpoint_url.trim_end_matches('/'),
            self.bucket_name,
            file_id
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| UploaderError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UploaderError::Status(response.status().as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| UploaderError::Http(e.to_string()))
    }
}

/// Deterministic test double: hands back a fixed URL pattern without any
/// network I/O.
#[cfg(any(test, feature = "testing"))]
pub struct FakePresignedUploader;

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl PresignedUploader for FakePresignedUploader {
    async fn get(&self, file_id: &str) -> Result<String> {
        Ok(format!("https://example.com/photos/{file_id}"))
    }
}
