//! Content-addressed storage for job definitions
//!
//! Only the returned content address matters to the rest of the crate: it
//! feeds the job listing instruction and the deployment create body.

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_PINATA_URL: &str = "https://api.pinata.cloud";
const PIN_FILE_PATH: &str = "/pinning/pinFileToIPFS";
const JOB_FILE_NAME: &str = "job.json";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Storage is not configured: {0}")]
    NotConfigured(String),

    #[error("Failed to serialize job definition: {0}")]
    Serialize(String),

    #[error("Storage transport error: {0}")]
    Transport(String),

    #[error("Storage API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Response without a usable content address
    #[error("Invalid storage response: {0}")]
    InvalidResponse(String),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes` under `name`, returning the content address
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<String, StorageError>;

    async fn upload_json(&self, value: &serde_json::Value) -> Result<String, StorageError> {
        let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Serialize(e.to_string()))?;
        self.upload(JOB_FILE_NAME, bytes).await
    }
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Pinata pinning service
pub struct PinataStore {
    http: Client,
    base_url: String,
    jwt: String,
}

impl PinataStore {
    pub fn new(base_url: impl Into<String>, jwt: impl Into<String>, timeout: Duration) -> Result<Self, StorageError> {
        let jwt = jwt.into();
        if jwt.trim().is_empty() {
            return Err(StorageError::NotConfigured("pinning service token is empty".to_string()));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            jwt,
        })
    }

    fn metadata(name: &str) -> String {
        serde_json::json!({
            "name": name,
            "keyvalues": { "source": "nosana-deployer" }
        })
        .to_string()
    }
}

#[async_trait]
impl ContentStore for PinataStore {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str("application/json")
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("pinataMetadata", Self::metadata(name));

        let url = format!("{}{}", self.base_url.trim_end_matches('/'), PIN_FILE_PATH);
        debug!(url = %url, size, "Uploading job definition");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.jwt)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(StorageError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let pinned: PinResponse =
            serde_json::from_str(&text).map_err(|e| StorageError::InvalidResponse(format!("{}: {}", e, text)))?;
        if pinned.ipfs_hash.is_empty() {
            return Err(StorageError::InvalidResponse("empty IpfsHash".to_string()));
        }

        info!(content_address = %pinned.ipfs_hash, size, "Job definition pinned");
        Ok(pinned.ipfs_hash)
    }
}

impl std::fmt::Debug for PinataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinataStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn store(url: &str) -> PinataStore {
        PinataStore::new(url, "test-jwt", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_upload_returns_content_address() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", PIN_FILE_PATH)
            .match_header("authorization", "Bearer test-jwt")
            .match_body(Matcher::Regex("name=\"file\"; filename=\"job.json\"".to_string()))
            .with_status(200)
            .with_body(r#"{"IpfsHash":"QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG","PinSize":120}"#)
            .create_async()
            .await;

        let address = store(&server.url())
            .upload_json(&json!({ "version": "0.1", "type": "container" }))
            .await
            .unwrap();

        assert_eq!(address, "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_hash_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PIN_FILE_PATH)
            .with_status(200)
            .with_body(r#"{"IpfsHash":""}"#)
            .create_async()
            .await;

        let err = store(&server.url()).upload("job.json", b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_api_error_keeps_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PIN_FILE_PATH)
            .with_status(401)
            .with_body("invalid token")
            .create_async()
            .await;

        let err = store(&server.url()).upload("job.json", b"{}".to_vec()).await.unwrap_err();
        assert_eq!(
            err,
            StorageError::Api {
                status: 401,
                body: "invalid token".to_string()
            }
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(matches!(
            PinataStore::new(DEFAULT_PINATA_URL, "  ", Duration::from_secs(5)),
            Err(StorageError::NotConfigured(_))
        ));
    }
}
