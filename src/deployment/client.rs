//! HTTP client for the deployment manager
//!
//! Every request carries `x-user-id` (wallet address) and a signed
//! `Authorization` header generated fresh per request. Idempotent reads are
//! retried with exponential backoff on transport and 5xx errors; mutating
//! calls are sent exactly once and their failures surface to the caller.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::{debug, warn};

use crate::deployment::api::{DeploymentApi, DeploymentResult};
use crate::deployment::errors::DeploymentError;
use crate::deployment::types::{
    Deployment, DeploymentCreateBody, DeploymentStatusResponse, ReplicaCountBody, TimeoutBody,
};
use crate::wallet::WalletManager;

pub const DEFAULT_API_URL: &str = "https://deployment-manager.k8s.prd.nos.ci/api";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Total tries for idempotent reads
pub const DEFAULT_READ_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub read_attempts: usize,
    /// First backoff delay between read retries; doubles each retry
    pub retry_base_delay: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: DEFAULT_HTTP_TIMEOUT,
            read_attempts: DEFAULT_READ_ATTEMPTS,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

pub struct DeploymentClient {
    http: Client,
    settings: ClientSettings,
    wallet: WalletManager,
}

impl DeploymentClient {
    pub fn new(wallet: WalletManager, settings: ClientSettings) -> DeploymentResult<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| DeploymentError::transport(&settings.base_url, e.to_string()))?;
        Ok(Self {
            http,
            settings,
            wallet,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.settings.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    /// Send one request and return the raw body of a 2xx response
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> DeploymentResult<String> {
        let auth = self.wallet.auth_headers();
        let mut request = self
            .http
            .request(method.clone(), self.url(path))
            .header("x-user-id", &auth.user_id)
            .header("Authorization", &auth.authorization);
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(method = %method, path, "Deployment API request");
        let response = request
            .send()
            .await
            .map_err(|e| DeploymentError::transport(path, e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeploymentError::transport(path, e.to_string()))?;
        debug!(method = %method, path, status = status.as_u16(), "Deployment API response");

        if !status.is_success() {
            return Err(DeploymentError::Api {
                path: path.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> DeploymentResult<T> {
        let text = self.send(method, path, body).await?;
        decode(path, &text)
    }

    /// GET with bounded retries on transient failures
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> DeploymentResult<T> {
        let base_ms = self.settings.retry_base_delay.as_millis().max(1) as u64;
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(base_ms / 2)
            .max_delay(Duration::from_secs(5))
            .take(self.settings.read_attempts.saturating_sub(1));

        let text = RetryIf::spawn(
            strategy,
            || self.send::<()>(Method::GET, path, None),
            |err: &DeploymentError| {
                let retry = err.is_retryable();
                if retry {
                    warn!(path, error = %err, "Retrying deployment API read");
                }
                retry
            },
        )
        .await?;
        decode(path, &text)
    }
}

fn decode<T: DeserializeOwned>(path: &str, text: &str) -> DeploymentResult<T> {
    serde_json::from_str(text).map_err(|e| DeploymentError::decode(path, format!("{}: {}", e, text)))
}

#[async_trait]
impl DeploymentApi for DeploymentClient {
    async fn create(&self, body: &DeploymentCreateBody) -> DeploymentResult<Deployment> {
        self.send_json(Method::POST, "/deployment/create", Some(body)).await
    }

    async fn get(&self, id: &str) -> DeploymentResult<Deployment> {
        self.get_json(&format!("/deployment/{}", id)).await
    }

    async fn start(&self, id: &str) -> DeploymentResult<DeploymentStatusResponse> {
        self.send_json::<_, ()>(Method::POST, &format!("/deployment/{}/start", id), None)
            .await
    }

    async fn restart(&self, id: &str) -> DeploymentResult<()> {
        self.send::<()>(Method::POST, &format!("/deployment/{}/restart", id), None)
            .await
            .map(|_| ())
    }

    async fn stop(&self, id: &str) -> DeploymentResult<DeploymentStatusResponse> {
        self.send_json::<_, ()>(Method::POST, &format!("/deployment/{}/stop", id), None)
            .await
    }

    async fn archive(&self, id: &str) -> DeploymentResult<()> {
        self.send::<()>(Method::PATCH, &format!("/deployment/{}/archive", id), None)
            .await
            .map(|_| ())
    }

    async fn update_replicas(&self, id: &str, replicas: u32) -> DeploymentResult<()> {
        let body = ReplicaCountBody { replicas };
        self.send(
            Method::POST,
            &format!("/deployment/{}/update-replica-count", id),
            Some(&body),
        )
        .await
        .map(|_| ())
    }

    async fn update_timeout(&self, id: &str, timeout_secs: u64) -> DeploymentResult<()> {
        let body = TimeoutBody {
            timeout: timeout_secs,
        };
        self.send(Method::POST, &format!("/deployment/{}/update-timeout", id), Some(&body))
            .await
            .map(|_| ())
    }

    async fn update_vault_balance(&self, vault: &str) -> DeploymentResult<()> {
        self.send::<()>(Method::PATCH, &format!("/vault/{}/update-balance", vault), None)
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for DeploymentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentClient")
            .field("base_url", &self.settings.base_url)
            .field("wallet", &self.wallet.pubkey())
            .finish()
    }
}
