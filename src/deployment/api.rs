//! Deployment manager seam
//!
//! The start controller, the tracker and the orchestration layer only see
//! this trait; [`crate::deployment::DeploymentClient`] is the HTTP
//! implementation.

use async_trait::async_trait;

use crate::deployment::errors::DeploymentError;
use crate::deployment::types::{Deployment, DeploymentCreateBody, DeploymentStatusResponse};

pub type DeploymentResult<T> = Result<T, DeploymentError>;

#[async_trait]
pub trait DeploymentApi: Send + Sync {
    /// `POST /deployment/create`
    async fn create(&self, body: &DeploymentCreateBody) -> DeploymentResult<Deployment>;

    /// `GET /deployment/{id}`, including the event log
    async fn get(&self, id: &str) -> DeploymentResult<Deployment>;

    /// `POST /deployment/{id}/start`
    async fn start(&self, id: &str) -> DeploymentResult<DeploymentStatusResponse>;

    /// `POST /deployment/{id}/restart`
    async fn restart(&self, id: &str) -> DeploymentResult<()>;

    /// `POST /deployment/{id}/stop`
    async fn stop(&self, id: &str) -> DeploymentResult<DeploymentStatusResponse>;

    /// `PATCH /deployment/{id}/archive`
    async fn archive(&self, id: &str) -> DeploymentResult<()>;

    /// `POST /deployment/{id}/update-replica-count`
    async fn update_replicas(&self, id: &str, replicas: u32) -> DeploymentResult<()>;

    /// `POST /deployment/{id}/update-timeout`
    async fn update_timeout(&self, id: &str, timeout_secs: u64) -> DeploymentResult<()>;

    /// `PATCH /vault/{vault}/update-balance`
    async fn update_vault_balance(&self, vault: &str) -> DeploymentResult<()>;
}
