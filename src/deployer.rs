//! Deployment orchestration
//!
//! `deploy` runs one job end to end:
//! upload definition -> create (DRAFT) -> fund vault -> start with recovery
//! -> optionally track until stable.
//!
//! The remaining operations are thin passthroughs to the deployment manager
//! that still run inside a [`FlowContext`] span and re-read state instead of
//! assuming a transition happened.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::watch;
use tracing::{info, warn, Instrument};

use crate::address::parse_address;
use crate::context::DeployerContext;
use crate::deployment::{
    Deployment, DeploymentCreateBody, DeploymentStatus, DeploymentStrategy, DeploymentTracker,
    StartController, StartReport, TrackReport,
};
use crate::errors::DeployerError;
use crate::funding::{FundingPlan, FundingReceipt, VaultFunder};
use crate::job::JobResult;
use crate::observability::FlowContext;
use crate::tx_builder::content_digest;

/// Job definition: an address already stored, or a document to upload
#[derive(Debug, Clone, PartialEq)]
pub enum JobDefinition {
    ContentAddress(String),
    Json(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub name: String,
    /// Falls back to the context's market
    pub market: Option<Pubkey>,
    pub definition: JobDefinition,
    pub replicas: u32,
    pub timeout_secs: u64,
    pub strategy: DeploymentStrategy,
    /// Cron expression, required by the scheduled strategy
    pub schedule: Option<String>,
    /// Track until a stable status after starting
    pub wait: bool,
}

impl DeployRequest {
    pub fn new(name: impl Into<String>, definition: JobDefinition) -> Self {
        Self {
            name: name.into(),
            market: None,
            definition,
            replicas: 1,
            timeout_secs: 3600,
            strategy: DeploymentStrategy::default(),
            schedule: None,
            wait: true,
        }
    }

    fn validate(&self) -> Result<(), DeployerError> {
        if self.name.trim().is_empty() {
            return Err(DeployerError::InvalidRequest("deployment name is empty".to_string()));
        }
        if self.replicas == 0 {
            return Err(DeployerError::InvalidRequest("replicas must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(DeployerError::InvalidRequest("timeout must be greater than zero".to_string()));
        }
        if self.strategy == DeploymentStrategy::Scheduled && self.schedule.is_none() {
            return Err(DeployerError::InvalidRequest(
                "scheduled strategy requires a schedule".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of [`Deployer::deploy`]
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub deployment: Deployment,
    pub content_address: String,
    pub funding: FundingReceipt,
    pub start: StartReport,
    /// Distinct statuses observed, starting with DRAFT
    pub history: Vec<DeploymentStatus>,
    pub tracked: Option<TrackReport>,
}

impl DeployOutcome {
    pub fn status(&self) -> DeploymentStatus {
        self.deployment.status
    }

    pub fn summary(&self) -> DeploySummary {
        DeploySummary {
            id: self.deployment.id.clone(),
            status: self.deployment.status,
            vault: self.deployment.vault.clone(),
            content_address: self.content_address.clone(),
            funding_signature: self.funding.signature().map(|s| s.to_string()),
            start_attempts: self.start.attempts,
            restarts: self.start.restarts + self.tracked.as_ref().map(|t| t.restarts).unwrap_or(0),
            history: self.history.clone(),
        }
    }
}

/// Serializable view of a [`DeployOutcome`]
#[derive(Debug, Clone, Serialize)]
pub struct DeploySummary {
    pub id: String,
    pub status: DeploymentStatus,
    pub vault: String,
    pub content_address: String,
    pub funding_signature: Option<String>,
    pub start_attempts: u32,
    pub restarts: u32,
    pub history: Vec<DeploymentStatus>,
}

pub struct Deployer {
    ctx: Arc<DeployerContext>,
    funder: VaultFunder,
    controller: StartController,
    tracker: DeploymentTracker,
}

impl Deployer {
    pub fn new(ctx: DeployerContext) -> Self {
        let funder = ctx.funder();
        let controller = ctx.start_controller();
        let tracker = ctx.tracker();
        Self {
            ctx: Arc::new(ctx),
            funder,
            controller,
            tracker,
        }
    }

    pub fn context(&self) -> &DeployerContext {
        &self.ctx
    }

    /// Latest status of `id` observed by any flow of this deployer
    pub fn subscribe(&self, id: &str) -> watch::Receiver<Option<DeploymentStatus>> {
        self.tracker.subscribe(id)
    }

    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployOutcome, DeployerError> {
        let flow = FlowContext::new("deploy", request.name.clone());
        let result = self.deploy_inner(request).instrument(flow.span()).await;
        flow.finish(&result);
        result
    }

    async fn deploy_inner(&self, request: DeployRequest) -> Result<DeployOutcome, DeployerError> {
        request.validate()?;
        let market = self.resolve_market(request.market)?;
        let content_address = self.resolve_definition(&request.definition).await?;

        let created = self
            .ctx
            .api
            .create(&DeploymentCreateBody {
                name: request.name.clone(),
                market: market.to_string(),
                ipfs_definition_hash: Some(content_address.clone()),
                replicas: request.replicas,
                timeout: request.timeout_secs,
                strategy: request.strategy,
                schedule: request.schedule.clone(),
            })
            .await?;
        info!(deployment = %created.id, vault = %created.vault, status = %created.status, "Deployment created");

        let id = created.id.as_str();
        let mut history = Vec::new();
        self.record(id, &mut history, created.status);

        let vault = parse_address("vault", &created.vault)?;
        let funding = self.funder.fund(&vault, &market).await.map_err(|source| {
            warn!(deployment = id, vault = %vault, error = %source, "Vault funding failed, deployment left unstarted");
            DeployerError::FundingIncomplete {
                id: created.id.clone(),
                vault: created.vault.clone(),
                last_status: created.status,
                source,
            }
        })?;

        let start = self.controller.start(id).await?;
        if let Some(status) = start.start_status {
            self.record(id, &mut history, status);
        }
        self.record(id, &mut history, start.deployment.status);

        let mut deployment = start.deployment.clone();
        let tracked = if request.wait && !deployment.status.is_stable() {
            let report = self.tracker.wait_for_stable(id).await?;
            for status in &report.transitions {
                self.record(id, &mut history, *status);
            }
            deployment = report.deployment.clone();
            Some(report)
        } else {
            None
        };

        Ok(DeployOutcome {
            deployment,
            content_address,
            funding,
            start,
            history,
            tracked,
        })
    }

    /// Post a job straight to the Jobs program
    pub async fn post_job(
        &self,
        market: Option<Pubkey>,
        definition: &JobDefinition,
        timeout_secs: u64,
    ) -> Result<JobResult, DeployerError> {
        let flow = FlowContext::new("post", "job");
        let result = async {
            let market = self.resolve_market(market)?;
            let content_address = self.resolve_definition(definition).await?;
            let posted = self
                .ctx
                .job_poster(market)
                .post(&content_address, timeout_secs)
                .await?;
            Ok(posted)
        }
        .instrument(flow.span())
        .await;
        flow.finish(&result);
        result
    }

    pub async fn status(&self, id: &str) -> Result<Deployment, DeployerError> {
        let deployment = self.ctx.api.get(id).await?;
        self.tracker.observe(id, deployment.status);
        Ok(deployment)
    }

    /// Start (or restart) an existing deployment with recovery
    pub async fn start(&self, id: &str) -> Result<StartReport, DeployerError> {
        let flow = FlowContext::new("start", id);
        let result = self
            .controller
            .start(id)
            .instrument(flow.span())
            .await
            .map_err(DeployerError::from);
        flow.finish(&result);
        if let Ok(report) = &result {
            self.tracker.observe(id, report.deployment.status);
        }
        result
    }

    /// Track until stable; `timeout` overrides the configured completion timeout
    pub async fn wait(&self, id: &str, timeout: Option<Duration>) -> Result<TrackReport, DeployerError> {
        let flow = FlowContext::new("wait", id);
        let timeout = timeout.unwrap_or(self.tracker.policy().completion_timeout);
        let result = self
            .tracker
            .track(id, timeout)
            .instrument(flow.span())
            .await
            .map_err(DeployerError::from);
        flow.finish(&result);
        result
    }

    pub async fn stop(&self, id: &str) -> Result<DeploymentStatus, DeployerError> {
        let flow = FlowContext::new("stop", id);
        let result = async {
            let response = self.ctx.api.stop(id).await?;
            info!(deployment = id, status = %response.status, "Stop requested");
            self.tracker.observe(id, response.status);
            Ok(response.status)
        }
        .instrument(flow.span())
        .await;
        flow.finish(&result);
        result
    }

    pub async fn archive(&self, id: &str) -> Result<(), DeployerError> {
        let flow = FlowContext::new("archive", id);
        let result = self
            .ctx
            .api
            .archive(id)
            .instrument(flow.span())
            .await
            .map_err(DeployerError::from);
        flow.finish(&result);
        if result.is_ok() {
            self.tracker.forget(id);
        }
        result
    }

    pub async fn scale(&self, id: &str, replicas: u32) -> Result<Deployment, DeployerError> {
        if replicas == 0 {
            return Err(DeployerError::InvalidRequest("replicas must be at least 1".to_string()));
        }
        let flow = FlowContext::new("scale", id);
        let result = async {
            self.ctx.api.update_replicas(id, replicas).await?;
            Ok(self.ctx.api.get(id).await?)
        }
        .instrument(flow.span())
        .await;
        flow.finish(&result);
        result
    }

    pub async fn extend(&self, id: &str, timeout_secs: u64) -> Result<Deployment, DeployerError> {
        if timeout_secs == 0 {
            return Err(DeployerError::InvalidRequest("timeout must be greater than zero".to_string()));
        }
        let flow = FlowContext::new("extend", id);
        let result = async {
            self.ctx.api.update_timeout(id, timeout_secs).await?;
            Ok(self.ctx.api.get(id).await?)
        }
        .instrument(flow.span())
        .await;
        flow.finish(&result);
        result
    }

    /// Fund an existing deployment's vault against its own market
    pub async fn top_up(&self, id: &str) -> Result<FundingReceipt, DeployerError> {
        let flow = FlowContext::new("top_up", id);
        let result = async {
            let deployment = self.ctx.api.get(id).await?;
            let vault = parse_address("vault", &deployment.vault)?;
            let market = parse_address("market", &deployment.market)?;
            Ok(self.funder.fund(&vault, &market).await?)
        }
        .instrument(flow.span())
        .await;
        flow.finish(&result);
        result
    }

    /// Funding decision for `market` without moving anything
    pub async fn plan_funding(&self, market: Option<Pubkey>) -> Result<FundingPlan, DeployerError> {
        let market = self.resolve_market(market)?;
        Ok(self.funder.plan(&market).await?)
    }

    fn resolve_market(&self, market: Option<Pubkey>) -> Result<Pubkey, DeployerError> {
        market
            .or(self.ctx.market)
            .ok_or_else(|| DeployerError::InvalidRequest("no market given and none configured".to_string()))
    }

    async fn resolve_definition(&self, definition: &JobDefinition) -> Result<String, DeployerError> {
        let content_address = match definition {
            JobDefinition::ContentAddress(address) => address.trim().to_string(),
            JobDefinition::Json(document) => {
                let storage = self
                    .ctx
                    .storage
                    .as_ref()
                    .ok_or_else(|| DeployerError::NotConfigured("content storage (PINATA_JWT)".to_string()))?;
                storage.upload_json(document).await?
            }
        };
        // Rejects addresses the listing instruction could not carry
        content_digest(&content_address)?;
        Ok(content_address)
    }

    fn record(&self, id: &str, history: &mut Vec<DeploymentStatus>, status: DeploymentStatus) {
        if history.last() != Some(&status) {
            history.push(status);
        }
        self.tracker.observe(id, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::EngineMetrics;
    use crate::test_utils::{sample_deployment, MockContentStore, MockDeploymentApi, MockLedger, SAMPLE_CID, SAMPLE_MARKET};
    use crate::wallet::WalletManager;
    use solana_sdk::signature::Keypair;
    use std::str::FromStr;

    fn deployer(ledger: Arc<MockLedger>, api: Arc<MockDeploymentApi>) -> Deployer {
        let ctx = DeployerContext::new(
            WalletManager::from_keypair(Keypair::new()),
            ledger,
            api,
            Arc::new(EngineMetrics::new().unwrap()),
        );
        Deployer::new(ctx)
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected_before_any_call() {
        let api = Arc::new(MockDeploymentApi::new());
        let deployer = deployer(Arc::new(MockLedger::new()), api.clone());

        let mut request = DeployRequest::new("job", JobDefinition::ContentAddress(SAMPLE_CID.to_string()));
        request.replicas = 0;
        assert!(matches!(
            deployer.deploy(request).await,
            Err(DeployerError::InvalidRequest(_))
        ));

        let request = DeployRequest::new("job", JobDefinition::ContentAddress(SAMPLE_CID.to_string()));
        assert!(matches!(
            deployer.deploy(request).await,
            Err(DeployerError::InvalidRequest(_))
        ));
        assert!(api.created().is_empty());
    }

    #[tokio::test]
    async fn test_json_definition_requires_storage() {
        let deployer = deployer(Arc::new(MockLedger::new()), Arc::new(MockDeploymentApi::new()));
        let mut request = DeployRequest::new("job", JobDefinition::Json(serde_json::json!({ "ops": [] })));
        request.market = Some(Pubkey::from_str(SAMPLE_MARKET).unwrap());
        assert!(matches!(
            deployer.deploy(request).await,
            Err(DeployerError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_json_definition_uploaded() {
        let ledger = Arc::new(MockLedger::new());
        let storage = Arc::new(MockContentStore::new());
        let ctx = DeployerContext::new(
            WalletManager::from_keypair(Keypair::new()),
            ledger,
            Arc::new(MockDeploymentApi::new()),
            Arc::new(EngineMetrics::new().unwrap()),
        )
        .with_storage(storage.clone());
        let deployer = Deployer::new(ctx);

        let address = deployer
            .resolve_definition(&JobDefinition::Json(serde_json::json!({ "version": "0.1" })))
            .await
            .unwrap();
        assert_eq!(address, SAMPLE_CID);
        assert_eq!(storage.uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_scale_and_extend_reread_state() {
        let api = Arc::new(MockDeploymentApi::new());
        let mut updated = sample_deployment("dep-1", DeploymentStatus::Running);
        updated.replicas = 3;
        api.push_get(updated);
        let deployer = deployer(Arc::new(MockLedger::new()), api.clone());

        let deployment = deployer.scale("dep-1", 3).await.unwrap();
        assert_eq!(deployment.replicas, 3);
        assert_eq!(api.replica_updates(), vec![("dep-1".to_string(), 3)]);

        deployer.extend("dep-1", 7200).await.unwrap();
        assert_eq!(api.timeout_updates(), vec![("dep-1".to_string(), 7200)]);
        assert!(deployer.scale("dep-1", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_publishes_status() {
        let api = Arc::new(MockDeploymentApi::new());
        let deployer = deployer(Arc::new(MockLedger::new()), api.clone());
        let rx = deployer.subscribe("dep-1");
        let other = deployer.subscribe("dep-2");

        assert_eq!(deployer.stop("dep-1").await.unwrap(), DeploymentStatus::Stopping);
        assert_eq!(*rx.borrow(), Some(DeploymentStatus::Stopping));
        assert_eq!(*other.borrow(), None);
        deployer.archive("dep-1").await.unwrap();
        assert_eq!(api.stop_calls(), 1);
        assert_eq!(api.archive_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ignores_other_deployments() {
        let api = Arc::new(MockDeploymentApi::new());
        api.push_get(sample_deployment("dep-b", DeploymentStatus::Stopped));
        api.push_get(sample_deployment("dep-a", DeploymentStatus::Running));
        let deployer = deployer(Arc::new(MockLedger::new()), api);

        assert_eq!(deployer.status("dep-b").await.unwrap().status, DeploymentStatus::Stopped);
        let report = deployer.wait("dep-a", None).await.unwrap();

        assert_eq!(report.transitions, vec![DeploymentStatus::Running]);
        assert_eq!(*deployer.subscribe("dep-b").borrow(), Some(DeploymentStatus::Stopped));
    }
}
