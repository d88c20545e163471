//! Explicit runtime context
//!
//! Holds the wallet, the three external collaborators and the policies.
//! Components are built from it on demand; nothing is process-global.

use anyhow::{Context as _, Result};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::info;

use crate::address::NetworkIds;
use crate::config::Config;
use crate::deployment::{
    DeploymentApi, DeploymentClient, DeploymentTracker, DiagnosticMatcher, RestartPolicy,
    StartController, TrackerPolicy,
};
use crate::funding::{FundingPlanner, FundingPolicy, TransferBuilder, VaultFunder};
use crate::job::JobPoster;
use crate::ledger::{LedgerRpc, SolanaLedger};
use crate::metrics::EngineMetrics;
use crate::storage::{ContentStore, PinataStore};
use crate::submission::{SubmissionEngine, SubmissionPolicy};
use crate::tx_builder::TxBuilder;
use crate::wallet::WalletManager;

/// Runtime policies of every component
#[derive(Debug, Clone, Default)]
pub struct Policies {
    pub submission: SubmissionPolicy,
    pub funding: FundingPolicy,
    pub restart: RestartPolicy,
    pub tracker: TrackerPolicy,
    pub matcher: DiagnosticMatcher,
}

pub struct DeployerContext {
    pub wallet: WalletManager,
    pub ledger: Arc<dyn LedgerRpc>,
    pub api: Arc<dyn DeploymentApi>,
    pub storage: Option<Arc<dyn ContentStore>>,
    pub ids: NetworkIds,
    /// Default market when a request names none
    pub market: Option<Pubkey>,
    pub metrics: Arc<EngineMetrics>,
    pub policies: Policies,
}

impl DeployerContext {
    pub fn new(
        wallet: WalletManager,
        ledger: Arc<dyn LedgerRpc>,
        api: Arc<dyn DeploymentApi>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            wallet,
            ledger,
            api,
            storage: None,
            ids: NetworkIds::default(),
            market: None,
            metrics,
            policies: Policies::default(),
        }
    }

    /// Wire the production collaborators described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let wallet = WalletManager::resolve(&config.wallet_source()).context("Failed to load wallet")?;
        info!(wallet = %wallet.pubkey(), "Wallet loaded");

        let ledger: Arc<dyn LedgerRpc> = Arc::new(SolanaLedger::new(&config.network.rpc_url, config.rpc_timeout()));
        let api: Arc<dyn DeploymentApi> = Arc::new(
            DeploymentClient::new(wallet.clone(), config.client_settings())
                .context("Failed to build deployment manager client")?,
        );
        let storage: Option<Arc<dyn ContentStore>> = match &config.storage.pinata_jwt {
            Some(jwt) => Some(Arc::new(
                PinataStore::new(&config.storage.pinata_url, jwt.clone(), config.rpc_timeout())
                    .context("Failed to build content store")?,
            )),
            None => None,
        };
        let metrics = Arc::new(EngineMetrics::new().context("Failed to register metrics")?);

        Ok(Self {
            wallet,
            ledger,
            api,
            storage,
            ids: config.network_ids()?,
            market: config.market()?,
            metrics,
            policies: Policies {
                submission: config.submission_policy(),
                funding: config.funding_policy(),
                restart: config.restart_policy(),
                tracker: config.tracker_policy(),
                matcher: config.diagnostic_matcher(),
            },
        })
    }

    pub fn with_storage(mut self, storage: Arc<dyn ContentStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_market(mut self, market: Pubkey) -> Self {
        self.market = Some(market);
        self
    }

    pub fn with_ids(mut self, ids: NetworkIds) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_policies(mut self, policies: Policies) -> Self {
        self.policies = policies;
        self
    }

    pub fn tx_builder(&self) -> TxBuilder {
        TxBuilder::new(self.ledger.clone())
    }

    pub fn submission_engine(&self) -> Arc<SubmissionEngine> {
        Arc::new(SubmissionEngine::new(
            self.ledger.clone(),
            self.policies.submission,
            self.metrics.clone(),
        ))
    }

    pub fn planner(&self) -> FundingPlanner {
        FundingPlanner::new(self.ledger.clone(), self.ids, self.policies.funding)
    }

    pub fn funder(&self) -> VaultFunder {
        VaultFunder::new(
            self.planner(),
            TransferBuilder::new(self.ledger.clone(), self.ids),
            self.tx_builder(),
            self.submission_engine(),
            self.wallet.keypair_arc(),
        )
        .with_balance_notifier(self.api.clone())
    }

    pub fn job_poster(&self, market: Pubkey) -> JobPoster {
        JobPoster::new(
            self.ids,
            market,
            self.planner(),
            self.tx_builder(),
            self.submission_engine(),
            self.wallet.keypair_arc(),
        )
    }

    pub fn start_controller(&self) -> StartController {
        StartController::new(
            self.api.clone(),
            self.policies.matcher.clone(),
            self.policies.restart,
            self.metrics.clone(),
        )
        .with_health_probe(self.ledger.clone())
    }

    pub fn tracker(&self) -> DeploymentTracker {
        DeploymentTracker::new(
            self.api.clone(),
            self.policies.matcher.clone(),
            self.policies.tracker,
            self.metrics.clone(),
        )
    }
}

impl std::fmt::Debug for DeployerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployerContext")
            .field("wallet", &self.wallet.pubkey())
            .field("ledger", &self.ledger.endpoint())
            .field("market", &self.market)
            .field("storage", &self.storage.is_some())
            .finish_non_exhaustive()
    }
}
