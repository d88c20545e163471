//! Vault funding flow
//!
//! plan -> build transfers -> assemble with one blockhash -> sign, submit,
//! confirm -> notify the deployment manager of the new balance.

use std::sync::Arc;

use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use tracing::{info, warn};

use crate::deployment::DeploymentApi;
use crate::funding::errors::FundingError;
use crate::funding::planner::{FundingPlan, FundingPlanner};
use crate::funding::transfer::TransferBuilder;
use crate::submission::SubmissionEngine;
use crate::tx_builder::TxBuilder;

#[derive(Debug, Clone, PartialEq)]
pub enum FundingReceipt {
    /// Nothing to move: the vault already holds what the market needs
    NotRequired,
    Funded {
        signature: Signature,
        native_lamports: u64,
        token_amount: u64,
        created_destination_account: bool,
        instruction_count: usize,
    },
}

impl FundingReceipt {
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Self::NotRequired => None,
            Self::Funded { signature, .. } => Some(signature),
        }
    }
}

pub struct VaultFunder {
    planner: FundingPlanner,
    transfers: TransferBuilder,
    tx_builder: TxBuilder,
    engine: Arc<SubmissionEngine>,
    payer: Arc<Keypair>,
    api: Option<Arc<dyn DeploymentApi>>,
}

impl VaultFunder {
    pub fn new(
        planner: FundingPlanner,
        transfers: TransferBuilder,
        tx_builder: TxBuilder,
        engine: Arc<SubmissionEngine>,
        payer: Arc<Keypair>,
    ) -> Self {
        Self {
            planner,
            transfers,
            tx_builder,
            engine,
            payer,
            api: None,
        }
    }

    /// Report new vault balances to the deployment manager after funding
    pub fn with_balance_notifier(mut self, api: Arc<dyn DeploymentApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Read-only plan for `market`
    pub async fn plan(&self, market: &Pubkey) -> Result<FundingPlan, FundingError> {
        self.planner.plan(&self.payer.pubkey(), market).await
    }

    /// Fund `vault` for a job on `market`
    pub async fn fund(&self, vault: &Pubkey, market: &Pubkey) -> Result<FundingReceipt, FundingError> {
        let wallet = self.payer.pubkey();
        let plan = self.planner.plan_checked(&wallet, vault, market).await?;
        if !plan.requires_transfer() {
            info!(vault = %vault, market = %market, "Vault funding not required");
            return Ok(FundingReceipt::NotRequired);
        }

        let batch = self.transfers.build(&wallet, vault, &plan).await?;
        if batch.is_empty() {
            return Ok(FundingReceipt::NotRequired);
        }

        let built = self.tx_builder.assemble(&batch.instructions, &wallet).await?;
        let outcome = self
            .engine
            .sign_and_submit(&built, &[self.payer.as_ref()])
            .await?;
        let signature = outcome.into_result()?;

        info!(
            vault = %vault,
            signature = %signature,
            native_lamports = batch.native_lamports,
            token_amount = batch.token_amount,
            "Vault funded"
        );
        self.notify_balance(vault).await;

        Ok(FundingReceipt::Funded {
            signature,
            native_lamports: batch.native_lamports,
            token_amount: batch.token_amount,
            created_destination_account: batch.creates_destination_account,
            instruction_count: batch.len(),
        })
    }

    async fn notify_balance(&self, vault: &Pubkey) {
        if let Some(api) = &self.api {
            if let Err(err) = api.update_vault_balance(&vault.to_string()).await {
                warn!(vault = %vault, error = %err, "Failed to refresh vault balance");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NetworkIds;
    use crate::funding::planner::FundingPolicy;
    use crate::metrics::EngineMetrics;
    use crate::submission::SubmissionPolicy;
    use crate::test_utils::{MockDeploymentApi, MockLedger};

    fn funder(ledger: Arc<MockLedger>, payer: Arc<Keypair>, policy: FundingPolicy) -> VaultFunder {
        let ids = NetworkIds::default();
        let engine = SubmissionEngine::new(
            ledger.clone(),
            SubmissionPolicy::default(),
            Arc::new(EngineMetrics::new().unwrap()),
        );
        VaultFunder::new(
            FundingPlanner::new(ledger.clone(), ids, policy),
            TransferBuilder::new(ledger.clone(), ids),
            TxBuilder::new(ledger),
            Arc::new(engine),
            payer,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_funds_native_and_token_in_one_transaction() {
        let ledger = Arc::new(MockLedger::new());
        let ids = NetworkIds::default();
        let payer = Arc::new(Keypair::new());
        let vault = Pubkey::new_unique();
        let market = Pubkey::new_unique();
        ledger.set_market_price(market, 2_000_000);
        ledger.set_balance(payer.pubkey(), 10_000_000);
        ledger.set_token_balance(ids.token_account(&payer.pubkey()), 5_000_000);
        ledger.set_token_balance(ids.token_account(&vault), 0);

        let api = Arc::new(MockDeploymentApi::new());
        let receipt = funder(ledger.clone(), payer, FundingPolicy::default())
            .with_balance_notifier(api.clone())
            .fund(&vault, &market)
            .await
            .unwrap();

        match receipt {
            FundingReceipt::Funded {
                native_lamports,
                token_amount,
                instruction_count,
                created_destination_account,
                ..
            } => {
                assert_eq!(native_lamports, 3_000_000);
                assert_eq!(token_amount, 2_000_000);
                assert_eq!(instruction_count, 2);
                assert!(!created_destination_account);
            }
            other => panic!("unexpected receipt: {:?}", other),
        }
        assert_eq!(ledger.send_count(), 1);
        assert_eq!(ledger.sent_transactions()[0].message.instructions.len(), 2);
        assert_eq!(api.vault_updates(), vec![vault.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_balance_fails_before_sending() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Arc::new(Keypair::new());
        let market = Pubkey::new_unique();
        ledger.set_market_price(market, 2_000_000);
        ledger.set_balance(payer.pubkey(), 1_000_000);

        let err = funder(ledger.clone(), payer, FundingPolicy::default())
            .fund(&Pubkey::new_unique(), &market)
            .await
            .unwrap_err();
        assert!(matches!(err, FundingError::InsufficientFunds { .. }));
        assert_eq!(ledger.send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_funded_vault_sends_nothing() {
        let ledger = Arc::new(MockLedger::new());
        let ids = NetworkIds::default();
        let payer = Arc::new(Keypair::new());
        let vault = Pubkey::new_unique();
        let market = Pubkey::new_unique();
        ledger.set_market_price(market, 2_000_000);
        ledger.set_balance(payer.pubkey(), 10_000_000);
        ledger.set_token_balance(ids.token_account(&payer.pubkey()), 5_000_000);
        ledger.set_balance(vault, 3_000_000);
        ledger.set_token_balance(ids.token_account(&vault), 2_000_000);

        let api = Arc::new(MockDeploymentApi::new());
        let receipt = funder(ledger.clone(), payer, FundingPolicy::default())
            .with_balance_notifier(api.clone())
            .fund(&vault, &market)
            .await
            .unwrap();

        assert_eq!(receipt, FundingReceipt::NotRequired);
        assert_eq!(ledger.send_count(), 0);
        assert!(api.vault_updates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_to_move_is_not_required() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Arc::new(Keypair::new());
        let market = Pubkey::new_unique();
        ledger.set_market_price(market, 0);
        ledger.set_balance(payer.pubkey(), 10_000_000);
        let policy = FundingPolicy {
            native_target_lamports: 0,
            ..FundingPolicy::default()
        };

        let receipt = funder(ledger.clone(), payer, policy)
            .fund(&Pubkey::new_unique(), &market)
            .await
            .unwrap();
        assert_eq!(receipt, FundingReceipt::NotRequired);
        assert_eq!(ledger.send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_notification_failure_is_ignored() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Arc::new(Keypair::new());
        let market = Pubkey::new_unique();
        ledger.set_market_price(market, 0);
        ledger.set_balance(payer.pubkey(), 10_000_000);

        let api = Arc::new(MockDeploymentApi::new());
        api.fail_vault_updates(true);
        let receipt = funder(ledger, payer, FundingPolicy::default())
            .with_balance_notifier(api)
            .fund(&Pubkey::new_unique(), &market)
            .await
            .unwrap();
        assert!(receipt.signature().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_timeout_surfaces() {
        let ledger = Arc::new(MockLedger::new());
        ledger.never_confirm();
        let payer = Arc::new(Keypair::new());
        let market = Pubkey::new_unique();
        ledger.set_market_price(market, 0);
        ledger.set_balance(payer.pubkey(), 10_000_000);

        let err = funder(ledger, payer, FundingPolicy::default())
            .fund(&Pubkey::new_unique(), &market)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.category(), "timed_out");
    }
}
