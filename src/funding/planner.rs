//! Funding planner
//!
//! Decides how much native currency and how many tokens to move into a
//! deployment vault. [`decide_for_vault`] is a pure function of the market
//! price, the wallet balance and what the vault already holds; the planner
//! reads all three fresh from the ledger on every call and never writes
//! anything, so it is safe to call repeatedly.

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, warn};

use crate::address::{to_ui_amount, NetworkIds};
use crate::funding::errors::FundingError;
use crate::funding::market::{token_account_amount, MarketSnapshot};
use crate::ledger::LedgerRpc;

pub const DEFAULT_NATIVE_TARGET_LAMPORTS: u64 = 3_000_000;
pub const DEFAULT_FEE_RESERVE_LAMPORTS: u64 = 100_000;
/// Covers a native transfer plus rent for a new destination token account
pub const DEFAULT_MIN_NATIVE_FOR_TOKEN_LAMPORTS: u64 = 3_000_000;

const LAMPORT_DECIMALS: u8 = 9;

/// Funding thresholds, in lamports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingPolicy {
    pub native_target_lamports: u64,
    pub fee_reserve_lamports: u64,
    pub min_native_for_token_lamports: u64,
}

impl Default for FundingPolicy {
    fn default() -> Self {
        Self {
            native_target_lamports: DEFAULT_NATIVE_TARGET_LAMPORTS,
            fee_reserve_lamports: DEFAULT_FEE_RESERVE_LAMPORTS,
            min_native_for_token_lamports: DEFAULT_MIN_NATIVE_FOR_TOKEN_LAMPORTS,
        }
    }
}

/// Balances already held by a vault
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VaultBalance {
    pub lamports: u64,
    /// Token micro-units in the vault's token account
    pub token_amount: u64,
}

/// Outcome of a funding decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingPlan {
    pub market_price: u64,
    pub wallet_lamports: u64,
    pub vault: VaultBalance,
    pub native_lamports: u64,
    /// Token micro-units to move into the vault
    pub token_amount: u64,
    /// Priced market, but the wallet cannot afford the token leg yet
    pub token_deferred: bool,
}

impl FundingPlan {
    pub fn requires_transfer(&self) -> bool {
        self.native_lamports > 0 || self.token_amount > 0
    }

    /// Native lamports the vault lacks against the policy target
    pub fn native_shortfall(&self, policy: &FundingPolicy) -> u64 {
        policy.native_target_lamports.saturating_sub(self.vault.lamports)
    }

    /// Fail fast on plans that would submit a transfer bound to fail
    pub fn ensure_fundable(&self, policy: &FundingPolicy) -> Result<(), FundingError> {
        if self.native_lamports == 0 && self.native_shortfall(policy) > 0 {
            return Err(FundingError::insufficient_native(
                policy.fee_reserve_lamports.saturating_add(1),
                self.wallet_lamports,
                "wallet balance does not exceed the fee reserve",
            ));
        }
        if self.token_deferred {
            return Err(FundingError::insufficient_native(
                policy.min_native_for_token_lamports,
                self.wallet_lamports,
                format!(
                    "market charges {} token units but the wallet cannot cover the token transfer",
                    self.market_price
                ),
            ));
        }
        Ok(())
    }
}

/// Pure funding decision for an empty vault
pub fn decide(market_price: u64, wallet_lamports: u64, policy: &FundingPolicy) -> FundingPlan {
    decide_for_vault(market_price, wallet_lamports, VaultBalance::default(), policy)
}

/// Pure funding decision: move only what `vault` lacks
pub fn decide_for_vault(
    market_price: u64,
    wallet_lamports: u64,
    vault: VaultBalance,
    policy: &FundingPolicy,
) -> FundingPlan {
    let token_needed = market_price.saturating_sub(vault.token_amount);
    let (token_amount, token_deferred) = if token_needed == 0 {
        (0, false)
    } else if wallet_lamports >= policy.min_native_for_token_lamports {
        (token_needed, false)
    } else {
        (0, true)
    };

    let affordable = wallet_lamports.saturating_sub(policy.fee_reserve_lamports);
    let native_needed = policy.native_target_lamports.saturating_sub(vault.lamports);
    let native_lamports = native_needed.min(affordable);

    FundingPlan {
        market_price,
        wallet_lamports,
        vault,
        native_lamports,
        token_amount,
        token_deferred,
    }
}

/// Reads market and wallet state and produces a [`FundingPlan`]
#[derive(Clone)]
pub struct FundingPlanner {
    ledger: Arc<dyn LedgerRpc>,
    ids: NetworkIds,
    policy: FundingPolicy,
}

impl FundingPlanner {
    pub fn new(ledger: Arc<dyn LedgerRpc>, ids: NetworkIds, policy: FundingPolicy) -> Self {
        Self { ledger, ids, policy }
    }

    pub fn policy(&self) -> &FundingPolicy {
        &self.policy
    }

    /// Plan without judging whether the plan is affordable
    pub async fn plan(&self, wallet: &Pubkey, market: &Pubkey) -> Result<FundingPlan, FundingError> {
        let snapshot = MarketSnapshot::fetch(self.ledger.as_ref(), market).await?;
        let wallet_lamports = self.ledger.get_balance(wallet).await?;

        let plan = decide(snapshot.price, wallet_lamports, &self.policy);

        if snapshot.is_free() {
            info!(market = %market, "Free market, no token funding required");
        } else if plan.token_deferred {
            warn!(
                market = %market,
                price = snapshot.price_ui(self.ids.token_decimals),
                wallet_native = to_ui_amount(wallet_lamports, LAMPORT_DECIMALS),
                min_native = to_ui_amount(self.policy.min_native_for_token_lamports, LAMPORT_DECIMALS),
                "Token funding deferred: wallet below native minimum"
            );
        }
        debug!(
            market = %market,
            wallet = %wallet,
            native_lamports = plan.native_lamports,
            token_amount = plan.token_amount,
            "Funding plan computed"
        );

        Ok(plan)
    }

    /// Plan against the balances `vault` already holds
    pub async fn plan_for_vault(
        &self,
        wallet: &Pubkey,
        vault: &Pubkey,
        market: &Pubkey,
    ) -> Result<FundingPlan, FundingError> {
        let snapshot = MarketSnapshot::fetch(self.ledger.as_ref(), market).await?;
        let wallet_lamports = self.ledger.get_balance(wallet).await?;
        let held = self.vault_balance(vault).await?;

        let plan = decide_for_vault(snapshot.price, wallet_lamports, held, &self.policy);
        if !plan.requires_transfer() && !plan.token_deferred {
            info!(
                vault = %vault,
                vault_native = to_ui_amount(held.lamports, LAMPORT_DECIMALS),
                vault_tokens = to_ui_amount(held.token_amount, self.ids.token_decimals),
                "Vault already holds sufficient funds"
            );
        } else if plan.token_deferred {
            warn!(
                vault = %vault,
                market = %market,
                price = snapshot.price_ui(self.ids.token_decimals),
                wallet_native = to_ui_amount(wallet_lamports, LAMPORT_DECIMALS),
                "Token funding deferred: wallet below native minimum"
            );
        }
        debug!(
            vault = %vault,
            market = %market,
            held_lamports = held.lamports,
            held_tokens = held.token_amount,
            native_lamports = plan.native_lamports,
            token_amount = plan.token_amount,
            "Vault funding plan computed"
        );
        Ok(plan)
    }

    /// [`plan_for_vault`](Self::plan_for_vault) followed by [`FundingPlan::ensure_fundable`]
    pub async fn plan_checked(
        &self,
        wallet: &Pubkey,
        vault: &Pubkey,
        market: &Pubkey,
    ) -> Result<FundingPlan, FundingError> {
        let plan = self.plan_for_vault(wallet, vault, market).await?;
        plan.ensure_fundable(&self.policy)?;
        Ok(plan)
    }

    /// Native and token balances of `vault`; a missing token account holds nothing
    pub async fn vault_balance(&self, vault: &Pubkey) -> Result<VaultBalance, FundingError> {
        let lamports = self.ledger.get_balance(vault).await?;
        let token_amount = match self.ledger.get_account_data(&self.ids.token_account(vault)).await? {
            Some(data) => token_account_amount(&data)?,
            None => 0,
        };
        Ok(VaultBalance { lamports, token_amount })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockLedger;

    #[test]
    fn test_free_market_needs_no_tokens() {
        let policy = FundingPolicy::default();
        for balance in [0, 50_000, 3_000_000, 10_000_000_000] {
            let plan = decide(0, balance, &policy);
            assert_eq!(plan.token_amount, 0);
            assert!(!plan.token_deferred);
        }
    }

    #[test]
    fn test_low_balance_defers_tokens() {
        let policy = FundingPolicy::default();
        let plan = decide(2_000_000, 2_999_999, &policy);
        assert_eq!(plan.token_amount, 0);
        assert!(plan.token_deferred);
        assert!(plan.ensure_fundable(&policy).is_err());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let plan = decide(2_000_000, 3_000_000, &FundingPolicy::default());
        assert_eq!(plan.token_amount, 2_000_000);
        assert_eq!(plan.native_lamports, 2_900_000);
    }

    #[test]
    fn test_native_capped_by_target() {
        // 0.01 native, price 2.0 tokens
        let plan = decide(2_000_000, 10_000_000, &FundingPolicy::default());
        assert_eq!(plan.native_lamports, 3_000_000);
        assert_eq!(plan.token_amount, 2_000_000);
        assert!(plan.requires_transfer());
        assert!(plan.ensure_fundable(&FundingPolicy::default()).is_ok());
    }

    #[test]
    fn test_balance_under_reserve_is_insufficient() {
        let policy = FundingPolicy::default();
        let plan = decide(0, 90_000, &policy);
        assert_eq!(plan.native_lamports, 0);
        let err = plan.ensure_fundable(&policy).unwrap_err();
        assert!(matches!(err, FundingError::InsufficientFunds { asset: "native", .. }));
    }

    #[tokio::test]
    async fn test_planner_reads_fresh_state() {
        let ledger = Arc::new(MockLedger::new());
        let wallet = Pubkey::new_unique();
        let market = Pubkey::new_unique();
        ledger.set_market_price(market, 2_000_000);
        ledger.set_balance(wallet, 10_000_000);

        let planner = FundingPlanner::new(ledger.clone(), NetworkIds::default(), FundingPolicy::default());
        let first = planner.plan_checked(&wallet, &Pubkey::new_unique(), &market).await.unwrap();
        assert_eq!(first.token_amount, 2_000_000);

        ledger.set_market_price(market, 0);
        let second = planner.plan(&wallet, &market).await.unwrap();
        assert_eq!(second.token_amount, 0);
    }

    #[test]
    fn test_funded_vault_needs_nothing() {
        let policy = FundingPolicy::default();
        let held = VaultBalance {
            lamports: 3_000_000,
            token_amount: 2_000_000,
        };
        // wallet too poor to fund anything, but nothing is needed
        let plan = decide_for_vault(2_000_000, 50_000, held, &policy);
        assert!(!plan.requires_transfer());
        assert!(!plan.token_deferred);
        assert!(plan.ensure_fundable(&policy).is_ok());
    }

    #[test]
    fn test_partially_funded_vault_gets_shortfall() {
        let held = VaultBalance {
            lamports: 1_000_000,
            token_amount: 500_000,
        };
        let plan = decide_for_vault(2_000_000, 10_000_000, held, &FundingPolicy::default());
        assert_eq!(plan.native_lamports, 2_000_000);
        assert_eq!(plan.token_amount, 1_500_000);
    }

    #[tokio::test]
    async fn test_planner_reads_vault_balances() {
        let ledger = Arc::new(MockLedger::new());
        let ids = NetworkIds::default();
        let wallet = Pubkey::new_unique();
        let vault = Pubkey::new_unique();
        let market = Pubkey::new_unique();
        ledger.set_market_price(market, 2_000_000);
        ledger.set_balance(wallet, 10_000_000);
        ledger.set_balance(vault, 2_500_000);
        ledger.set_token_balance(ids.token_account(&vault), 2_000_000);

        let planner = FundingPlanner::new(ledger, ids, FundingPolicy::default());
        let plan = planner.plan_checked(&wallet, &vault, &market).await.unwrap();
        assert_eq!(plan.vault.token_amount, 2_000_000);
        assert_eq!(plan.native_lamports, 500_000);
        assert_eq!(plan.token_amount, 0);
    }

    #[tokio::test]
    async fn test_missing_market_is_market_data_error() {
        let ledger = Arc::new(MockLedger::new());
        let planner = FundingPlanner::new(ledger, NetworkIds::default(), FundingPolicy::default());
        let err = planner
            .plan(&Pubkey::new_unique(), &Pubkey::new_unique())
            .await
            .unwrap_err();
        assert!(matches!(err, FundingError::MarketData(_)));
    }
}
