//! Transfer builder
//!
//! Turns a [`FundingPlan`] into instructions:
//! 1. native transfer wallet -> vault (balance re-read right before building)
//! 2. create the vault's token account (idempotent), only when it was missing
//!    at build time
//! 3. `transfer_checked` wallet token account -> vault token account
//!
//! The instructions are meant to travel in one transaction with one
//! blockhash; see [`crate::tx_builder::TxBuilder::assemble`].

use std::sync::Arc;

use solana_sdk::{instruction::Instruction, pubkey::Pubkey, system_instruction};
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use tracing::{debug, info};

use crate::address::NetworkIds;
use crate::funding::errors::FundingError;
use crate::funding::market::token_account_amount;
use crate::funding::planner::FundingPlan;
use crate::ledger::LedgerRpc;
use crate::tx_builder::TransactionBuilderError;

/// Instructions for one funding operation
#[derive(Debug, Clone, Default)]
pub struct TransferBatch {
    pub instructions: Vec<Instruction>,
    pub native_lamports: u64,
    pub token_amount: u64,
    pub creates_destination_account: bool,
}

impl TransferBatch {
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Append these transfers after another instruction, e.g. a job listing
    pub fn appended_to(self, mut head: Vec<Instruction>) -> Vec<Instruction> {
        head.extend(self.instructions);
        head
    }
}

#[derive(Clone)]
pub struct TransferBuilder {
    ledger: Arc<dyn LedgerRpc>,
    ids: NetworkIds,
}

impl TransferBuilder {
    pub fn new(ledger: Arc<dyn LedgerRpc>, ids: NetworkIds) -> Self {
        Self { ledger, ids }
    }

    /// Build every transfer the plan asks for, native leg first
    pub async fn build(
        &self,
        wallet: &Pubkey,
        vault: &Pubkey,
        plan: &FundingPlan,
    ) -> Result<TransferBatch, FundingError> {
        let mut batch = TransferBatch::default();

        if plan.native_lamports > 0 {
            batch
                .instructions
                .push(self.native_transfer(wallet, vault, plan.native_lamports).await?);
            batch.native_lamports = plan.native_lamports;
        }

        if plan.token_amount > 0 {
            let (instructions, created) = self.token_transfer(wallet, vault, plan.token_amount).await?;
            batch.instructions.extend(instructions);
            batch.token_amount = plan.token_amount;
            batch.creates_destination_account = created;
        }

        debug!(
            vault = %vault,
            instructions = batch.len(),
            create_ata = batch.creates_destination_account,
            "Transfer batch built"
        );
        Ok(batch)
    }

    /// System transfer, after re-reading the wallet balance
    pub async fn native_transfer(
        &self,
        wallet: &Pubkey,
        destination: &Pubkey,
        lamports: u64,
    ) -> Result<Instruction, FundingError> {
        let balance = self.ledger.get_balance(wallet).await?;
        if balance < lamports {
            return Err(FundingError::insufficient_native(
                lamports,
                balance,
                "balance changed since planning",
            ));
        }
        Ok(system_instruction::transfer(wallet, destination, lamports))
    }

    /// Token transfer into `owner`'s token account
    ///
    /// Returns the instructions and whether a create-account instruction was
    /// included.
    pub async fn token_transfer(
        &self,
        wallet: &Pubkey,
        owner: &Pubkey,
        amount: u64,
    ) -> Result<(Vec<Instruction>, bool), FundingError> {
        let source = self.ids.token_account(wallet);
        let source_data = self
            .ledger
            .get_account_data(&source)
            .await?
            .ok_or_else(|| FundingError::SourceAccountMissing {
                account: source.to_string(),
            })?;
        let available = token_account_amount(&source_data)?;
        if available < amount {
            return Err(FundingError::insufficient_token(
                amount,
                available,
                format!("token account {}", source),
            ));
        }

        let destination = self.ids.token_account(owner);
        let mut instructions = Vec::with_capacity(2);
        let create = self.ledger.get_account_data(&destination).await?.is_none();
        if create {
            info!(owner = %owner, account = %destination, "Destination token account missing, creating it");
            instructions.push(create_associated_token_account_idempotent(
                wallet,
                owner,
                &self.ids.token_mint,
                &spl_token::id(),
            ));
        }

        let transfer = spl_token::instruction::transfer_checked(
            &spl_token::id(),
            &source,
            &self.ids.token_mint,
            &destination,
            wallet,
            &[],
            amount,
            self.ids.token_decimals,
        )
        .map_err(|e| TransactionBuilderError::instruction_failed("spl_token", e.to_string()))?;
        instructions.push(transfer);

        Ok((instructions, create))
    }
}
