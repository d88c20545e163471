//! Transaction assembly
//!
//! Combines already-built instructions into one unsigned message that shares
//! a single blockhash and a single fee payer. Signing is left to the
//! submission engine so the builder never touches key material.

use std::sync::Arc;

use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, instruction::Instruction, message::Message,
    pubkey::Pubkey,
};
use tracing::debug;

use crate::ledger::LedgerRpc;
use crate::tx_builder::errors::TransactionBuilderError;

/// Unsigned transaction ready for the submission engine
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub message: Message,
    pub blockhash: Hash,
    /// Accounts that must sign, fee payer first
    pub required_signers: Vec<Pubkey>,
}

impl BuiltTransaction {
    pub fn fee_payer(&self) -> Option<&Pubkey> {
        self.message.account_keys.first()
    }

    pub fn instruction_count(&self) -> usize {
        self.message.instructions.len()
    }
}

/// Builds messages against a live ledger
#[derive(Clone)]
pub struct TxBuilder {
    ledger: Arc<dyn LedgerRpc>,
    commitment: CommitmentConfig,
}

impl TxBuilder {
    /// Builder fetching `finalized` blockhashes
    pub fn new(ledger: Arc<dyn LedgerRpc>) -> Self {
        Self {
            ledger,
            commitment: CommitmentConfig::finalized(),
        }
    }

    pub fn with_commitment(mut self, commitment: CommitmentConfig) -> Self {
        self.commitment = commitment;
        self
    }

    /// Assemble `instructions` into one message paid for by `fee_payer`
    ///
    /// Exactly one blockhash is fetched per call, so every instruction in the
    /// batch lands together or not at all.
    pub async fn assemble(
        &self,
        instructions: &[Instruction],
        fee_payer: &Pubkey,
    ) -> Result<BuiltTransaction, TransactionBuilderError> {
        if instructions.is_empty() {
            return Err(TransactionBuilderError::InvalidLayout(
                "refusing to assemble a transaction without instructions".to_string(),
            ));
        }

        let blockhash = self
            .ledger
            .get_latest_blockhash(self.commitment)
            .await
            .map_err(|e| {
                TransactionBuilderError::blockhash_unavailable(format!(
                    "{} ({})",
                    e,
                    self.ledger.endpoint()
                ))
            })?;

        let built = assemble_with_blockhash(instructions, fee_payer, blockhash)?;
        debug!(
            fee_payer = %fee_payer,
            blockhash = %blockhash,
            instructions = built.instruction_count(),
            signers = built.required_signers.len(),
            "Assembled transaction"
        );
        Ok(built)
    }
}

/// Offline variant of [`TxBuilder::assemble`] for a known blockhash
pub fn assemble_with_blockhash(
    instructions: &[Instruction],
    fee_payer: &Pubkey,
    blockhash: Hash,
) -> Result<BuiltTransaction, TransactionBuilderError> {
    if instructions.is_empty() {
        return Err(TransactionBuilderError::InvalidLayout(
            "refusing to assemble a transaction without instructions".to_string(),
        ));
    }

    let message = Message::new_with_blockhash(instructions, Some(fee_payer), &blockhash);
    let signer_count = message.header.num_required_signatures as usize;
    let required_signers = message.account_keys[..signer_count].to_vec();

    Ok(BuiltTransaction {
        message,
        blockhash,
        required_signers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockLedger;
    use solana_sdk::system_instruction;

    #[test]
    fn test_required_signers_fee_payer_first() {
        let payer = Pubkey::new_unique();
        let job = Pubkey::new_unique();
        let ix = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1, 2, 3],
            vec![
                solana_sdk::instruction::AccountMeta::new(job, true),
                solana_sdk::instruction::AccountMeta::new(payer, true),
            ],
        );
        let built = assemble_with_blockhash(&[ix], &payer, Hash::new_unique()).unwrap();

        assert_eq!(built.fee_payer(), Some(&payer));
        assert_eq!(built.required_signers.len(), 2);
        assert_eq!(built.required_signers[0], payer);
        assert!(built.required_signers.contains(&job));
    }

    #[test]
    fn test_empty_batch_rejected() {
        let err = assemble_with_blockhash(&[], &Pubkey::new_unique(), Hash::default()).unwrap_err();
        assert!(matches!(err, TransactionBuilderError::InvalidLayout(_)));
    }

    #[tokio::test]
    async fn test_assemble_uses_one_blockhash() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Pubkey::new_unique();
        let ixs = vec![
            system_instruction::transfer(&payer, &Pubkey::new_unique(), 10),
            system_instruction::transfer(&payer, &Pubkey::new_unique(), 20),
        ];

        let builder = TxBuilder::new(ledger.clone());
        let built = builder.assemble(&ixs, &payer).await.unwrap();

        assert_eq!(built.instruction_count(), 2);
        assert_eq!(built.message.recent_blockhash, built.blockhash);
        assert_eq!(built.blockhash, ledger.blockhash());
        assert_eq!(ledger.blockhash_calls(), 1);
    }

    #[tokio::test]
    async fn test_blockhash_failure_is_retryable() {
        let ledger = Arc::new(MockLedger::new());
        ledger.fail_blockhash(true);
        let payer = Pubkey::new_unique();
        let ixs = vec![system_instruction::transfer(&payer, &Pubkey::new_unique(), 1)];

        let err = TxBuilder::new(ledger).assemble(&ixs, &payer).await.unwrap_err();
        assert!(matches!(err, TransactionBuilderError::Blockhash(_)));
        assert!(err.is_retryable());
    }
}
