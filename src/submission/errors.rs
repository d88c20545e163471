//! Error types for signing, submission and confirmation

use solana_sdk::signature::Signature;
use std::time::Duration;
use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmissionError {
    /// A required signer has no keypair; raised before anything is sent
    #[error("Missing signer: no keypair for {pubkey}")]
    MissingSigner { pubkey: String },

    #[error("Signing failed: {0}")]
    Signing(String),

    /// No terminal status within the confirmation window
    ///
    /// Retryable: the transaction may still land, or may be rebuilt.
    #[error("Transaction {signature} was not confirmed within {:.2} seconds", waited.as_secs_f64())]
    TimedOut { signature: Signature, waited: Duration },

    /// Landed with a program or runtime error; the caller decides what to do
    #[error("Transaction {signature} failed on-chain: {error}")]
    ProgramFailed { signature: Signature, error: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl SubmissionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TimedOut { .. } => true,
            Self::Ledger(err) => err.is_retryable(),

            Self::MissingSigner { .. } => false,
            Self::Signing(_) => false,
            Self::ProgramFailed { .. } => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingSigner { .. } => "missing_signer",
            Self::Signing(_) => "signing",
            Self::TimedOut { .. } => "timed_out",
            Self::ProgramFailed { .. } => "program_failed",
            Self::Ledger(_) => "ledger",
        }
    }

    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Self::TimedOut { signature, .. } | Self::ProgramFailed { signature, .. } => {
                Some(signature)
            }
            _ => None,
        }
    }
}
