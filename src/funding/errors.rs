//! Error types for vault funding

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::submission::SubmissionError;
use crate::tx_builder::TransactionBuilderError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FundingError {
    /// Wallet cannot cover the planned transfer
    ///
    /// Fatal to the current attempt; the operator has to top up the wallet.
    #[error("Insufficient {asset}: need {needed}, have {available} ({reason})")]
    InsufficientFunds {
        asset: &'static str,
        needed: u64,
        available: u64,
        reason: String,
    },

    /// The wallet's own token account does not exist
    #[error("Source token account {account} does not exist")]
    SourceAccountMissing { account: String },

    /// Market or token account bytes are missing or too short
    #[error("Market data error: {0}")]
    MarketData(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Build(#[from] TransactionBuilderError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

impl FundingError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(err) => err.is_retryable(),
            Self::Build(err) => err.is_retryable(),
            Self::Submission(err) => err.is_retryable(),

            Self::InsufficientFunds { .. } => false,
            Self::SourceAccountMissing { .. } => false,
            Self::MarketData(_) => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::SourceAccountMissing { .. } => "source_account_missing",
            Self::MarketData(_) => "market_data",
            Self::Ledger(_) => "ledger",
            Self::Build(err) => err.category(),
            Self::Submission(err) => err.category(),
        }
    }
}

impl FundingError {
    pub fn insufficient_native(needed: u64, available: u64, reason: impl Into<String>) -> Self {
        Self::InsufficientFunds {
            asset: "native",
            needed,
            available,
            reason: reason.into(),
        }
    }

    pub fn insufficient_token(needed: u64, available: u64, reason: impl Into<String>) -> Self {
        Self::InsufficientFunds {
            asset: "token",
            needed,
            available,
            reason: reason.into(),
        }
    }
}
