//! Error type of the orchestration layer
//!
//! Each component keeps its own error enum; [`DeployerError`] only wraps
//! them so a flow can use `?` across component boundaries.

use thiserror::Error;

use crate::deployment::{DeploymentError, DeploymentStatus};
use crate::funding::FundingError;
use crate::job::JobError;
use crate::ledger::LedgerError;
use crate::storage::StorageError;
use crate::submission::SubmissionError;
use crate::tx_builder::TransactionBuilderError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeployerError {
    /// Request rejected before anything was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error(transparent)]
    Build(#[from] TransactionBuilderError),

    #[error(transparent)]
    Funding(#[from] FundingError),

    /// Deployment exists but its vault could not be funded; top it up to resume
    #[error("Deployment {id} left in {last_status}, vault {vault} not funded: {source}")]
    FundingIncomplete {
        id: String,
        vault: String,
        last_status: DeploymentStatus,
        source: FundingError,
    },

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl DeployerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Build(err) => err.is_retryable(),
            Self::Funding(err) => err.is_retryable(),
            Self::FundingIncomplete { source, .. } => source.is_retryable(),
            Self::Submission(err) => err.is_retryable(),
            Self::Deployment(err) => err.is_retryable(),
            Self::Storage(err) => err.is_retryable(),
            Self::Job(err) => err.is_retryable(),
            Self::Ledger(err) => err.is_retryable(),

            Self::InvalidRequest(_) => false,
            Self::NotConfigured(_) => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotConfigured(_) => "not_configured",
            Self::Build(err) => err.category(),
            Self::Funding(err) => err.category(),
            Self::FundingIncomplete { source, .. } => source.category(),
            Self::Submission(err) => err.category(),
            Self::Deployment(err) => err.category(),
            Self::Storage(_) => "storage",
            Self::Job(_) => "job",
            Self::Ledger(err) => err.category(),
        }
    }

    /// Last deployment status known when the error was raised
    pub fn last_status(&self) -> Option<DeploymentStatus> {
        match self {
            Self::Deployment(err) => err.last_status(),
            Self::FundingIncomplete { last_status, .. } => Some(*last_status),
            _ => None,
        }
    }
}
