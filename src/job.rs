//! Direct job posting
//!
//! Lists a job on a market without going through the deployment manager:
//! fresh job and run accounts, one "list" instruction, one transaction signed
//! by the wallet and both new accounts.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use thiserror::Error;
use tracing::{info, warn};

use crate::address::NetworkIds;
use crate::funding::{FundingError, FundingPlanner};
use crate::submission::{SubmissionEngine, SubmissionError};
use crate::tx_builder::{build_list_instruction, ListJobParams, TransactionBuilderError, TxBuilder};

pub const QUEUED_STATUS: &str = "QUEUED";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error(transparent)]
    Build(#[from] TransactionBuilderError),

    #[error(transparent)]
    Funding(#[from] FundingError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Build(err) => err.is_retryable(),
            Self::Funding(err) => err.is_retryable(),
            Self::Submission(err) => err.is_retryable(),
        }
    }
}

/// A confirmed job listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job: String,
    pub run: String,
    pub market: String,
    pub signature: String,
    pub content_address: String,
    pub status: String,
    /// RFC 3339
    pub created_at: String,
}

pub struct JobPoster {
    ids: NetworkIds,
    market: Pubkey,
    planner: FundingPlanner,
    tx_builder: TxBuilder,
    engine: Arc<SubmissionEngine>,
    wallet: Arc<Keypair>,
}

impl JobPoster {
    pub fn new(
        ids: NetworkIds,
        market: Pubkey,
        planner: FundingPlanner,
        tx_builder: TxBuilder,
        engine: Arc<SubmissionEngine>,
        wallet: Arc<Keypair>,
    ) -> Self {
        Self {
            ids,
            market,
            planner,
            tx_builder,
            engine,
            wallet,
        }
    }

    pub fn market(&self) -> &Pubkey {
        &self.market
    }

    pub async fn post(&self, content_address: &str, timeout_secs: u64) -> Result<JobResult, JobError> {
        let job = Keypair::new();
        let run = Keypair::new();
        let wallet = self.wallet.pubkey();

        let instruction = build_list_instruction(
            &ListJobParams {
                job: job.pubkey(),
                run: run.pubkey(),
                market: self.market,
                wallet,
                content_address,
                timeout_secs,
            },
            &self.ids,
        )?;

        let plan = self.planner.plan(&wallet, &self.market).await?;
        if plan.token_deferred {
            warn!(market = %self.market, price = plan.market_price, "Wallet cannot afford listing on a priced market");
        }
        plan.ensure_fundable(self.planner.policy())?;

        let built = self.tx_builder.assemble(&[instruction], &wallet).await?;
        let outcome = self
            .engine
            .sign_and_submit(&built, &[self.wallet.as_ref(), &job, &run])
            .await?;
        let signature = outcome.into_result()?;

        info!(
            job = %job.pubkey(),
            run = %run.pubkey(),
            market = %self.market,
            signature = %signature,
            "Job listed"
        );

        Ok(JobResult {
            job: job.pubkey().to_string(),
            run: run.pubkey().to_string(),
            market: self.market.to_string(),
            signature: signature.to_string(),
            content_address: content_address.to_string(),
            status: QUEUED_STATUS.to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }
}
