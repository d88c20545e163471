//! Ledger RPC seam
//!
//! The engine talks to the chain exclusively through [`LedgerRpc`], so the
//! funding, submission and job-posting paths can run against a scripted
//! ledger in tests and against a Solana JSON-RPC node in production.
//!
//! Only the five calls the engine needs are exposed; everything else about
//! the RPC client (connection pooling, encodings) stays inside
//! [`SolanaLedger`].

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcSendTransactionConfig;
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};
use solana_transaction_status::TransactionConfirmationStatus;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by the ledger RPC layer
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    /// Network / node level failure
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// The node already holds a transaction with this signature
    #[error("Transaction already processed (endpoint: {endpoint})")]
    AlreadyProcessed { endpoint: String },

    /// Node answered, but the payload could not be interpreted
    #[error("Decode error: {0}")]
    Decode(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::AlreadyProcessed { .. } => "already_processed",
            Self::Decode(_) => "decode",
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Options forwarded to `sendTransaction`
#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    pub skip_preflight: bool,
    pub preflight_commitment: CommitmentLevel,
    /// Node-side rebroadcast budget (`None` = node default)
    pub max_retries: Option<usize>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            skip_preflight: false,
            preflight_commitment: CommitmentLevel::Confirmed,
            max_retries: None,
        }
    }
}

/// Point-in-time status of a submitted signature
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureStatus {
    pub slot: u64,
    /// Program / runtime error, rendered as text
    pub err: Option<String>,
    pub confirmation_status: Option<TransactionConfirmationStatus>,
}

impl SignatureStatus {
    /// `confirmed` or `finalized` without an error
    pub fn is_confirmed(&self) -> bool {
        self.err.is_none()
            && matches!(
                self.confirmation_status,
                Some(TransactionConfirmationStatus::Confirmed)
                    | Some(TransactionConfirmationStatus::Finalized)
            )
    }

    pub fn is_failed(&self) -> bool {
        self.err.is_some()
    }
}

/// Minimal ledger surface consumed by the engine
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Human readable endpoint, used in logs and errors
    fn endpoint(&self) -> &str;

    async fn get_latest_blockhash(&self, commitment: CommitmentConfig) -> LedgerResult<Hash>;

    /// Raw account bytes, `None` when the account does not exist
    async fn get_account_data(&self, address: &Pubkey) -> LedgerResult<Option<Vec<u8>>>;

    /// Native balance in lamports
    async fn get_balance(&self, address: &Pubkey) -> LedgerResult<u64>;

    async fn send_transaction(
        &self,
        tx: &Transaction,
        opts: SendOptions,
    ) -> LedgerResult<Signature>;

    /// One entry per requested signature, `None` when the node has never seen it
    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> LedgerResult<Vec<Option<SignatureStatus>>>;

    /// Connectivity probe: fetch a confirmed blockhash
    async fn health(&self) -> LedgerResult<()> {
        self.get_latest_blockhash(CommitmentConfig::confirmed())
            .await
            .map(|_| ())
    }
}

/// [`LedgerRpc`] backed by the Solana nonblocking JSON-RPC client
pub struct SolanaLedger {
    rpc: Arc<RpcClient>,
    endpoint: String,
}

impl SolanaLedger {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let rpc = RpcClient::new_with_timeout_and_commitment(
            url.to_string(),
            timeout,
            CommitmentConfig::confirmed(),
        );
        Self {
            rpc: Arc::new(rpc),
            endpoint: url.to_string(),
        }
    }

    fn transport(&self, err: impl std::fmt::Display) -> LedgerError {
        let message = err.to_string();
        if message.contains("AlreadyProcessed") || message.contains("already been processed") {
            return LedgerError::AlreadyProcessed {
                endpoint: self.endpoint.clone(),
            };
        }
        LedgerError::Transport {
            endpoint: self.endpoint.clone(),
            message,
        }
    }
}

impl std::fmt::Debug for SolanaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaLedger")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl LedgerRpc for SolanaLedger {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_latest_blockhash(&self, commitment: CommitmentConfig) -> LedgerResult<Hash> {
        let (hash, last_valid_height) = self
            .rpc
            .get_latest_blockhash_with_commitment(commitment)
            .await
            .map_err(|e| self.transport(e))?;
        debug!(blockhash = %hash, last_valid_height, "Fetched latest blockhash");
        Ok(hash)
    }

    async fn get_account_data(&self, address: &Pubkey) -> LedgerResult<Option<Vec<u8>>> {
        let response = self
            .rpc
            .get_account_with_commitment(address, CommitmentConfig::confirmed())
            .await
            .map_err(|e| self.transport(e))?;
        Ok(response.value.map(|account| account.data))
    }

    async fn get_balance(&self, address: &Pubkey) -> LedgerResult<u64> {
        let response = self
            .rpc
            .get_balance_with_commitment(address, CommitmentConfig::confirmed())
            .await
            .map_err(|e| self.transport(e))?;
        Ok(response.value)
    }

    async fn send_transaction(
        &self,
        tx: &Transaction,
        opts: SendOptions,
    ) -> LedgerResult<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: opts.skip_preflight,
            preflight_commitment: Some(opts.preflight_commitment),
            max_retries: opts.max_retries,
            ..RpcSendTransactionConfig::default()
        };
        self.rpc
            .send_transaction_with_config(tx, config)
            .await
            .map_err(|e| self.transport(e))
    }

    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> LedgerResult<Vec<Option<SignatureStatus>>> {
        let response = self
            .rpc
            .get_signature_statuses(signatures)
            .await
            .map_err(|e| self.transport(e))?;
        Ok(response
            .value
            .into_iter()
            .map(|status| {
                status.map(|s| SignatureStatus {
                    slot: s.slot,
                    err: s.err.map(|e| e.to_string()),
                    confirmation_status: s.confirmation_status,
                })
            })
            .collect())
    }
}
