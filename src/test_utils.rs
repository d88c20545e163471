//! Test Utilities Module
//!
//! Scripted stand-ins for the three external collaborators: the ledger RPC,
//! the deployment manager and content storage. Nothing here touches the
//! network; every call is recorded so tests can assert on it.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use async_trait::async_trait;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};
use solana_transaction_status::TransactionConfirmationStatus;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::address::NOS_TOKEN_MINT;
use crate::deployment::{
    Deployment, DeploymentApi, DeploymentCreateBody, DeploymentError, DeploymentResult,
    DeploymentStatus, DeploymentStatusResponse, DeploymentStrategy,
};
use crate::funding::market::{MARKET_PRICE_OFFSET, TOKEN_AMOUNT_OFFSET};
use crate::ledger::{LedgerError, LedgerResult, LedgerRpc, SendOptions, SignatureStatus};
use crate::storage::{ContentStore, StorageError};

/// Market account used by the fixtures
pub const SAMPLE_MARKET: &str = "7AtiXMSH6R1jjBxrcYjehCkkSF7zvYWte63gwEDBcGHq";

/// Content address returned by [`MockContentStore`]
pub const SAMPLE_CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

const MARKET_ACCOUNT_LEN: usize = 200;
const TOKEN_ACCOUNT_LEN: usize = 165;
const CONFIRMED_SLOT: u64 = 100;

/// Vault address every fixture deployment points at
pub fn sample_vault() -> Pubkey {
    Pubkey::new_from_array([7u8; 32])
}

pub fn sample_deployment(id: &str, status: DeploymentStatus) -> Deployment {
    Deployment {
        id: id.to_string(),
        name: Some("test-deployment".to_string()),
        status,
        market: SAMPLE_MARKET.to_string(),
        owner: None,
        vault: sample_vault().to_string(),
        replicas: 1,
        timeout: 3600,
        strategy: DeploymentStrategy::Simple,
        schedule: None,
        events: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

struct LedgerState {
    blockhash: Hash,
    blockhash_calls: usize,
    fail_blockhash: bool,
    balances: HashMap<Pubkey, u64>,
    accounts: HashMap<Pubkey, Vec<u8>>,
    sent: Vec<Transaction>,
    reject_as_processed: bool,
    confirm_after: u32,
    never_confirm: bool,
    fail_with: Option<String>,
    polls: HashMap<Signature, u32>,
    landed: HashSet<Signature>,
    confirmed: HashSet<Signature>,
}

/// Scripted [`LedgerRpc`]
///
/// Sent transactions confirm after `confirm_after_polls` status reads
/// (one by default). Unknown balances read as zero and unknown accounts as
/// missing.
pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                blockhash: Hash::new_unique(),
                blockhash_calls: 0,
                fail_blockhash: false,
                balances: HashMap::new(),
                accounts: HashMap::new(),
                sent: Vec::new(),
                reject_as_processed: false,
                confirm_after: 1,
                never_confirm: false,
                fail_with: None,
                polls: HashMap::new(),
                landed: HashSet::new(),
                confirmed: HashSet::new(),
            }),
        }
    }

    pub fn blockhash(&self) -> Hash {
        self.state.lock().unwrap().blockhash
    }

    pub fn blockhash_calls(&self) -> usize {
        self.state.lock().unwrap().blockhash_calls
    }

    pub fn fail_blockhash(&self, fail: bool) {
        self.state.lock().unwrap().fail_blockhash = fail;
    }

    pub fn set_balance(&self, address: Pubkey, lamports: u64) {
        self.state.lock().unwrap().balances.insert(address, lamports);
    }

    pub fn set_account(&self, address: Pubkey, data: Vec<u8>) {
        self.state.lock().unwrap().accounts.insert(address, data);
    }

    /// Market account with `price` at the price offset
    pub fn set_market_price(&self, market: Pubkey, price: u64) {
        let mut data = vec![0u8; MARKET_ACCOUNT_LEN];
        data[MARKET_PRICE_OFFSET..MARKET_PRICE_OFFSET + 8].copy_from_slice(&price.to_le_bytes());
        self.set_account(market, data);
    }

    /// SPL token account holding `amount` of the utility token
    pub fn set_token_balance(&self, account: Pubkey, amount: u64) {
        let mut data = vec![0u8; TOKEN_ACCOUNT_LEN];
        data[..32].copy_from_slice(NOS_TOKEN_MINT.as_ref());
        data[TOKEN_AMOUNT_OFFSET..TOKEN_AMOUNT_OFFSET + 8].copy_from_slice(&amount.to_le_bytes());
        self.set_account(account, data);
    }

    pub fn confirm_after_polls(&self, polls: u32) {
        self.state.lock().unwrap().confirm_after = polls.max(1);
    }

    /// Sent transactions stay at `processed` forever
    pub fn never_confirm(&self) {
        self.state.lock().unwrap().never_confirm = true;
    }

    /// Sent transactions land with `error`
    pub fn fail_signatures_with(&self, error: &str) {
        self.state.lock().unwrap().fail_with = Some(error.to_string());
    }

    /// Treat `signature` as already confirmed without a send
    pub fn mark_confirmed(&self, signature: Signature) {
        self.state.lock().unwrap().confirmed.insert(signature);
    }

    /// Sends land but report "already processed"
    pub fn reject_sends_as_processed(&self) {
        self.state.lock().unwrap().reject_as_processed = true;
    }

    pub fn send_count(&self) -> usize {
        self.state.lock().unwrap().sent.len()
    }

    pub fn sent_transactions(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().sent.clone()
    }

    fn status(confirmation: TransactionConfirmationStatus, err: Option<String>) -> SignatureStatus {
        SignatureStatus {
            slot: CONFIRMED_SLOT,
            err,
            confirmation_status: Some(confirmation),
        }
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    fn endpoint(&self) -> &str {
        "mock://ledger"
    }

    async fn get_latest_blockhash(&self, _commitment: CommitmentConfig) -> LedgerResult<Hash> {
        let mut state = self.state.lock().unwrap();
        state.blockhash_calls += 1;
        if state.fail_blockhash {
            return Err(LedgerError::Transport {
                endpoint: "mock://ledger".to_string(),
                message: "blockhash unavailable".to_string(),
            });
        }
        Ok(state.blockhash)
    }

    async fn get_account_data(&self, address: &Pubkey) -> LedgerResult<Option<Vec<u8>>> {
        Ok(self.state.lock().unwrap().accounts.get(address).cloned())
    }

    async fn get_balance(&self, address: &Pubkey) -> LedgerResult<u64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(address)
            .copied()
            .unwrap_or(0))
    }

    async fn send_transaction(&self, tx: &Transaction, _opts: SendOptions) -> LedgerResult<Signature> {
        let mut state = self.state.lock().unwrap();
        let signature = tx.signatures[0];
        state.landed.insert(signature);
        state.sent.push(tx.clone());
        if state.reject_as_processed {
            return Err(LedgerError::AlreadyProcessed {
                endpoint: "mock://ledger".to_string(),
            });
        }
        Ok(signature)
    }

    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> LedgerResult<Vec<Option<SignatureStatus>>> {
        let mut state = self.state.lock().unwrap();
        let mut statuses = Vec::with_capacity(signatures.len());
        for signature in signatures {
            let status = if state.confirmed.contains(signature) {
                Some(Self::status(TransactionConfirmationStatus::Confirmed, None))
            } else if !state.landed.contains(signature) {
                None
            } else if let Some(error) = state.fail_with.clone() {
                Some(Self::status(TransactionConfirmationStatus::Confirmed, Some(error)))
            } else if state.never_confirm {
                Some(Self::status(TransactionConfirmationStatus::Processed, None))
            } else {
                let confirm_after = state.confirm_after;
                let polls = state.polls.entry(*signature).or_insert(0);
                *polls += 1;
                if *polls >= confirm_after {
                    state.confirmed.insert(*signature);
                    Some(Self::status(TransactionConfirmationStatus::Confirmed, None))
                } else {
                    Some(Self::status(TransactionConfirmationStatus::Processed, None))
                }
            };
            statuses.push(status);
        }
        Ok(statuses)
    }
}

// ---------------------------------------------------------------------------
// Deployment manager
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ApiState {
    gets: VecDeque<Deployment>,
    repeat: Option<Deployment>,
    last: Option<Deployment>,
    fail_gets: u32,
    fail_get_status: Option<u16>,
    fail_starts: u32,
    fail_restarts: bool,
    fail_vault_updates: bool,
    created: Vec<DeploymentCreateBody>,
    vault_updates: Vec<String>,
    replica_updates: Vec<(String, u32)>,
    timeout_updates: Vec<(String, u64)>,
    get_calls: u32,
    start_calls: u32,
    restart_calls: u32,
    stop_calls: u32,
    archive_calls: u32,
}

/// Scripted [`DeploymentApi`]
///
/// `get` pops queued deployments in order, then falls back to the repeated
/// deployment, then to the last one returned.
#[derive(Default)]
pub struct MockDeploymentApi {
    state: Mutex<ApiState>,
}

impl MockDeploymentApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_get(&self, deployment: Deployment) {
        self.state.lock().unwrap().gets.push_back(deployment);
    }

    /// Returned once the queue is drained
    pub fn repeat_get(&self, deployment: Deployment) {
        self.state.lock().unwrap().repeat = Some(deployment);
    }

    /// Next `count` reads fail with a transport error
    pub fn fail_gets(&self, count: u32) {
        self.state.lock().unwrap().fail_gets = count;
    }

    /// Next `count` reads fail with HTTP `status`
    pub fn fail_gets_with(&self, count: u32, status: u16) {
        let mut state = self.state.lock().unwrap();
        state.fail_gets = count;
        state.fail_get_status = Some(status);
    }

    /// Next `count` start calls fail with a 500
    pub fn fail_starts(&self, count: u32) {
        self.state.lock().unwrap().fail_starts = count;
    }

    pub fn fail_restarts(&self, fail: bool) {
        self.state.lock().unwrap().fail_restarts = fail;
    }

    pub fn fail_vault_updates(&self, fail: bool) {
        self.state.lock().unwrap().fail_vault_updates = fail;
    }

    pub fn get_calls(&self) -> u32 {
        self.state.lock().unwrap().get_calls
    }

    pub fn start_calls(&self) -> u32 {
        self.state.lock().unwrap().start_calls
    }

    pub fn restart_calls(&self) -> u32 {
        self.state.lock().unwrap().restart_calls
    }

    pub fn stop_calls(&self) -> u32 {
        self.state.lock().unwrap().stop_calls
    }

    pub fn archive_calls(&self) -> u32 {
        self.state.lock().unwrap().archive_calls
    }

    pub fn created(&self) -> Vec<DeploymentCreateBody> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn vault_updates(&self) -> Vec<String> {
        self.state.lock().unwrap().vault_updates.clone()
    }

    pub fn replica_updates(&self) -> Vec<(String, u32)> {
        self.state.lock().unwrap().replica_updates.clone()
    }

    pub fn timeout_updates(&self) -> Vec<(String, u64)> {
        self.state.lock().unwrap().timeout_updates.clone()
    }

    fn api_error(path: String, status: u16, body: &str) -> DeploymentError {
        DeploymentError::Api {
            path,
            status,
            body: body.to_string(),
        }
    }
}

#[async_trait]
impl DeploymentApi for MockDeploymentApi {
    async fn create(&self, body: &DeploymentCreateBody) -> DeploymentResult<Deployment> {
        let mut state = self.state.lock().unwrap();
        state.created.push(body.clone());
        let mut deployment = sample_deployment(&format!("dep-{}", state.created.len()), DeploymentStatus::Draft);
        deployment.name = Some(body.name.clone());
        deployment.market = body.market.clone();
        deployment.replicas = body.replicas;
        deployment.timeout = body.timeout;
        deployment.strategy = body.strategy;
        deployment.schedule = body.schedule.clone();
        Ok(deployment)
    }

    async fn get(&self, id: &str) -> DeploymentResult<Deployment> {
        let mut state = self.state.lock().unwrap();
        state.get_calls += 1;
        if state.fail_gets > 0 {
            state.fail_gets -= 1;
            let path = format!("/deployment/{}", id);
            return Err(match state.fail_get_status {
                Some(status) => Self::api_error(path, status, "rejected"),
                None => DeploymentError::transport(path, "connection reset"),
            });
        }
        let next = state
            .gets
            .pop_front()
            .or_else(|| state.repeat.clone())
            .or_else(|| state.last.clone());
        match next {
            Some(deployment) => {
                state.last = Some(deployment.clone());
                Ok(deployment)
            }
            None => Err(Self::api_error(format!("/deployment/{}", id), 404, "not found")),
        }
    }

    async fn start(&self, id: &str) -> DeploymentResult<DeploymentStatusResponse> {
        let mut state = self.state.lock().unwrap();
        state.start_calls += 1;
        if state.fail_starts > 0 {
            state.fail_starts -= 1;
            return Err(Self::api_error(format!("/deployment/{}/start", id), 500, "internal error"));
        }
        Ok(DeploymentStatusResponse {
            status: DeploymentStatus::Starting,
        })
    }

    async fn restart(&self, id: &str) -> DeploymentResult<()> {
        let mut state = self.state.lock().unwrap();
        state.restart_calls += 1;
        if state.fail_restarts {
            return Err(Self::api_error(
                format!("/deployment/{}/restart", id),
                409,
                "deployment cannot be restarted",
            ));
        }
        Ok(())
    }

    async fn stop(&self, _id: &str) -> DeploymentResult<DeploymentStatusResponse> {
        self.state.lock().unwrap().stop_calls += 1;
        Ok(DeploymentStatusResponse {
            status: DeploymentStatus::Stopping,
        })
    }

    async fn archive(&self, _id: &str) -> DeploymentResult<()> {
        self.state.lock().unwrap().archive_calls += 1;
        Ok(())
    }

    async fn update_replicas(&self, id: &str, replicas: u32) -> DeploymentResult<()> {
        self.state
            .lock()
            .unwrap()
            .replica_updates
            .push((id.to_string(), replicas));
        Ok(())
    }

    async fn update_timeout(&self, id: &str, timeout_secs: u64) -> DeploymentResult<()> {
        self.state
            .lock()
            .unwrap()
            .timeout_updates
            .push((id.to_string(), timeout_secs));
        Ok(())
    }

    async fn update_vault_balance(&self, vault: &str) -> DeploymentResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_vault_updates {
            return Err(Self::api_error(format!("/vault/{}/update-balance", vault), 502, "bad gateway"));
        }
        state.vault_updates.push(vault.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// [`ContentStore`] that answers with [`SAMPLE_CID`]
#[derive(Default)]
pub struct MockContentStore {
    uploads: Mutex<Vec<Vec<u8>>>,
    fail: Mutex<bool>,
}

impl MockContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_uploads(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentStore for MockContentStore {
    async fn upload(&self, _name: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        if *self.fail.lock().unwrap() {
            return Err(StorageError::Api {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.uploads.lock().unwrap().push(bytes);
        Ok(SAMPLE_CID.to_string())
    }
}

/// Shared handles for wiring mocks into a context
pub fn mock_collaborators() -> (Arc<MockLedger>, Arc<MockDeploymentApi>, Arc<MockContentStore>) {
    (
        Arc::new(MockLedger::new()),
        Arc::new(MockDeploymentApi::new()),
        Arc::new(MockContentStore::new()),
    )
}
