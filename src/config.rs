//! Configuration module for the deployer
//!
//! Loaded from TOML, then overridden from the environment (`.env` is read
//! first). Every field has a default so a missing file or section still
//! yields a runnable configuration; only the secrets have no default.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::address::{parse_address, NetworkIds, NOSANA_JOBS_PROGRAM, NOS_DECIMALS, NOS_TOKEN_MINT};
use crate::deployment::client::{DEFAULT_API_URL, DEFAULT_READ_ATTEMPTS};
use crate::deployment::diagnostics::DEFAULT_TIMEOUT_PHRASE;
use crate::deployment::{ClientSettings, DiagnosticMatcher, RestartPolicy, TrackerPolicy};
use crate::funding::FundingPolicy;
use crate::ledger::SendOptions;
use crate::storage::DEFAULT_PINATA_URL;
use crate::submission::SubmissionPolicy;
use crate::wallet::WalletSource;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub wallet: WalletConfig,

    #[serde(default)]
    pub deployment_manager: DeploymentManagerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub submission: SubmissionConfig,

    #[serde(default)]
    pub funding: FundingConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Market jobs are posted to; may also be given per command
    #[serde(default)]
    pub market: Option<String>,

    #[serde(default = "default_jobs_program")]
    pub jobs_program: String,

    #[serde(default = "default_token_mint")]
    pub token_mint: String,

    #[serde(default = "default_token_decimals")]
    pub token_decimals: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Base58 private key; prefer `NOSANA_PRIVATE_KEY`
    #[serde(default, skip_serializing)]
    pub private_key: Option<String>,

    /// Path to keypair file
    #[serde(default)]
    pub keypair_path: Option<PathBuf>,

    /// Generate / reuse a local wallet when no key is configured
    #[serde(default = "default_true")]
    pub use_local_wallet: bool,

    #[serde(default)]
    pub local_wallet_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentManagerConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// Total tries for idempotent reads
    #[serde(default = "default_read_attempts")]
    pub read_attempts: usize,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_pinata_url")]
    pub pinata_url: String,

    /// Bearer token; prefer `PINATA_JWT`
    #[serde(default, skip_serializing)]
    pub pinata_jwt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    #[serde(default = "default_confirmation_poll")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    #[serde(default)]
    pub skip_preflight: bool,

    /// Node-side rebroadcast budget
    #[serde(default)]
    pub max_retries: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingConfig {
    #[serde(default = "default_native_target")]
    pub native_target_lamports: u64,

    #[serde(default = "default_fee_reserve")]
    pub fee_reserve_lamports: u64,

    #[serde(default = "default_min_native_for_token")]
    pub min_native_for_token_lamports: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_start_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_start_grace")]
    pub start_grace_secs: u64,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    #[serde(default = "default_nested_restarts")]
    pub nested_restarts: u32,

    #[serde(default = "default_nested_backoff")]
    pub nested_backoff_secs: u64,

    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Event-log phrase that marks a recoverable confirmation timeout
    #[serde(default = "default_timeout_phrase")]
    pub timeout_phrase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_poll")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_restart_cooldown")]
    pub restart_cooldown_secs: u64,

    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_secs: u64,
}

// Default value functions
fn default_rpc_url() -> String { "https://api.mainnet-beta.solana.com".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_jobs_program() -> String { NOSANA_JOBS_PROGRAM.to_string() }
fn default_token_mint() -> String { NOS_TOKEN_MINT.to_string() }
fn default_token_decimals() -> u8 { NOS_DECIMALS }
fn default_true() -> bool { true }
fn default_api_url() -> String { DEFAULT_API_URL.to_string() }
fn default_http_timeout() -> u64 { 30 }
fn default_read_attempts() -> usize { DEFAULT_READ_ATTEMPTS }
fn default_retry_base_delay_ms() -> u64 { 500 }
fn default_pinata_url() -> String { DEFAULT_PINATA_URL.to_string() }
fn default_confirmation_poll() -> u64 { 2 }
fn default_confirmation_timeout() -> u64 { 60 }
fn default_native_target() -> u64 { 3_000_000 }
fn default_fee_reserve() -> u64 { 100_000 }
fn default_min_native_for_token() -> u64 { 3_000_000 }
fn default_start_attempts() -> u32 { 10 }
fn default_start_grace() -> u64 { 5 }
fn default_retry_backoff() -> u64 { 10 }
fn default_nested_restarts() -> u32 { 3 }
fn default_nested_backoff() -> u64 { 10 }
fn default_cooldown() -> u64 { 30 }
fn default_timeout_phrase() -> String { DEFAULT_TIMEOUT_PHRASE.to_string() }
fn default_tracker_poll() -> u64 { 5 }
fn default_max_restarts() -> u32 { 3 }
fn default_restart_cooldown() -> u64 { 45 }
fn default_completion_timeout() -> u64 { 300 }

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            rpc_timeout_secs: default_rpc_timeout(),
            market: None,
            jobs_program: default_jobs_program(),
            token_mint: default_token_mint(),
            token_decimals: default_token_decimals(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key: None,
            keypair_path: None,
            use_local_wallet: default_true(),
            local_wallet_path: None,
        }
    }
}

impl Default for DeploymentManagerConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_http_timeout(),
            read_attempts: default_read_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            pinata_url: default_pinata_url(),
            pinata_jwt: None,
        }
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_confirmation_poll(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            skip_preflight: false,
            max_retries: None,
        }
    }
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            native_target_lamports: default_native_target(),
            fee_reserve_lamports: default_fee_reserve(),
            min_native_for_token_lamports: default_min_native_for_token(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_start_attempts(),
            start_grace_secs: default_start_grace(),
            retry_backoff_secs: default_retry_backoff(),
            nested_restarts: default_nested_restarts(),
            nested_backoff_secs: default_nested_backoff(),
            cooldown_secs: default_cooldown(),
            timeout_phrase: default_timeout_phrase(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_tracker_poll(),
            max_restarts: default_max_restarts(),
            restart_cooldown_secs: default_restart_cooldown(),
            completion_timeout_secs: default_completion_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `NOSANA_*` / `PINATA_JWT` overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("NOSANA_RPC_URL") {
            self.network.rpc_url = url;
        }
        if let Some(market) = get("NOSANA_MARKET") {
            self.network.market = Some(market);
        }
        if let Some(key) = get("NOSANA_PRIVATE_KEY") {
            self.wallet.private_key = Some(key);
        }
        if let Some(path) = get("NOSANA_KEYPAIR_PATH") {
            self.wallet.keypair_path = Some(PathBuf::from(path));
        }
        if let Some(url) = get("NOSANA_API_URL") {
            self.deployment_manager.api_url = url;
        }
        if let Some(jwt) = get("PINATA_JWT") {
            self.storage.pinata_jwt = Some(jwt);
        }
    }

    /// Reject configurations that would misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_url.trim().is_empty() {
            bail!("network.rpc_url must not be empty");
        }
        self.network_ids()?;
        self.market()?;

        if self.deployment_manager.read_attempts == 0 {
            bail!("deployment_manager.read_attempts must be at least 1");
        }
        if self.submission.poll_interval_secs == 0 || self.submission.confirmation_timeout_secs == 0 {
            bail!("submission intervals must be greater than zero");
        }
        if self.submission.poll_interval_secs > self.submission.confirmation_timeout_secs {
            bail!("submission.poll_interval_secs exceeds confirmation_timeout_secs");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.timeout_phrase.trim().is_empty() {
            bail!("retry.timeout_phrase must not be empty");
        }
        if self.tracker.poll_interval_secs == 0 || self.tracker.completion_timeout_secs == 0 {
            bail!("tracker intervals must be greater than zero");
        }
        Ok(())
    }

    pub fn network_ids(&self) -> Result<NetworkIds> {
        Ok(NetworkIds {
            jobs_program: parse_address("network.jobs_program", &self.network.jobs_program)?,
            token_mint: parse_address("network.token_mint", &self.network.token_mint)?,
            token_decimals: self.network.token_decimals,
        })
    }

    pub fn market(&self) -> Result<Option<Pubkey>> {
        self.network
            .market
            .as_deref()
            .map(|m| parse_address("network.market", m))
            .transpose()
            .map_err(Into::into)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.network.rpc_timeout_secs)
    }

    pub fn wallet_source(&self) -> WalletSource {
        WalletSource {
            private_key: self.wallet.private_key.clone(),
            keypair_path: self.wallet.keypair_path.clone(),
            use_local_wallet: self.wallet.use_local_wallet,
            local_wallet_path: self.wallet.local_wallet_path.clone(),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.deployment_manager.api_url.clone(),
            timeout: Duration::from_secs(self.deployment_manager.timeout_secs),
            read_attempts: self.deployment_manager.read_attempts,
            retry_base_delay: Duration::from_millis(self.deployment_manager.retry_base_delay_ms),
        }
    }

    pub fn submission_policy(&self) -> SubmissionPolicy {
        SubmissionPolicy {
            poll_interval: Duration::from_secs(self.submission.poll_interval_secs),
            confirmation_timeout: Duration::from_secs(self.submission.confirmation_timeout_secs),
            send: SendOptions {
                skip_preflight: self.submission.skip_preflight,
                max_retries: self.submission.max_retries,
                ..SendOptions::default()
            },
        }
    }

    pub fn funding_policy(&self) -> FundingPolicy {
        FundingPolicy {
            native_target_lamports: self.funding.native_target_lamports,
            fee_reserve_lamports: self.funding.fee_reserve_lamports,
            min_native_for_token_lamports: self.funding.min_native_for_token_lamports,
        }
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            max_attempts: self.retry.max_attempts,
            start_grace: Duration::from_secs(self.retry.start_grace_secs),
            retry_backoff: Duration::from_secs(self.retry.retry_backoff_secs),
            nested_restarts: self.retry.nested_restarts,
            nested_backoff: Duration::from_secs(self.retry.nested_backoff_secs),
            cooldown: Duration::from_secs(self.retry.cooldown_secs),
        }
    }

    pub fn tracker_policy(&self) -> TrackerPolicy {
        TrackerPolicy {
            poll_interval: Duration::from_secs(self.tracker.poll_interval_secs),
            max_restarts: self.tracker.max_restarts,
            restart_cooldown: Duration::from_secs(self.tracker.restart_cooldown_secs),
            completion_timeout: Duration::from_secs(self.tracker.completion_timeout_secs),
        }
    }

    pub fn diagnostic_matcher(&self) -> DiagnosticMatcher {
        DiagnosticMatcher::new(self.retry.timeout_phrase.clone())
    }
}
