//! Wallet management module
//!
//! Loads the signing keypair once at startup and hands out shared references
//! for the rest of the process. Supported sources, in priority order:
//! 1. an explicit base58 private key
//! 2. a keypair file (Solana CLI byte array, `{publicKey, privateKey}` object
//!    or raw 64 bytes)
//! 3. a local wallet file, generated on first use
//!
//! Also produces the authentication headers the deployment manager expects.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::address::{decode_secret_key, validate_secret_bytes, KEYPAIR_LENGTH};

/// Message signed for every deployment-manager request
pub const AUTH_MESSAGE: &str = "DeploymentsAuthorization";

const LOCAL_WALLET_DIR: &str = "nosana-deployer";
const LOCAL_WALLET_FILE: &str = "wallet.json";

/// On-disk format of generated local wallets
#[derive(Serialize, Deserialize)]
struct KeypairObject {
    #[serde(rename = "publicKey")]
    public_key: Vec<u8>,
    #[serde(rename = "privateKey")]
    private_key: Vec<u8>,
}

/// Where to load the wallet from
#[derive(Debug, Clone, Default)]
pub struct WalletSource {
    pub private_key: Option<String>,
    pub keypair_path: Option<PathBuf>,
    pub use_local_wallet: bool,
    /// Overrides the default local wallet location
    pub local_wallet_path: Option<PathBuf>,
}

/// Header pair attached to deployment-manager requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaders {
    /// `x-user-id`
    pub user_id: String,
    /// `Authorization`
    pub authorization: String,
}

/// Wallet manager for handling the keypair and signing
#[derive(Clone)]
pub struct WalletManager {
    keypair: Arc<Keypair>,
}

impl WalletManager {
    /// Resolve a wallet from the configured sources
    pub fn resolve(source: &WalletSource) -> Result<Self> {
        if let Some(key) = source.private_key.as_deref().filter(|k| !k.trim().is_empty()) {
            info!("Using explicit private key");
            return Self::from_base58(key);
        }

        if let Some(path) = &source.keypair_path {
            info!(path = %path.display(), "Loading keypair file");
            return Self::from_file(path);
        }

        if !source.use_local_wallet {
            bail!("no wallet configured: set a private key, a keypair path, or enable the local wallet");
        }

        let path = source
            .local_wallet_path
            .clone()
            .unwrap_or_else(default_local_wallet_path);
        Self::load_or_create_local(&path)
    }

    pub fn from_base58(encoded: &str) -> Result<Self> {
        let bytes = decode_secret_key(encoded).context("Invalid private key")?;
        Self::from_secret_bytes(&bytes)
    }

    /// Load a keypair file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = Zeroizing::new(
            std::fs::read(path)
                .with_context(|| format!("Failed to read keypair file: {}", path.display()))?,
        );

        if raw.len() == KEYPAIR_LENGTH {
            return Self::from_secret_bytes(&raw);
        }

        let trimmed = raw.iter().skip_while(|b| b.is_ascii_whitespace()).copied().next();
        let bytes: Zeroizing<Vec<u8>> = match trimmed {
            Some(b'[') => Zeroizing::new(
                serde_json::from_slice::<Vec<u8>>(&raw).context("Failed to parse keypair JSON array")?,
            ),
            Some(b'{') => {
                let object: KeypairObject = serde_json::from_slice(&raw)
                    .context("Failed to parse keypair JSON object")?;
                Zeroizing::new(object.private_key)
            }
            _ => bail!("Unrecognised keypair file format: {}", path.display()),
        };

        Self::from_secret_bytes(&bytes)
            .with_context(|| format!("Invalid keypair in {}", path.display()))
    }

    /// Load the local wallet, generating it first if the file is absent
    pub fn load_or_create_local(path: &Path) -> Result<Self> {
        if path.exists() {
            info!(path = %path.display(), "Loaded existing local wallet");
            return Self::from_file(path);
        }

        let wallet = Self::from_keypair(Keypair::new());
        wallet.write_local(path)?;
        warn!(
            path = %path.display(),
            pubkey = %wallet.pubkey(),
            "Generated new local wallet; fund it with native currency and tokens before deploying"
        );
        Ok(wallet)
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        validate_secret_bytes(bytes)?;
        let keypair = Keypair::try_from(bytes).context("Invalid keypair bytes")?;
        Ok(Self::from_keypair(keypair))
    }

    fn write_local(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create wallet directory: {}", parent.display()))?;
            restrict_permissions(parent, 0o700)?;
        }

        let secret = Zeroizing::new(self.keypair.to_bytes().to_vec());
        let object = KeypairObject {
            public_key: self.pubkey().to_bytes().to_vec(),
            private_key: secret.to_vec(),
        };
        let json = Zeroizing::new(serde_json::to_string_pretty(&object)?);
        std::fs::write(path, json.as_bytes())
            .with_context(|| format!("Failed to write wallet file: {}", path.display()))?;
        restrict_permissions(path, 0o600)
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn keypair_arc(&self) -> Arc<Keypair> {
        Arc::clone(&self.keypair)
    }

    pub fn sign_message(&self, message: &[u8]) -> Signature {
        self.keypair.sign_message(message)
    }

    /// Headers for a deployment-manager request issued at `timestamp_ms`
    pub fn auth_headers_at(&self, timestamp_ms: i64) -> AuthHeaders {
        let signature = self.sign_message(AUTH_MESSAGE.as_bytes());
        AuthHeaders {
            user_id: self.pubkey().to_string(),
            authorization: format!(
                "{}:{}:{}",
                AUTH_MESSAGE,
                bs58::encode(signature.as_ref()).into_string(),
                timestamp_ms
            ),
        }
    }

    pub fn auth_headers(&self) -> AuthHeaders {
        self.auth_headers_at(chrono::Utc::now().timestamp_millis())
    }
}

impl std::fmt::Debug for WalletManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletManager")
            .field("pubkey", &self.pubkey())
            .finish()
    }
}

/// `$HOME/.config/nosana-deployer/wallet.json`, or the working directory
/// when no home directory is set
pub fn default_local_wallet_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home)
            .join(".config")
            .join(LOCAL_WALLET_DIR)
            .join(LOCAL_WALLET_FILE),
        _ => PathBuf::from(format!("./{}-{}", LOCAL_WALLET_DIR, LOCAL_WALLET_FILE)),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
