//! Key & address utilities
//!
//! Textual decoding of addresses and secrets (base58), plus the deterministic
//! derivations the Jobs program and the token program rely on:
//! - the market vault PDA (`[market, mint]` under the Jobs program)
//! - associated token accounts (owner + mint)
//!
//! Derived addresses are cheap to recompute and are never cached.

use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;
use std::str::FromStr;
use zeroize::Zeroizing;

use crate::tx_builder::TransactionBuilderError;

/// Jobs program on mainnet
pub const NOSANA_JOBS_PROGRAM: Pubkey = solana_sdk::pubkey!("nosJhNRqr2bc9g1nfGDcXXTXvYUmxD4cVwy2pMWhrYM");

/// Utility token mint on mainnet
pub const NOS_TOKEN_MINT: Pubkey = solana_sdk::pubkey!("nosXBVoaCTtYdLvKY6Csb4AC8JCdQKKAaWYtx2ZMoo7");

/// Decimal exponent of the utility token
pub const NOS_DECIMALS: u8 = 6;

/// Length of an ed25519 keypair in its 64-byte (secret || public) form
pub const KEYPAIR_LENGTH: usize = 64;

/// Program ids and mint the engine is wired against
///
/// Threaded through every builder instead of hard-coding mainnet values, so
/// devnet deployments only change configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkIds {
    pub jobs_program: Pubkey,
    pub token_mint: Pubkey,
    pub token_decimals: u8,
}

impl Default for NetworkIds {
    fn default() -> Self {
        Self {
            jobs_program: NOSANA_JOBS_PROGRAM,
            token_mint: NOS_TOKEN_MINT,
            token_decimals: NOS_DECIMALS,
        }
    }
}

impl NetworkIds {
    /// Vault PDA for a market: seeds `[market, mint]` under the Jobs program
    pub fn market_vault(&self, market: &Pubkey) -> Pubkey {
        derive_market_vault(market, &self.token_mint, &self.jobs_program).0
    }

    /// Associated token account of `owner` for the utility token
    pub fn token_account(&self, owner: &Pubkey) -> Pubkey {
        get_associated_token_address(owner, &self.token_mint)
    }
}

/// Parse a base58 address, mapping failures to an encoding error
pub fn parse_address(label: &str, value: &str) -> Result<Pubkey, TransactionBuilderError> {
    Pubkey::from_str(value.trim()).map_err(|e| {
        TransactionBuilderError::encoding(format!("invalid {} address '{}': {}", label, value, e))
    })
}

pub fn derive_market_vault(market: &Pubkey, mint: &Pubkey, program: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[market.as_ref(), mint.as_ref()], program)
}

/// Decode a base58 secret into its 64 raw bytes
///
/// The buffer is zeroed on drop.
pub fn decode_secret_key(encoded: &str) -> Result<Zeroizing<Vec<u8>>, TransactionBuilderError> {
    let bytes = Zeroizing::new(
        bs58::decode(encoded.trim())
            .into_vec()
            .map_err(|e| TransactionBuilderError::encoding(format!("invalid base58 secret: {}", e)))?,
    );
    validate_secret_bytes(&bytes)?;
    Ok(bytes)
}

pub fn validate_secret_bytes(bytes: &[u8]) -> Result<(), TransactionBuilderError> {
    if bytes.len() != KEYPAIR_LENGTH {
        return Err(TransactionBuilderError::encoding(format!(
            "invalid private key length: expected {} bytes, got {}",
            KEYPAIR_LENGTH,
            bytes.len()
        )));
    }
    if bytes.iter().all(|&b| b == 0) {
        return Err(TransactionBuilderError::encoding(
            "invalid private key: all-zero key rejected",
        ));
    }
    Ok(())
}

pub fn encode_secret_key(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

/// Convert a raw token amount to whole units (display only)
pub fn to_ui_amount(raw: u64, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

/// Convert whole units to raw token units, rounded to the nearest raw unit
pub fn from_ui_amount(ui: f64, decimals: u8) -> u64 {
    if ui <= 0.0 || !ui.is_finite() {
        return 0;
    }
    (ui * 10f64.powi(decimals as i32)).round() as u64
}
