//! Raw account readers for funding decisions
//!
//! Market layout (prefix only):
//! ```text
//! [0..32)  authority
//! [32..40) job expiration
//! [40..48) job price, u64 LE, token micro-units
//! ```
//! Token accounts carry their amount at `[64..72)` (mint 32 + owner 32).

use solana_sdk::pubkey::Pubkey;

use crate::address::to_ui_amount;
use crate::funding::errors::FundingError;
use crate::ledger::LedgerRpc;

pub const MARKET_PRICE_OFFSET: usize = 40;
pub const TOKEN_AMOUNT_OFFSET: usize = 64;

fn read_u64_le(data: &[u8], offset: usize, what: &str) -> Result<u64, FundingError> {
    let bytes = data
        .get(offset..offset + 8)
        .ok_or_else(|| {
            FundingError::MarketData(format!(
                "{} account is {} bytes, need at least {}",
                what,
                data.len(),
                offset + 8
            ))
        })?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

/// Point-in-time read of a market account
///
/// Never cached: the price can change between reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketSnapshot {
    pub address: Pubkey,
    /// Job price in token micro-units
    pub price: u64,
}

impl MarketSnapshot {
    pub fn parse(address: Pubkey, data: &[u8]) -> Result<Self, FundingError> {
        let price = read_u64_le(data, MARKET_PRICE_OFFSET, "market")?;
        Ok(Self { address, price })
    }

    pub async fn fetch(ledger: &dyn LedgerRpc, address: &Pubkey) -> Result<Self, FundingError> {
        let data = ledger
            .get_account_data(address)
            .await?
            .ok_or_else(|| FundingError::MarketData(format!("market {} not found", address)))?;
        Self::parse(*address, &data)
    }

    pub fn is_free(&self) -> bool {
        self.price == 0
    }

    pub fn price_ui(&self, decimals: u8) -> f64 {
        to_ui_amount(self.price, decimals)
    }
}

/// Amount held by an SPL token account
pub fn token_account_amount(data: &[u8]) -> Result<u64, FundingError> {
    read_u64_le(data, TOKEN_AMOUNT_OFFSET, "token")
}
