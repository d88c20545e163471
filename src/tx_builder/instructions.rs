//! Jobs program "list" instruction encoder
//!
//! Builds the single instruction that posts a job to a market. The layout is
//! fixed by the on-chain program and a mismatch is rejected on-chain without
//! a useful error, so both the payload and the account table are pinned by
//! unit tests.
//!
//! ## Payload
//! ```text
//! [0..8)   method selector = sha256("global:list")[..8]
//! [8..40)  content address digest (decoded hash with its 2-byte multihash prefix removed)
//! [40..48) job timeout in seconds, little-endian 64-bit
//! ```
//!
//! ## Accounts (order is protocol-fixed)
//! | # | account              | writable | signer |
//! |---|----------------------|----------|--------|
//! | 0 | job                  | yes      | yes    |
//! | 1 | market               | yes      | no     |
//! | 2 | run                  | yes      | yes    |
//! | 3 | wallet token account | yes      | no     |
//! | 4 | market vault         | yes      | no     |
//! | 5 | payer                | yes      | yes    |
//! | 6 | authority            | no       | yes    |
//! | 7 | token program        | no       | no     |
//! | 8 | system program       | no       | no     |

use sha2::{Digest, Sha256};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

use crate::address::NetworkIds;
use crate::tx_builder::errors::TransactionBuilderError;

/// Tag hashed into the method selector of the "list" method
pub const LIST_METHOD_TAG: &str = "global:list";

/// Minimum decoded length of a content address (2-byte prefix + 32-byte digest)
pub const CONTENT_ADDRESS_MIN_LEN: usize = 34;

/// Bytes skipped at the front of a decoded content address
pub const CONTENT_ADDRESS_PREFIX_LEN: usize = 2;

pub const CONTENT_DIGEST_LEN: usize = 32;

/// Number of accounts the "list" instruction takes
pub const LIST_ACCOUNT_COUNT: usize = 9;

/// Total payload length: selector + digest + timeout
pub const LIST_DATA_LEN: usize = 8 + CONTENT_DIGEST_LEN + 8;

/// First 8 bytes of `sha256(tag)`
pub fn method_selector(tag: &str) -> [u8; 8] {
    let hash = Sha256::digest(tag.as_bytes());
    let mut selector = [0u8; 8];
    selector.copy_from_slice(&hash[..8]);
    selector
}

/// Decode a base58 content address and keep the 32-byte digest
///
/// Anything shorter than 34 decoded bytes is rejected; bytes beyond the
/// digest are ignored.
pub fn content_digest(content_address: &str) -> Result<[u8; CONTENT_DIGEST_LEN], TransactionBuilderError> {
    let raw = bs58::decode(content_address.trim())
        .into_vec()
        .map_err(|e| {
            TransactionBuilderError::encoding(format!(
                "content address '{}' is not base58: {}",
                content_address, e
            ))
        })?;

    if raw.len() < CONTENT_ADDRESS_MIN_LEN {
        return Err(TransactionBuilderError::encoding(format!(
            "content address '{}' decodes to {} bytes, need at least {}",
            content_address,
            raw.len(),
            CONTENT_ADDRESS_MIN_LEN
        )));
    }

    let mut digest = [0u8; CONTENT_DIGEST_LEN];
    digest.copy_from_slice(
        &raw[CONTENT_ADDRESS_PREFIX_LEN..CONTENT_ADDRESS_PREFIX_LEN + CONTENT_DIGEST_LEN],
    );
    Ok(digest)
}

/// Inputs of the "list" instruction
#[derive(Debug, Clone)]
pub struct ListJobParams<'a> {
    pub job: Pubkey,
    pub run: Pubkey,
    pub market: Pubkey,
    /// Wallet paying for and authorising the listing
    pub wallet: Pubkey,
    pub content_address: &'a str,
    pub timeout_secs: u64,
}

/// Encode the "list" payload
pub fn encode_list_data(
    content_address: &str,
    timeout_secs: u64,
) -> Result<Vec<u8>, TransactionBuilderError> {
    let digest = content_digest(content_address)?;

    let mut data = Vec::with_capacity(LIST_DATA_LEN);
    data.extend_from_slice(&method_selector(LIST_METHOD_TAG));
    data.extend_from_slice(&digest);
    data.extend_from_slice(&timeout_secs.to_le_bytes());
    Ok(data)
}

/// Build the "list" instruction for the Jobs program
pub fn build_list_instruction(
    params: &ListJobParams<'_>,
    ids: &NetworkIds,
) -> Result<Instruction, TransactionBuilderError> {
    // Payload first: a malformed content address must not leave a half-built instruction behind
    let data = encode_list_data(params.content_address, params.timeout_secs)?;

    let wallet_token_account = ids.token_account(&params.wallet);
    let vault = ids.market_vault(&params.market);

    let accounts = vec![
        AccountMeta::new(params.job, true),
        AccountMeta::new(params.market, false),
        AccountMeta::new(params.run, true),
        AccountMeta::new(wallet_token_account, false),
        AccountMeta::new(vault, false),
        AccountMeta::new(params.wallet, true),
        AccountMeta::new_readonly(params.wallet, true),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(system_program::id(), false),
    ];

    Ok(Instruction {
        program_id: ids.jobs_program,
        accounts,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A real CIDv0 (sha2-256 multihash, 34 bytes decoded)
    const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    fn params(content_address: &str) -> ListJobParams<'_> {
        ListJobParams {
            job: Pubkey::new_unique(),
            run: Pubkey::new_unique(),
            market: Pubkey::new_unique(),
            wallet: Pubkey::new_unique(),
            content_address,
            timeout_secs: 3600,
        }
    }

    #[test]
    fn test_selector_is_sha256_prefix() {
        let full = Sha256::digest(b"global:list");
        assert_eq!(&method_selector(LIST_METHOD_TAG)[..], &full[..8]);
    }

    #[test]
    fn test_payload_layout() {
        let data = encode_list_data(CID, 3600).unwrap();
        assert_eq!(data.len(), LIST_DATA_LEN);
        assert_eq!(&data[..8], &method_selector(LIST_METHOD_TAG));

        let raw = bs58::decode(CID).into_vec().unwrap();
        assert_eq!(raw.len(), 34);
        assert_eq!(&raw[..2], &[0x12, 0x20]);
        assert_eq!(&data[8..40], &raw[2..34]);
        assert_eq!(&data[40..48], &3600u64.to_le_bytes());
    }

    #[test]
    fn test_account_table() {
        let ids = NetworkIds::default();
        let p = params(CID);
        let ix = build_list_instruction(&p, &ids).unwrap();

        assert_eq!(ix.program_id, ids.jobs_program);
        assert_eq!(ix.accounts.len(), LIST_ACCOUNT_COUNT);

        let expected = [
            (p.job, true, true),
            (p.market, true, false),
            (p.run, true, true),
            (ids.token_account(&p.wallet), true, false),
            (ids.market_vault(&p.market), true, false),
            (p.wallet, true, true),
            (p.wallet, false, true),
            (spl_token::id(), false, false),
            (system_program::id(), false, false),
        ];
        for (idx, (meta, (key, writable, signer))) in ix.accounts.iter().zip(expected).enumerate() {
            assert_eq!(meta.pubkey, key, "account {} key", idx);
            assert_eq!(meta.is_writable, writable, "account {} writable", idx);
            assert_eq!(meta.is_signer, signer, "account {} signer", idx);
        }
    }

    #[test]
    fn test_short_content_address_rejected() {
        let short = bs58::encode([0x12u8; 33]).into_string();
        let err = build_list_instruction(&params(&short), &NetworkIds::default()).unwrap_err();
        assert!(matches!(err, TransactionBuilderError::Encoding(_)));
    }

    #[test]
    fn test_invalid_base58_rejected() {
        let err = content_digest("Qm0OIl").unwrap_err();
        assert!(matches!(err, TransactionBuilderError::Encoding(_)));
    }

    #[test]
    fn test_longer_content_address_keeps_middle_digest() {
        let mut raw = vec![0x01, 0x55];
        raw.extend((0u8..32).collect::<Vec<_>>());
        raw.extend([0xff; 4]);
        let encoded = bs58::encode(&raw).into_string();
        let digest = content_digest(&encoded).unwrap();
        assert_eq!(digest.to_vec(), (0u8..32).collect::<Vec<_>>());
    }
}
