//! Property tests for the listing payload and the funding decision

use proptest::prelude::*;

use nosana_deployer::funding::{decide, decide_for_vault, FundingPolicy, VaultBalance};
use nosana_deployer::tx_builder::{content_digest, encode_list_data, method_selector, LIST_DATA_LEN, LIST_METHOD_TAG};

proptest! {
    #[test]
    fn list_payload_layout(
        prefix in any::<[u8; 2]>(),
        digest in any::<[u8; 32]>(),
        tail in proptest::collection::vec(any::<u8>(), 0..8),
        timeout in any::<u64>(),
    ) {
        let mut raw = prefix.to_vec();
        raw.extend_from_slice(&digest);
        raw.extend_from_slice(&tail);
        let address = bs58::encode(&raw).into_string();

        let data = encode_list_data(&address, timeout).unwrap();

        prop_assert_eq!(data.len(), LIST_DATA_LEN);
        prop_assert_eq!(&data[..8], &method_selector(LIST_METHOD_TAG)[..]);
        prop_assert_eq!(&data[8..40], &digest[..]);
        prop_assert_eq!(&data[40..48], &timeout.to_le_bytes()[..]);
    }

    #[test]
    fn short_addresses_rejected(raw in proptest::collection::vec(any::<u8>(), 1..34)) {
        let address = bs58::encode(&raw).into_string();
        prop_assert!(content_digest(&address).is_err());
    }

    #[test]
    fn funding_never_spends_the_fee_reserve(price in 0u64..10_000_000_000, wallet in 0u64..10_000_000_000) {
        let policy = FundingPolicy::default();
        let plan = decide(price, wallet, &policy);

        prop_assert!(plan.native_lamports <= policy.native_target_lamports);
        prop_assert!(plan.native_lamports <= wallet.saturating_sub(policy.fee_reserve_lamports));

        if price == 0 {
            prop_assert_eq!(plan.token_amount, 0);
            prop_assert!(!plan.token_deferred);
        } else if wallet >= policy.min_native_for_token_lamports {
            prop_assert_eq!(plan.token_amount, price);
        } else {
            prop_assert_eq!(plan.token_amount, 0);
            prop_assert!(plan.token_deferred);
        }
    }

    #[test]
    fn funding_never_exceeds_the_vault_shortfall(
        price in 0u64..10_000_000_000,
        wallet in 0u64..10_000_000_000,
        vault_lamports in 0u64..10_000_000,
        vault_tokens in 0u64..10_000_000_000,
    ) {
        let policy = FundingPolicy::default();
        let held = VaultBalance { lamports: vault_lamports, token_amount: vault_tokens };
        let plan = decide_for_vault(price, wallet, held, &policy);

        prop_assert!(plan.native_lamports <= policy.native_target_lamports.saturating_sub(vault_lamports));
        prop_assert!(plan.token_amount <= price.saturating_sub(vault_tokens));
        if vault_lamports >= policy.native_target_lamports && vault_tokens >= price {
            prop_assert!(!plan.requires_transfer());
            prop_assert!(plan.ensure_fundable(&policy).is_ok());
        }
    }
}
