//! End-to-end flows over mocked collaborators

use std::str::FromStr;
use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};

use crate::address::NetworkIds;
use crate::context::DeployerContext;
use crate::deployer::{DeployRequest, Deployer, JobDefinition};
use crate::deployment::{DeploymentError, DeploymentEvent, DeploymentStatus};
use crate::errors::DeployerError;
use crate::funding::{FundingError, FundingReceipt};
use crate::metrics::EngineMetrics;
use crate::test_utils::{
    sample_deployment, sample_vault, MockContentStore, MockDeploymentApi, MockLedger, SAMPLE_CID,
    SAMPLE_MARKET,
};
use crate::wallet::WalletManager;

const TIMEOUT_MESSAGE: &str =
    "Transaction was not confirmed in 60.00 seconds. Check signature 4hXn using the Solana Explorer";

struct Harness {
    ledger: Arc<MockLedger>,
    api: Arc<MockDeploymentApi>,
    storage: Arc<MockContentStore>,
    wallet: Pubkey,
    market: Pubkey,
}

impl Harness {
    /// Priced market, funded wallet, existing vault token account
    fn funded() -> (Self, Deployer) {
        let ledger = Arc::new(MockLedger::new());
        let api = Arc::new(MockDeploymentApi::new());
        let storage = Arc::new(MockContentStore::new());
        let ids = NetworkIds::default();
        let keypair = Keypair::new();
        let wallet = keypair.pubkey();
        let market = Pubkey::from_str(SAMPLE_MARKET).unwrap();

        ledger.set_market_price(market, 2_000_000);
        ledger.set_balance(wallet, 10_000_000);
        ledger.set_token_balance(ids.token_account(&wallet), 5_000_000);
        ledger.set_token_balance(ids.token_account(&sample_vault()), 0);

        let ctx = DeployerContext::new(
            WalletManager::from_keypair(keypair),
            ledger.clone(),
            api.clone(),
            Arc::new(EngineMetrics::new().unwrap()),
        )
        .with_storage(storage.clone())
        .with_market(market);

        let harness = Self {
            ledger,
            api,
            storage,
            wallet,
            market,
        };
        (harness, Deployer::new(ctx))
    }
}

fn request() -> DeployRequest {
    DeployRequest::new("llama-inference", JobDefinition::ContentAddress(SAMPLE_CID.to_string()))
}

fn timed_out() -> crate::deployment::Deployment {
    let mut deployment = sample_deployment("dep-1", DeploymentStatus::Error);
    deployment.events = vec![DeploymentEvent::new("Deployment", "JOB_LIST_ERROR", TIMEOUT_MESSAGE)];
    deployment
}

#[tokio::test(start_paused = true)]
async fn test_deploy_creates_funds_starts_and_tracks() {
    let (h, deployer) = Harness::funded();
    h.api.push_get(sample_deployment("dep-1", DeploymentStatus::Starting));
    h.api.push_get(sample_deployment("dep-1", DeploymentStatus::Running));

    let outcome = deployer.deploy(request()).await.unwrap();

    assert_eq!(outcome.status(), DeploymentStatus::Running);
    assert_eq!(
        outcome.history,
        vec![DeploymentStatus::Draft, DeploymentStatus::Starting, DeploymentStatus::Running]
    );
    match &outcome.funding {
        FundingReceipt::Funded {
            native_lamports,
            token_amount,
            instruction_count,
            ..
        } => {
            assert_eq!(*native_lamports, 3_000_000);
            assert_eq!(*token_amount, 2_000_000);
            assert_eq!(*instruction_count, 2);
        }
        other => panic!("unexpected receipt: {:?}", other),
    }

    let created = h.api.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].market, h.market.to_string());
    assert_eq!(created[0].ipfs_definition_hash.as_deref(), Some(SAMPLE_CID));
    assert_eq!(h.api.vault_updates(), vec![sample_vault().to_string()]);
    assert_eq!(h.api.start_calls(), 1);

    let sent = h.ledger.sent_transactions();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message.account_keys[0], h.wallet);
    assert_eq!(*deployer.subscribe("dep-1").borrow(), Some(DeploymentStatus::Running));
}

#[tokio::test(start_paused = true)]
async fn test_deploy_recovers_from_confirmation_timeout() {
    let (h, deployer) = Harness::funded();
    h.api.push_get(timed_out());
    h.api.push_get(sample_deployment("dep-1", DeploymentStatus::Running));

    let outcome = deployer.deploy(request()).await.unwrap();

    assert_eq!(outcome.status(), DeploymentStatus::Running);
    assert_eq!(outcome.start.attempts, 2);
    assert_eq!(outcome.start.restarts, 1);
    assert!(outcome.tracked.is_none());
    assert_eq!(h.api.restart_calls(), 1);
    assert_eq!(h.api.start_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_deploy_unrecognised_error_is_terminal() {
    let (h, deployer) = Harness::funded();
    let mut failed = sample_deployment("dep-1", DeploymentStatus::Error);
    failed.events = vec![DeploymentEvent::new("Deployment", "JOB_ERROR", "image pull failed")];
    h.api.repeat_get(failed);

    let err = deployer.deploy(request()).await.unwrap_err();

    assert!(matches!(
        err,
        DeployerError::Deployment(DeploymentError::StartFailed { .. })
    ));
    assert_eq!(err.last_status(), Some(DeploymentStatus::Error));
    assert_eq!(h.api.restart_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deploy_stops_before_start_when_wallet_is_short() {
    let (h, deployer) = Harness::funded();
    h.ledger.set_balance(h.wallet, 1_000_000);

    let err = deployer.deploy(request()).await.unwrap_err();

    match &err {
        DeployerError::FundingIncomplete { id, vault, source, .. } => {
            assert_eq!(id, "dep-1");
            assert_eq!(vault, &sample_vault().to_string());
            assert!(matches!(source, FundingError::InsufficientFunds { .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.last_status(), Some(DeploymentStatus::Draft));
    assert!(err.to_string().contains("dep-1"));
    assert_eq!(*deployer.subscribe("dep-1").borrow(), Some(DeploymentStatus::Draft));
    assert_eq!(h.api.created().len(), 1);
    assert_eq!(h.api.start_calls(), 0);
    assert_eq!(h.ledger.send_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deploy_uploads_json_definition() {
    let (h, deployer) = Harness::funded();
    h.api.push_get(sample_deployment("dep-1", DeploymentStatus::Running));

    let mut request = DeployRequest::new(
        "hello-world",
        JobDefinition::Json(serde_json::json!({ "version": "0.1", "type": "container", "ops": [] })),
    );
    request.wait = false;
    let outcome = deployer.deploy(request).await.unwrap();

    assert_eq!(outcome.content_address, SAMPLE_CID);
    assert_eq!(h.storage.uploads().len(), 1);
    assert_eq!(h.api.created()[0].ipfs_definition_hash.as_deref(), Some(SAMPLE_CID));
}

#[tokio::test]
async fn test_short_content_address_rejected_before_create() {
    let (h, deployer) = Harness::funded();
    let request = DeployRequest::new("bad", JobDefinition::ContentAddress("QmShort".to_string()));

    let err = deployer.deploy(request).await.unwrap_err();

    assert!(matches!(err, DeployerError::Build(_)));
    assert!(h.api.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_top_up_uses_the_deployment_market() {
    let (h, deployer) = Harness::funded();
    h.api.push_get(sample_deployment("dep-1", DeploymentStatus::Running));

    let receipt = deployer.top_up("dep-1").await.unwrap();

    assert!(receipt.signature().is_some());
    assert_eq!(h.ledger.send_count(), 1);
    assert_eq!(h.api.vault_updates(), vec![sample_vault().to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_top_up_skips_a_funded_vault() {
    let (h, deployer) = Harness::funded();
    h.ledger.set_balance(sample_vault(), 3_000_000);
    h.ledger
        .set_token_balance(NetworkIds::default().token_account(&sample_vault()), 2_000_000);
    h.api.push_get(sample_deployment("dep-1", DeploymentStatus::Running));

    let receipt = deployer.top_up("dep-1").await.unwrap();

    assert_eq!(receipt, FundingReceipt::NotRequired);
    assert_eq!(h.ledger.send_count(), 0);
    assert!(h.api.vault_updates().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_post_job_through_deployer() {
    let (h, deployer) = Harness::funded();

    let posted = deployer
        .post_job(None, &JobDefinition::ContentAddress(SAMPLE_CID.to_string()), 1800)
        .await
        .unwrap();

    assert_eq!(posted.market, h.market.to_string());
    assert_eq!(posted.content_address, SAMPLE_CID);
    let sent = h.ledger.sent_transactions();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].signatures.len(), 3);
    assert!(h.api.created().is_empty());
}
