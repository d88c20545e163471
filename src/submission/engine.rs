//! Submission & confirmation engine
//!
//! Drives one transaction through `Built -> Signed -> Submitted` and then to
//! exactly one of [`TxOutcome::Confirmed`], [`TxOutcome::Failed`] or
//! [`TxOutcome::TimedOut`].
//!
//! Resubmission is idempotent: the signature is looked up before sending,
//! and a transaction that already landed is reported without a new send.
//! A send rejected as "already processed" is treated as landed too.

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::{
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::ledger::{LedgerError, LedgerRpc, SendOptions, SignatureStatus};
use crate::metrics::EngineMetrics;
use crate::submission::errors::SubmissionError;
use crate::tx_builder::BuiltTransaction;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct SubmissionPolicy {
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
    pub send: SendOptions,
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            send: SendOptions::default(),
        }
    }
}

/// Terminal state of a submitted transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    Confirmed { signature: Signature, slot: u64 },
    /// Landed with a program error; not retried here
    Failed { signature: Signature, error: String },
    TimedOut { signature: Signature, waited: Duration },
}

impl TxOutcome {
    pub fn signature(&self) -> &Signature {
        match self {
            Self::Confirmed { signature, .. }
            | Self::Failed { signature, .. }
            | Self::TimedOut { signature, .. } => signature,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    /// Collapse non-confirmed outcomes into errors
    pub fn into_result(self) -> Result<Signature, SubmissionError> {
        match self {
            Self::Confirmed { signature, .. } => Ok(signature),
            Self::Failed { signature, error } => {
                Err(SubmissionError::ProgramFailed { signature, error })
            }
            Self::TimedOut { signature, waited } => {
                Err(SubmissionError::TimedOut { signature, waited })
            }
        }
    }
}

/// Sign a built transaction with every required signer
///
/// Fails with [`SubmissionError::MissingSigner`] before any network call if
/// one of the required signers has no keypair in `keypairs`.
pub fn sign(built: &BuiltTransaction, keypairs: &[&Keypair]) -> Result<Transaction, SubmissionError> {
    let mut signers: Vec<&Keypair> = Vec::with_capacity(built.required_signers.len());
    for required in &built.required_signers {
        let keypair = keypairs
            .iter()
            .find(|k| k.pubkey() == *required)
            .ok_or_else(|| SubmissionError::MissingSigner {
                pubkey: required.to_string(),
            })?;
        signers.push(*keypair);
    }

    let mut tx = Transaction::new_unsigned(built.message.clone());
    tx.try_sign(&signers[..], built.blockhash)
        .map_err(|e| SubmissionError::Signing(e.to_string()))?;
    Ok(tx)
}

pub struct SubmissionEngine {
    ledger: Arc<dyn LedgerRpc>,
    policy: SubmissionPolicy,
    metrics: Arc<EngineMetrics>,
}

impl SubmissionEngine {
    pub fn new(ledger: Arc<dyn LedgerRpc>, policy: SubmissionPolicy, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            ledger,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &SubmissionPolicy {
        &self.policy
    }

    /// Sign, submit and wait for a terminal outcome
    pub async fn sign_and_submit(
        &self,
        built: &BuiltTransaction,
        keypairs: &[&Keypair],
    ) -> Result<TxOutcome, SubmissionError> {
        let tx = sign(built, keypairs)?;
        self.submit_and_confirm(&tx).await
    }

    /// Submit a signed transaction and poll until confirmed, failed or timed out
    pub async fn submit_and_confirm(&self, tx: &Transaction) -> Result<TxOutcome, SubmissionError> {
        let signature = tx
            .signatures
            .first()
            .copied()
            .filter(|s| *s != Signature::default())
            .ok_or_else(|| SubmissionError::Signing("transaction is not signed".to_string()))?;

        // Same signature already on the ledger: nothing to send
        match self.lookup(&signature).await {
            Ok(Some(status)) => {
                if let Some(outcome) = self.terminal(&signature, &status) {
                    info!(signature = %signature, "Transaction already landed, skipping send");
                    return Ok(outcome);
                }
            }
            Ok(None) => {}
            Err(err) => {
                debug!(signature = %signature, error = %err, "Pre-send status lookup failed");
            }
        }

        let started = Instant::now();
        match self.ledger.send_transaction(tx, self.policy.send).await {
            Ok(sent) => {
                self.metrics.tx_submitted.inc();
                debug!(signature = %sent, endpoint = self.ledger.endpoint(), "Transaction sent");
            }
            Err(LedgerError::AlreadyProcessed { endpoint }) => {
                info!(signature = %signature, endpoint = %endpoint, "Ledger reports transaction already processed");
            }
            Err(err) => return Err(err.into()),
        }

        let outcome = self.wait_for_confirmation(signature, started).await;
        match &outcome {
            TxOutcome::Confirmed { .. } => self.metrics.observe_confirmation(started.elapsed()),
            TxOutcome::Failed { .. } => self.metrics.tx_failed.inc(),
            TxOutcome::TimedOut { .. } => self.metrics.tx_timed_out.inc(),
        }
        Ok(outcome)
    }

    /// Poll the signature every `poll_interval` until `confirmation_timeout`
    /// after `started`
    pub async fn wait_for_confirmation(&self, signature: Signature, started: Instant) -> TxOutcome {
        let deadline = started + self.policy.confirmation_timeout;
        let mut attempts = 0u32;

        loop {
            let next = Instant::now() + self.policy.poll_interval;
            sleep_until(next.min(deadline)).await;
            attempts += 1;

            match self.lookup(&signature).await {
                Ok(Some(status)) => {
                    if let Some(outcome) = self.terminal(&signature, &status) {
                        debug!(
                            signature = %signature,
                            attempts,
                            latency_ms = started.elapsed().as_millis() as u64,
                            "Terminal status observed"
                        );
                        return outcome;
                    }
                }
                Ok(None) => {
                    debug!(signature = %signature, attempts, "Signature not found yet");
                }
                Err(err) => {
                    warn!(signature = %signature, error = %err, "Error checking signature status");
                }
            }

            if Instant::now() >= deadline {
                let waited = started.elapsed();
                warn!(
                    signature = %signature,
                    attempts,
                    timeout_secs = self.policy.confirmation_timeout.as_secs(),
                    "Transaction was not confirmed in {:.2} seconds",
                    waited.as_secs_f64()
                );
                return TxOutcome::TimedOut { signature, waited };
            }
        }
    }

    async fn lookup(&self, signature: &Signature) -> Result<Option<SignatureStatus>, LedgerError> {
        let mut statuses = self.ledger.get_signature_statuses(&[*signature]).await?;
        Ok(statuses.pop().flatten())
    }

    fn terminal(&self, signature: &Signature, status: &SignatureStatus) -> Option<TxOutcome> {
        if let Some(err) = &status.err {
            error!(signature = %signature, error = %err, "Transaction failed");
            return Some(TxOutcome::Failed {
                signature: *signature,
                error: err.clone(),
            });
        }
        if status.is_confirmed() {
            return Some(TxOutcome::Confirmed {
                signature: *signature,
                slot: status.slot,
            });
        }
        None
    }
}
