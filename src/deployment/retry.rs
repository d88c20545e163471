//! Start controller
//!
//! Wraps "start a deployment" in a bounded number of attempts. After each
//! accepted start the deployment is re-read after a short grace period; an
//! ERROR whose event log carries the confirmation-timeout signature triggers
//! a nested restart sequence, any other ERROR is terminal.
//!
//! The loop is an explicit state machine over [`StartState`] so the attempt
//! counter and every wait are visible in one place.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::deployment::api::DeploymentApi;
use crate::deployment::diagnostics::{DiagnosticMatcher, Diagnosis};
use crate::deployment::errors::DeploymentError;
use crate::deployment::types::{Deployment, DeploymentStatus};
use crate::ledger::LedgerRpc;
use crate::metrics::EngineMetrics;

pub const DEFAULT_START_ATTEMPTS: u32 = 10;
pub const DEFAULT_START_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_NESTED_RESTARTS: u32 = 3;
pub const DEFAULT_NESTED_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_RECOVERY_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_attempts: u32,
    /// Wait between an accepted start and the verification read
    pub start_grace: Duration,
    /// Wait after a failed start or verification call
    pub retry_backoff: Duration,
    pub nested_restarts: u32,
    pub nested_backoff: Duration,
    /// Wait after a restart sequence before the next outer attempt
    pub cooldown: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_START_ATTEMPTS,
            start_grace: DEFAULT_START_GRACE,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            nested_restarts: DEFAULT_NESTED_RESTARTS,
            nested_backoff: DEFAULT_NESTED_BACKOFF,
            cooldown: DEFAULT_RECOVERY_COOLDOWN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartState {
    Start,
    Verify,
    Recover,
    Wait(Duration),
}

/// Result of a successful start
#[derive(Debug, Clone)]
pub struct StartReport {
    pub deployment: Deployment,
    /// Outer attempts used, including the successful one
    pub attempts: u32,
    /// Restart calls issued
    pub restarts: u32,
    /// Status echoed by the last accepted start call
    pub start_status: Option<DeploymentStatus>,
}

pub struct StartController {
    api: Arc<dyn DeploymentApi>,
    ledger: Option<Arc<dyn LedgerRpc>>,
    matcher: DiagnosticMatcher,
    policy: RestartPolicy,
    metrics: Arc<EngineMetrics>,
}

impl StartController {
    pub fn new(
        api: Arc<dyn DeploymentApi>,
        matcher: DiagnosticMatcher,
        policy: RestartPolicy,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            api,
            ledger: None,
            matcher,
            policy,
            metrics,
        }
    }

    /// Probe this ledger before the first attempt
    pub fn with_health_probe(mut self, ledger: Arc<dyn LedgerRpc>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// Start `id`, recovering from confirmation timeouts
    pub async fn start(&self, id: &str) -> Result<StartReport, DeploymentError> {
        self.probe_ledger().await;

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1u32;
        let mut restarts = 0u32;
        let mut start_status = None;
        let mut last: Option<Deployment> = None;
        let mut state = StartState::Start;

        loop {
            state = match state {
                StartState::Start => {
                    self.metrics.start_attempts.inc();
                    info!(deployment = id, attempt, max_attempts, "Starting deployment");
                    match self.api.start(id).await {
                        Ok(response) => {
                            debug!(deployment = id, status = %response.status, "Start accepted");
                            start_status = Some(response.status);
                            StartState::Verify
                        }
                        Err(err) => {
                            warn!(deployment = id, attempt, error = %err, "Start attempt failed");
                            self.after_failure(id, attempt, max_attempts, &err, &last)?
                        }
                    }
                }

                StartState::Verify => {
                    sleep(self.policy.start_grace).await;
                    match self.api.get(id).await {
                        Ok(deployment) if deployment.status == DeploymentStatus::Error => {
                            let diagnosis = self.matcher.classify(&deployment.events);
                            last = Some(deployment);
                            match diagnosis {
                                Diagnosis::ConfirmationTimeout { signature, .. } if attempt < max_attempts => {
                                    warn!(
                                        deployment = id,
                                        attempt,
                                        signature = signature.as_deref().unwrap_or("unknown"),
                                        "Confirmation timeout detected, restarting"
                                    );
                                    StartState::Recover
                                }
                                Diagnosis::ConfirmationTimeout { .. } => {
                                    return Err(start_failed(
                                        id,
                                        attempt,
                                        "confirmation timeout persisted through every attempt",
                                        &last,
                                    ));
                                }
                                Diagnosis::LedgerFailure { message } => {
                                    warn!(deployment = id, message = %message, "Ledger failure reported");
                                    return Err(start_failed(id, attempt, format!("ledger failure: {}", message), &last));
                                }
                                Diagnosis::Unrecognized => {
                                    return Err(start_failed(id, attempt, "deployment entered ERROR", &last));
                                }
                            }
                        }
                        Ok(deployment) => {
                            info!(deployment = id, attempt, status = %deployment.status, "Deployment started");
                            return Ok(StartReport {
                                deployment,
                                attempts: attempt,
                                restarts,
                                start_status,
                            });
                        }
                        Err(err) => {
                            warn!(deployment = id, attempt, error = %err, "Failed to verify deployment status");
                            self.after_failure(id, attempt, max_attempts, &err, &last)?
                        }
                    }
                }

                StartState::Recover => {
                    restarts += self.restart_sequence(id).await;
                    StartState::Wait(self.policy.cooldown)
                }

                StartState::Wait(delay) => {
                    sleep(delay).await;
                    attempt += 1;
                    StartState::Start
                }
            };
        }
    }

    /// Back off when budget remains, otherwise fail
    fn after_failure(
        &self,
        id: &str,
        attempt: u32,
        max_attempts: u32,
        err: &DeploymentError,
        last: &Option<Deployment>,
    ) -> Result<StartState, DeploymentError> {
        if attempt >= max_attempts {
            return Err(start_failed(id, attempt, err.to_string(), last));
        }
        Ok(StartState::Wait(self.policy.retry_backoff))
    }

    /// Nested restart tries; returns the number of restart calls issued
    async fn restart_sequence(&self, id: &str) -> u32 {
        let mut issued = 0;
        for nested in 1..=self.policy.nested_restarts {
            issued += 1;
            self.metrics.restart_attempts.inc();
            info!(deployment = id, nested, max = self.policy.nested_restarts, "Restarting deployment");

            match self.api.restart(id).await {
                Ok(()) => {
                    info!(deployment = id, nested, "Restart initiated");
                    break;
                }
                Err(err) => {
                    warn!(deployment = id, nested, error = %err, "Restart failed, starting from ERROR");
                    match self.api.start(id).await {
                        Ok(response) => info!(deployment = id, status = %response.status, "Direct start accepted"),
                        Err(err) => warn!(deployment = id, error = %err, "Direct start failed"),
                    }
                }
            }
            sleep(self.policy.nested_backoff).await;
        }
        issued
    }

    async fn probe_ledger(&self) {
        if let Some(ledger) = &self.ledger {
            match ledger.health().await {
                Ok(()) => debug!(endpoint = ledger.endpoint(), "Ledger reachable"),
                Err(err) => warn!(endpoint = ledger.endpoint(), error = %err, "Ledger health probe failed"),
            }
        }
    }
}

fn start_failed(
    id: &str,
    attempts: u32,
    reason: impl Into<String>,
    last: &Option<Deployment>,
) -> DeploymentError {
    DeploymentError::StartFailed {
        id: id.to_string(),
        attempts,
        reason: reason.into(),
        last_status: last.as_ref().map(|d| d.status),
        events: last.as_ref().map(|d| d.event_log()).unwrap_or_default(),
    }
}
