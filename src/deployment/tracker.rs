//! Deployment status tracker
//!
//! Polls the deployment manager on a fixed cadence until the deployment
//! reaches a stable status or the completion deadline passes. Every observed
//! status is published on a per-deployment `watch` channel so callers can
//! follow progress without sharing mutable state with the poller. Channels
//! are keyed by deployment id; one deployment never sees another's status.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::deployment::api::DeploymentApi;
use crate::deployment::diagnostics::{DiagnosticMatcher, Diagnosis};
use crate::deployment::errors::DeploymentError;
use crate::deployment::types::{Deployment, DeploymentStatus};
use crate::metrics::EngineMetrics;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RESTARTS: u32 = 3;
pub const DEFAULT_RESTART_COOLDOWN: Duration = Duration::from_secs(45);
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerPolicy {
    pub poll_interval: Duration,
    /// Automatic restarts allowed on a confirmation-timeout ERROR
    pub max_restarts: u32,
    pub restart_cooldown: Duration,
    pub completion_timeout: Duration,
}

impl Default for TrackerPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_cooldown: DEFAULT_RESTART_COOLDOWN,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
        }
    }
}

/// Outcome of a tracking run that reached a stable status
#[derive(Debug, Clone)]
pub struct TrackReport {
    pub deployment: Deployment,
    /// Distinct statuses in observation order
    pub transitions: Vec<DeploymentStatus>,
    pub polls: u32,
    pub restarts: u32,
    pub elapsed: Duration,
}

impl TrackReport {
    pub fn status(&self) -> DeploymentStatus {
        self.deployment.status
    }
}

pub struct DeploymentTracker {
    api: Arc<dyn DeploymentApi>,
    matcher: DiagnosticMatcher,
    policy: TrackerPolicy,
    metrics: Arc<EngineMetrics>,
    statuses: DashMap<String, watch::Sender<Option<DeploymentStatus>>>,
}

impl DeploymentTracker {
    pub fn new(
        api: Arc<dyn DeploymentApi>,
        matcher: DiagnosticMatcher,
        policy: TrackerPolicy,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            api,
            matcher,
            policy,
            metrics,
            statuses: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &TrackerPolicy {
        &self.policy
    }

    /// Receiver for the most recent observed status of `id`
    pub fn subscribe(&self, id: &str) -> watch::Receiver<Option<DeploymentStatus>> {
        self.statuses
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    pub fn latest(&self, id: &str) -> Option<DeploymentStatus> {
        let tx = self.statuses.get(id)?;
        let status = *tx.borrow();
        status
    }

    /// Publish a status of `id` observed outside the polling loop
    pub fn observe(&self, id: &str, status: DeploymentStatus) {
        self.statuses
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(status));
    }

    /// Drop the channel of `id`; open receivers see it close
    pub fn forget(&self, id: &str) {
        self.statuses.remove(id);
    }

    /// Poll with the policy's completion timeout
    pub async fn wait_for_stable(&self, id: &str) -> Result<TrackReport, DeploymentError> {
        self.track(id, self.policy.completion_timeout).await
    }

    /// Poll `id` until it is stable or `timeout` elapses
    pub async fn track(&self, id: &str, timeout: Duration) -> Result<TrackReport, DeploymentError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut transitions: Vec<DeploymentStatus> = self.latest(id).into_iter().collect();
        let mut polls = 0u32;
        let mut restarts = 0u32;
        let mut last: Option<Deployment> = None;

        info!(deployment = id, timeout_secs = timeout.as_secs(), "Tracking deployment");

        loop {
            polls += 1;
            self.metrics.status_polls.inc();

            let mut next = Instant::now() + self.policy.poll_interval;
            match self.api.get(id).await {
                Ok(deployment) => {
                    let status = deployment.status;
                    self.observe(id, status);
                    if transitions.last() != Some(&status) {
                        info!(deployment = id, status = %status, "Deployment status changed");
                        transitions.push(status);
                    }

                    if status == DeploymentStatus::Error {
                        if let Diagnosis::ConfirmationTimeout { signature, .. } =
                            self.matcher.classify(&deployment.events)
                        {
                            if restarts >= self.policy.max_restarts {
                                return Err(DeploymentError::RestartBudgetExhausted {
                                    id: id.to_string(),
                                    restarts,
                                    last_status: Some(status),
                                    events: deployment.event_log(),
                                });
                            }
                            restarts += 1;
                            self.metrics.restart_attempts.inc();
                            warn!(
                                deployment = id,
                                restart = restarts,
                                max = self.policy.max_restarts,
                                signature = signature.as_deref().unwrap_or("unknown"),
                                "Confirmation timeout while tracking, restarting"
                            );
                            if let Err(err) = self.api.restart(id).await {
                                warn!(deployment = id, error = %err, "Restart request failed");
                            }
                            last = Some(deployment);
                            next = Instant::now() + self.policy.restart_cooldown;
                        } else {
                            return Ok(self.report(deployment, transitions, polls, restarts, started));
                        }
                    } else if status.is_stable() {
                        return Ok(self.report(deployment, transitions, polls, restarts, started));
                    } else {
                        debug!(deployment = id, status = %status, poll = polls, "Deployment not yet stable");
                        last = Some(deployment);
                    }
                }
                Err(err) if err.is_retryable() => {
                    warn!(deployment = id, poll = polls, error = %err, "Status poll failed");
                }
                Err(err) => {
                    return Err(DeploymentError::PollFailed {
                        id: id.to_string(),
                        last_status: self.latest(id),
                        events: last.as_ref().map(|d| d.event_log()).unwrap_or_default(),
                        source: Box::new(err),
                    })
                }
            }

            if Instant::now() >= deadline {
                return Err(DeploymentError::CompletionTimeout {
                    id: id.to_string(),
                    waited: started.elapsed(),
                    last_status: last.as_ref().map(|d| d.status),
                    events: last.as_ref().map(|d| d.event_log()).unwrap_or_default(),
                });
            }
            sleep_until(next.min(deadline)).await;
        }
    }

    fn report(
        &self,
        deployment: Deployment,
        transitions: Vec<DeploymentStatus>,
        polls: u32,
        restarts: u32,
        started: Instant,
    ) -> TrackReport {
        info!(
            deployment = %deployment.id,
            status = %deployment.status,
            polls,
            restarts,
            "Deployment reached stable status"
        );
        TrackReport {
            deployment,
            transitions,
            polls,
            restarts,
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::types::DeploymentEvent;
    use crate::test_utils::{sample_deployment, MockDeploymentApi};

    const TIMEOUT_MESSAGE: &str = "Transaction was not confirmed in 60.00 seconds. Check signature 3abc using the Solana Explorer";

    fn tracker(api: Arc<MockDeploymentApi>, policy: TrackerPolicy) -> DeploymentTracker {
        DeploymentTracker::new(
            api,
            DiagnosticMatcher::default(),
            policy,
            Arc::new(EngineMetrics::new().unwrap()),
        )
    }

    fn timed_out() -> Deployment {
        let mut deployment = sample_deployment("dep-1", DeploymentStatus::Error);
        deployment.events = vec![DeploymentEvent::new("Deployment", "JOB_LIST_ERROR", TIMEOUT_MESSAGE)];
        deployment
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_on_third_poll() {
        let api = Arc::new(MockDeploymentApi::new());
        api.push_get(sample_deployment("dep-1", DeploymentStatus::Starting));
        api.push_get(sample_deployment("dep-1", DeploymentStatus::Starting));
        api.push_get(sample_deployment("dep-1", DeploymentStatus::Running));

        let tracker = tracker(api.clone(), TrackerPolicy::default());
        let rx = tracker.subscribe("dep-1");
        let report = tracker.wait_for_stable("dep-1").await.unwrap();

        assert_eq!(report.polls, 3);
        assert_eq!(api.get_calls(), 3);
        assert_eq!(report.elapsed, DEFAULT_POLL_INTERVAL * 2);
        assert_eq!(
            report.transitions,
            vec![DeploymentStatus::Starting, DeploymentStatus::Running]
        );
        assert_eq!(*rx.borrow(), Some(DeploymentStatus::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_timeout_reports_last_status() {
        let api = Arc::new(MockDeploymentApi::new());
        api.repeat_get(sample_deployment("dep-1", DeploymentStatus::Starting));
        let policy = TrackerPolicy {
            completion_timeout: Duration::from_secs(12),
            ..TrackerPolicy::default()
        };

        let started = Instant::now();
        let err = tracker(api.clone(), policy).wait_for_stable("dep-1").await.unwrap_err();

        match err {
            DeploymentError::CompletionTimeout { last_status, waited, .. } => {
                assert_eq!(last_status, Some(DeploymentStatus::Starting));
                assert_eq!(waited, Duration::from_secs(12));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // polls at 0s, 5s, 10s and a final read at the deadline
        assert_eq!(api.get_calls(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_budget_exhausted() {
        let api = Arc::new(MockDeploymentApi::new());
        api.repeat_get(timed_out());

        let policy = TrackerPolicy {
            completion_timeout: Duration::from_secs(3600),
            ..TrackerPolicy::default()
        };
        let err = tracker(api.clone(), policy).wait_for_stable("dep-1").await.unwrap_err();

        assert!(matches!(
            err,
            DeploymentError::RestartBudgetExhausted { restarts: 3, .. }
        ));
        assert!(err.to_string().contains("3 automatic restart(s)"));
        assert_eq!(api.restart_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_then_running() {
        let api = Arc::new(MockDeploymentApi::new());
        api.push_get(timed_out());
        api.push_get(sample_deployment("dep-1", DeploymentStatus::Starting));
        api.push_get(sample_deployment("dep-1", DeploymentStatus::Running));

        let started = Instant::now();
        let report = tracker(api.clone(), TrackerPolicy::default())
            .wait_for_stable("dep-1")
            .await
            .unwrap();

        assert_eq!(report.restarts, 1);
        assert_eq!(report.status(), DeploymentStatus::Running);
        assert_eq!(started.elapsed(), DEFAULT_RESTART_COOLDOWN + DEFAULT_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognised_error_is_stable() {
        let api = Arc::new(MockDeploymentApi::new());
        let mut deployment = sample_deployment("dep-1", DeploymentStatus::Error);
        deployment.events = vec![DeploymentEvent::new("Deployment", "NODE_ERROR", "out of memory")];
        api.push_get(deployment);

        let report = tracker(api.clone(), TrackerPolicy::default())
            .wait_for_stable("dep-1")
            .await
            .unwrap();
        assert_eq!(report.status(), DeploymentStatus::Error);
        assert_eq!(api.restart_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_errors_tolerated() {
        let api = Arc::new(MockDeploymentApi::new());
        api.fail_gets(2);
        api.push_get(sample_deployment("dep-1", DeploymentStatus::Stopped));

        let report = tracker(api.clone(), TrackerPolicy::default())
            .wait_for_stable("dep-1")
            .await
            .unwrap();
        assert_eq!(report.polls, 3);
        assert_eq!(report.status(), DeploymentStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_poll_keeps_last_status() {
        let api = Arc::new(MockDeploymentApi::new());
        let mut starting = sample_deployment("dep-1", DeploymentStatus::Starting);
        starting.events = vec![DeploymentEvent::new("Deployment", "DEPLOYMENT_STARTING", "listing job")];
        api.push_get(starting);

        let tracker = tracker(api.clone(), TrackerPolicy::default());
        let polling = tracker.wait_for_stable("dep-1");
        tokio::pin!(polling);
        // first poll answers STARTING, every later read is rejected
        tokio::select! {
            _ = &mut polling => panic!("finished before the second poll"),
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
        api.fail_gets_with(1, 403);
        let err = polling.await.unwrap_err();

        assert!(matches!(err, DeploymentError::PollFailed { ref id, .. } if id == "dep-1"));
        assert_eq!(err.last_status(), Some(DeploymentStatus::Starting));
        assert_eq!(err.category(), "api");
        assert!(!err.is_retryable());
        let text = err.to_string();
        assert!(text.contains("403"));
        assert!(text.contains("last status: STARTING"));
        assert!(text.contains("listing job"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timeout_event_does_not_restart() {
        let api = Arc::new(MockDeploymentApi::new());
        let mut deployment = timed_out();
        deployment
            .events
            .push(DeploymentEvent::new("Deployment", "NODE_ERROR", "out of memory"));
        api.push_get(deployment);

        let report = tracker(api.clone(), TrackerPolicy::default())
            .wait_for_stable("dep-1")
            .await
            .unwrap();
        assert_eq!(report.status(), DeploymentStatus::Error);
        assert_eq!(api.restart_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_statuses_are_kept_per_deployment() {
        let api = Arc::new(MockDeploymentApi::new());
        api.push_get(sample_deployment("dep-a", DeploymentStatus::Running));

        let tracker = tracker(api, TrackerPolicy::default());
        let rx_b = tracker.subscribe("dep-b");
        tracker.observe("dep-b", DeploymentStatus::Stopped);

        let report = tracker.wait_for_stable("dep-a").await.unwrap();
        assert_eq!(report.transitions, vec![DeploymentStatus::Running]);
        assert_eq!(tracker.latest("dep-a"), Some(DeploymentStatus::Running));
        assert_eq!(*rx_b.borrow(), Some(DeploymentStatus::Stopped));

        tracker.forget("dep-b");
        assert_eq!(tracker.latest("dep-b"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_status_starts_transitions() {
        let api = Arc::new(MockDeploymentApi::new());
        api.push_get(sample_deployment("dep-1", DeploymentStatus::Running));

        let tracker = tracker(api, TrackerPolicy::default());
        tracker.observe("dep-1", DeploymentStatus::Starting);
        let report = tracker.wait_for_stable("dep-1").await.unwrap();
        assert_eq!(
            report.transitions,
            vec![DeploymentStatus::Starting, DeploymentStatus::Running]
        );
    }
}
