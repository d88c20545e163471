//! Error types for the deployment manager client and the lifecycle drivers
//!
//! Terminal lifecycle errors always carry the last observed status and the
//! raw event log so an operator can diagnose without re-querying.

use std::time::Duration;
use thiserror::Error;

use crate::deployment::types::DeploymentStatus;

fn status_text(status: &Option<DeploymentStatus>) -> &'static str {
    status.as_ref().map(|s| s.as_str()).unwrap_or("UNKNOWN")
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeploymentError {
    /// Service answered with a non-2xx status
    #[error("Deployment API error {status} on {path}: {body}")]
    Api { path: String, status: u16, body: String },

    #[error("Deployment API transport error on {path}: {message}")]
    Transport { path: String, message: String },

    /// Response did not match the expected shape
    #[error("Deployment API decode error on {path}: {message}")]
    Decode { path: String, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    /// Start retry budget exhausted, or ERROR for a cause that is not recoverable
    #[error(
        "Deployment {id} failed to start after {attempts} attempt(s): {reason} (last status: {}){}",
        status_text(last_status),
        events_suffix(events)
    )]
    StartFailed {
        id: String,
        attempts: u32,
        reason: String,
        last_status: Option<DeploymentStatus>,
        events: String,
    },

    /// Still not in a stable status when the completion timeout elapsed
    #[error(
        "Deployment {id} did not reach a stable status within {}s (last status: {}){}",
        waited.as_secs(),
        status_text(last_status),
        events_suffix(events)
    )]
    CompletionTimeout {
        id: String,
        waited: Duration,
        last_status: Option<DeploymentStatus>,
        events: String,
    },

    /// Status read rejected while tracking; retryable failures are absorbed
    #[error(
        "Tracking deployment {id} stopped: {source} (last status: {}){}",
        status_text(last_status),
        events_suffix(events)
    )]
    PollFailed {
        id: String,
        source: Box<DeploymentError>,
        last_status: Option<DeploymentStatus>,
        events: String,
    },

    #[error(
        "Deployment {id} still in ERROR after {restarts} automatic restart(s) (last status: {}){}",
        status_text(last_status),
        events_suffix(events)
    )]
    RestartBudgetExhausted {
        id: String,
        restarts: u32,
        last_status: Option<DeploymentStatus>,
        events: String,
    },
}

fn events_suffix(events: &str) -> String {
    if events.is_empty() {
        String::new()
    } else {
        format!("\nevents:\n{}", events)
    }
}

impl DeploymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,

            Self::Decode { .. } => false,
            Self::Auth(_) => false,
            Self::StartFailed { .. } => false,
            Self::CompletionTimeout { .. } => false,
            Self::PollFailed { .. } => false,
            Self::RestartBudgetExhausted { .. } => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Api { .. } => "api",
            Self::Transport { .. } => "transport",
            Self::Decode { .. } => "decode",
            Self::Auth(_) => "auth",
            Self::StartFailed { .. } => "start_failed",
            Self::CompletionTimeout { .. } => "completion_timeout",
            Self::PollFailed { source, .. } => source.category(),
            Self::RestartBudgetExhausted { .. } => "restart_budget_exhausted",
        }
    }

    /// Last status known when a lifecycle error was raised
    pub fn last_status(&self) -> Option<DeploymentStatus> {
        match self {
            Self::StartFailed { last_status, .. }
            | Self::CompletionTimeout { last_status, .. }
            | Self::PollFailed { last_status, .. }
            | Self::RestartBudgetExhausted { last_status, .. } => *last_status,
            _ => None,
        }
    }
}

// Convenience constructors for common error scenarios
impl DeploymentError {
    pub fn transport(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn decode(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_failed_includes_status_and_events() {
        let err = DeploymentError::StartFailed {
            id: "dep-1".to_string(),
            attempts: 3,
            reason: "deployment entered ERROR".to_string(),
            last_status: Some(DeploymentStatus::Error),
            events: "[Deployment/JOB_LIST_ERROR] insufficient balance".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("after 3 attempt(s)"));
        assert!(text.contains("last status: ERROR"));
        assert!(text.contains("insufficient balance"));
        assert_eq!(err.last_status(), Some(DeploymentStatus::Error));
    }

    #[test]
    fn test_completion_timeout_without_events() {
        let err = DeploymentError::CompletionTimeout {
            id: "dep-1".to_string(),
            waited: Duration::from_secs(300),
            last_status: Some(DeploymentStatus::Starting),
            events: String::new(),
        };
        assert_eq!(
            err.to_string(),
            "Deployment dep-1 did not reach a stable status within 300s (last status: STARTING)"
        );
    }

    #[test]
    fn test_retryability() {
        assert!(DeploymentError::transport("/x", "reset").is_retryable());
        assert!(DeploymentError::Api {
            path: "/x".to_string(),
            status: 502,
            body: String::new()
        }
        .is_retryable());
        assert!(!DeploymentError::Api {
            path: "/x".to_string(),
            status: 404,
            body: String::new()
        }
        .is_retryable());
        assert!(!DeploymentError::decode("/x", "bad").is_retryable());
    }
}
