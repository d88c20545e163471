//! Observability module for correlation and tracing
//!
//! Each deployer operation runs inside a [`FlowContext`] span, so every log
//! line emitted by the planner, the submission engine or the lifecycle
//! drivers carries the flow's correlation id.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, info_span, warn, Span};
use uuid::Uuid;

/// Correlation ID for tracking one flow across components
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Context of one logical flow (deploy, fund, post, ...)
#[derive(Debug, Clone)]
pub struct FlowContext {
    correlation_id: CorrelationId,
    operation: &'static str,
    /// Deployment id, market or vault the flow acts on
    subject: String,
    started: Instant,
}

impl FlowContext {
    pub fn new(operation: &'static str, subject: impl Into<String>) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            operation,
            subject: subject.into(),
            started: Instant::now(),
        }
    }

    /// Same correlation id, different operation
    pub fn child(&self, operation: &'static str, subject: impl Into<String>) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            operation,
            subject: subject.into(),
            started: Instant::now(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn span(&self) -> Span {
        info_span!(
            "flow",
            correlation_id = %self.correlation_id,
            operation = self.operation,
            subject = %self.subject
        )
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Log the end of the flow with its latency
    pub fn finish<T, E: std::fmt::Display>(&self, result: &Result<T, E>) {
        match result {
            Ok(_) => info!(
                operation = self.operation,
                latency_ms = self.elapsed_ms(),
                "Flow completed"
            ),
            Err(err) => warn!(
                operation = self.operation,
                latency_ms = self.elapsed_ms(),
                error = %err,
                "Flow failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_keeps_correlation_id() {
        let parent = FlowContext::new("deploy", "market");
        let child = parent.child("fund", "vault");
        assert_eq!(parent.correlation_id(), child.correlation_id());
        assert_eq!(child.operation(), "fund");
        assert_eq!(child.subject(), "vault");
    }

    #[test]
    fn test_correlation_ids_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
        assert_eq!(CorrelationId::from("abc").as_str(), "abc");
    }
}
