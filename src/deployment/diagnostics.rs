//! Diagnostic signature matching over deployment event logs
//!
//! The deployment manager reports ledger trouble only as free text in its
//! event log. All phrase matching lives here so a wording change on the
//! service side touches nothing else.

use crate::deployment::types::DeploymentEvent;

/// Phrase the service logs when a listing transaction hit the 60s ceiling
pub const DEFAULT_TIMEOUT_PHRASE: &str = "Transaction was not confirmed in 60.00 seconds";

const SIGNATURE_MARKER: &str = "Check signature ";
const GENERIC_LEDGER_PHRASES: [&str; 2] = ["Transaction was not confirmed", "transaction timeout"];
const JOB_LIST_ERROR: &str = "JOB_LIST_ERROR";
const ERROR_MARKER: &str = "ERROR";

/// Classification of a deployment's event log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnosis {
    /// The exact confirmation-timeout signature; recoverable by restarting
    ConfirmationTimeout {
        /// Transaction signature quoted by the service, when present
        signature: Option<String>,
        message: String,
    },
    /// Some other ledger-side failure; reported but not restarted
    LedgerFailure { message: String },
    /// Nothing recognisable
    Unrecognized,
}

impl Diagnosis {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConfirmationTimeout { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMatcher {
    timeout_phrase: String,
}

impl Default for DiagnosticMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_PHRASE)
    }
}

impl DiagnosticMatcher {
    pub fn new(timeout_phrase: impl Into<String>) -> Self {
        Self {
            timeout_phrase: timeout_phrase.into(),
        }
    }

    pub fn timeout_phrase(&self) -> &str {
        &self.timeout_phrase
    }

    /// Classify the most recent failure in an event log
    ///
    /// The log is cumulative and oldest first, so only the latest failure
    /// event decides; an older timeout never makes a newer error recoverable.
    pub fn classify(&self, events: &[DeploymentEvent]) -> Diagnosis {
        match events.iter().rev().find(|e| self.is_failure(e)) {
            Some(event) => self.classify_event(event),
            None => Diagnosis::Unrecognized,
        }
    }

    fn classify_event(&self, event: &DeploymentEvent) -> Diagnosis {
        if event.message.contains(&self.timeout_phrase) {
            Diagnosis::ConfirmationTimeout {
                signature: extract_signature(&event.message),
                message: event.message.clone(),
            }
        } else if is_ledger_failure(event) {
            Diagnosis::LedgerFailure {
                message: event.message.clone(),
            }
        } else {
            Diagnosis::Unrecognized
        }
    }

    fn is_failure(&self, event: &DeploymentEvent) -> bool {
        event.kind.contains(ERROR_MARKER)
            || event.message.contains(&self.timeout_phrase)
            || is_ledger_failure(event)
    }
}

fn is_ledger_failure(event: &DeploymentEvent) -> bool {
    event.kind == JOB_LIST_ERROR
        || GENERIC_LEDGER_PHRASES
            .iter()
            .any(|phrase| event.message.contains(phrase))
}

/// Signature quoted as `... Check signature <sig> using the Solana Explorer`
pub fn extract_signature(message: &str) -> Option<String> {
    let (_, rest) = message.split_once(SIGNATURE_MARKER)?;
    rest.split_whitespace()
        .next()
        .map(|s| s.trim_end_matches(|c: char| !c.is_ascii_alphanumeric()).to_string())
        .filter(|s| !s.is_empty())
}
