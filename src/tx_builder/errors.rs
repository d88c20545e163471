//! Error types for instruction encoding and transaction assembly
//!
//! Everything in here is a cheap, local failure: malformed textual input,
//! an instruction that cannot be built, or a blockhash that could not be
//! fetched. None of these errors is ever the result of submitting a
//! transaction, so the caller never holds a partially-built instruction.

use thiserror::Error;

use crate::ledger::LedgerError;

/// Error type for instruction encoding and transaction assembly
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionBuilderError {
    /// Malformed address, secret or content-address input
    ///
    /// Fatal: retrying with the same input yields the same error.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Failed to build an instruction for a specific program
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild {
        /// The program the instruction targets
        program: String,
        /// Detailed reason for the failure
        reason: String,
    },

    /// Failed to fetch a recent blockhash
    #[error("Blockhash error: {0}")]
    Blockhash(String),

    /// Empty instruction list or other structural problem
    #[error("Invalid transaction layout: {0}")]
    InvalidLayout(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl TransactionBuilderError {
    /// Check if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Blockhash(_) => true,
            Self::Ledger(err) => err.is_retryable(),

            Self::Encoding(_) => false,
            Self::InstructionBuild { .. } => false,
            Self::InvalidLayout(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::Encoding(_) => "encoding",
            Self::InstructionBuild { .. } => "instruction",
            Self::Blockhash(_) => "blockhash",
            Self::InvalidLayout(_) => "layout",
            Self::Ledger(_) => "ledger",
        }
    }
}

// Convenience constructors for common error scenarios
impl TransactionBuilderError {
    pub fn encoding(reason: impl Into<String>) -> Self {
        Self::Encoding(reason.into())
    }

    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }

    pub fn blockhash_unavailable(reason: impl Into<String>) -> Self {
        Self::Blockhash(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransactionBuilderError::Encoding("hash too short".to_string());
        assert_eq!(err.to_string(), "Encoding error: hash too short");

        let err = TransactionBuilderError::InstructionBuild {
            program: "spl_token".to_string(),
            reason: "invalid accounts".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Instruction build error (program=spl_token): invalid accounts"
        );
    }

    #[test]
    fn test_error_retryability() {
        assert!(TransactionBuilderError::Blockhash("test".to_string()).is_retryable());
        assert!(TransactionBuilderError::Ledger(LedgerError::Transport {
            endpoint: "rpc".to_string(),
            message: "reset".to_string(),
        })
        .is_retryable());

        assert!(!TransactionBuilderError::Encoding("test".to_string()).is_retryable());
        assert!(!TransactionBuilderError::instruction_failed("p", "r").is_retryable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(TransactionBuilderError::encoding("x").category(), "encoding");
        assert_eq!(
            TransactionBuilderError::blockhash_unavailable("x").category(),
            "blockhash"
        );
    }
}
