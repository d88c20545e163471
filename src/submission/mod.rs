//! Signing, submission and confirmation polling

pub mod engine;
pub mod errors;

pub use engine::{sign, SubmissionEngine, SubmissionPolicy, TxOutcome};
pub use errors::SubmissionError;
