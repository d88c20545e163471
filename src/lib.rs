//! Nosana Deployer Library
//!
//! Posts compute jobs to the Nosana Jobs program, funds deployment vaults,
//! and drives deployments through the deployment manager until they run.
//!
//! ## Layout
//!
//! - **tx_builder** / **submission**: instruction encoding, signing and
//!   confirmation polling against a [`ledger::LedgerRpc`]
//! - **funding**: vault funding decisions and transfers
//! - **deployment**: deployment manager client, start recovery and tracking
//! - **deployer**: end-to-end flows over an explicit [`context::DeployerContext`]

pub mod address;
pub mod config;
pub mod context;
pub mod deployer;
pub mod deployment;
pub mod errors;
pub mod funding;
pub mod job;
pub mod ledger;
pub mod metrics;
pub mod observability;
pub mod storage;
pub mod submission;
pub mod tx_builder;
pub mod wallet;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use context::DeployerContext;
pub use deployer::{DeployOutcome, DeployRequest, Deployer, JobDefinition};
pub use errors::DeployerError;
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
