//! Vault funding
//!
//! `planner` decides amounts from fresh chain state, `transfer` turns a plan
//! into instructions and `funder` submits them as one transaction.

pub mod errors;
pub mod funder;
pub mod market;
pub mod planner;
pub mod transfer;

pub use errors::FundingError;
pub use funder::{FundingReceipt, VaultFunder};
pub use market::MarketSnapshot;
pub use planner::{decide, decide_for_vault, FundingPlan, FundingPlanner, FundingPolicy, VaultBalance};
pub use transfer::{TransferBatch, TransferBuilder};
