//! Instruction encoding and transaction assembly
//!
//! ## Architecture
//!
//! - **errors**: error taxonomy shared by encoding and assembly
//! - **instructions**: the Jobs program "list" instruction (method selector,
//!   content-address trimming, fixed account table)
//! - **builder**: batches instructions under one blockhash and one fee payer
//!
//! Nothing in this module signs or submits; a [`BuiltTransaction`] is handed
//! to [`crate::submission::SubmissionEngine`] together with the keypairs.

pub mod errors;
pub use errors::TransactionBuilderError;

pub mod builder;
pub mod instructions;

pub use builder::{assemble_with_blockhash, BuiltTransaction, TxBuilder};
pub use instructions::{
    build_list_instruction, content_digest, encode_list_data, method_selector, ListJobParams,
    LIST_ACCOUNT_COUNT, LIST_DATA_LEN, LIST_METHOD_TAG,
};
