//! Deposit/withdrawal request workflow and admin adjustments

mod service;

pub use service::{validate_amount, EntryOutcome, MAX_AMOUNT, TransactionWorkflow, WorkflowPolicy};
