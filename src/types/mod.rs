//! # Bridge Types Module
//!
//! Data types for the bridge transaction lifecycle: direction, status and
//! the state machine, and the central transaction record with its audit
//! types.

pub mod direction;
pub mod status;
pub mod transaction;

pub use direction::{BridgeDirection, ChainRole};
pub use status::{next_status, refund_transition, BridgeStatus, TxEvent};
pub use transaction::{
    Attestation, BridgeTransaction, Evidence, RecoveryAttempt, RecoveryOutcome,
    TransactionSummary,
};
