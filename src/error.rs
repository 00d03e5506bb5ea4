//! # Bridge Error Management
//!
//! Central error enum for the whole bridge engine, with classification
//! helpers used by the recovery and API layers. Every fallible public
//! operation in this crate returns [`Result`].

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use warp::reject::Reject;

use crate::types::status::{BridgeStatus, TxEvent};

/// Result alias for the whole bridge engine
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Central error enum for the bridge engine
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "error_type", content = "error_details")]
pub enum BridgeError {
    /// Transition not present in the state-machine table
    #[error("Invalid transition: {event} not allowed from {from}")]
    InvalidTransition {
        /// Status the transaction was in when the event arrived
        from: BridgeStatus,
        /// Event that was rejected
        event: TxEvent,
    },

    /// Cancel requested at or after destination submission
    #[error("Cancel not permitted: {0}")]
    CancelNotPermitted(String),

    /// Quorum collection exceeded its deadline
    #[error("Quorum collection timed out: {collected}/{required} attestations")]
    QuorumTimeout {
        /// Distinct attestations held when the deadline elapsed
        collected: usize,
        /// Threshold that was required
        required: usize,
    },

    /// All validators answered but threshold was not reached
    #[error("Quorum insufficient: {collected}/{required} attestations")]
    QuorumInsufficient {
        /// Distinct attestations collected
        collected: usize,
        /// Threshold that was required
        required: usize,
    },

    /// Observed chain data does not match the ledger record
    #[error("Data mismatch: {0}")]
    DataMismatch(String),

    /// Automatic retry budget exhausted
    #[error("Retries exhausted: {0}")]
    RetriesExhausted(String),

    /// Transient RPC or connectivity failure
    #[error("RPC error: {0}")]
    Rpc(String),

    /// External call exceeded its timeout
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Ledger store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transaction id not present in the ledger
    #[error("Transaction not found: {0}")]
    NotFound(String),

    /// Caller lacks the authority required for the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Override action submitted without its required evidence
    #[error("Evidence required: {0}")]
    EvidenceRequired(String),

    /// Request rejected by input validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// JSON encode/decode failure
    #[error("JSON error: {0}")]
    Json(String),

    /// Intake refused while the bridge is paused
    #[error("Bridge is paused: {0}")]
    Paused(String),
}

impl BridgeError {
    /// Whether automatic recovery may retry after this error.
    ///
    /// Transient network and quorum failures are retryable; data mismatches
    /// and exhausted retries always escalate instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Rpc(_)
                | BridgeError::Timeout(_)
                | BridgeError::QuorumTimeout { .. }
                | BridgeError::QuorumInsufficient { .. }
        )
    }

    /// Whether this error must be routed to admin review without retrying
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::DataMismatch(_) | BridgeError::RetriesExhausted(_)
        )
    }

    /// HTTP status code for the API layer
    pub fn status_code(&self) -> u16 {
        match self {
            BridgeError::NotFound(_) => 404,
            BridgeError::PermissionDenied(_) => 403,
            BridgeError::EvidenceRequired(_) | BridgeError::Validation(_) => 422,
            BridgeError::InvalidTransition { .. } | BridgeError::CancelNotPermitted(_) => 409,
            BridgeError::Paused(_) => 503,
            _ => 500,
        }
    }
}

impl From<io::Error> for BridgeError {
    fn from(err: io::Error) -> Self {
        BridgeError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json(err.to_string())
    }
}

// Allows warp handlers to bubble BridgeError through rejections
impl Reject for BridgeError {}
