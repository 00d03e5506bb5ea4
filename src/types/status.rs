//! Bridge transaction status and state machine
//!
//! This module defines the `BridgeStatus` enum for every lifecycle state, the
//! `TxEvent` enum for everything that can happen to a transaction, and the
//! transition table joining them. The table is the single authority on which
//! moves are legal; callers that need a transition go through
//! [`next_status`] and handle `InvalidTransition` rather than assigning
//! statuses directly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Status of a bridge transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStatus {
    /// Transfer request accepted, nothing observed on chain yet
    Initiated,
    /// Lock/burn event confirmed on the originating chain
    SourceConfirmed,
    /// Validator attestation collection is in progress
    SignaturesPending,
    /// Attestation threshold reached, signatures frozen
    SignaturesCollected,
    /// Settlement transaction submitted to the destination chain
    DestSubmitted,
    /// Settlement confirmed, value delivered
    Completed,
    /// Timeout exceeded in a non-terminal state
    Stuck,
    /// An automatic recovery attempt is in progress
    Recovering,
    /// Retries exhausted or manual review requested
    AdminReview,
    /// Cancelled by override, refund workflow triggered
    Cancelled,
    /// Locked/burned value returned to the sender
    Refunded,
}

impl BridgeStatus {
    /// Check if the status is terminal (no further transitions accepted)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Refunded)
    }

    /// Check if the status is one of the side states managed by the
    /// monitoring loops
    pub fn is_side_state(&self) -> bool {
        matches!(self, Self::Stuck | Self::Recovering | Self::AdminReview)
    }

    /// Check if the transaction completed successfully
    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Get string representation of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::SourceConfirmed => "source_confirmed",
            Self::SignaturesPending => "signatures_pending",
            Self::SignaturesCollected => "signatures_collected",
            Self::DestSubmitted => "dest_submitted",
            Self::Completed => "completed",
            Self::Stuck => "stuck",
            Self::Recovering => "recovering",
            Self::AdminReview => "admin_review",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BridgeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initiated" => Ok(Self::Initiated),
            "source_confirmed" => Ok(Self::SourceConfirmed),
            "signatures_pending" => Ok(Self::SignaturesPending),
            "signatures_collected" => Ok(Self::SignaturesCollected),
            "dest_submitted" => Ok(Self::DestSubmitted),
            "completed" => Ok(Self::Completed),
            "stuck" => Ok(Self::Stuck),
            "recovering" => Ok(Self::Recovering),
            "admin_review" => Ok(Self::AdminReview),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            _ => Err(format!("Unknown bridge status: {}", s)),
        }
    }
}

/// Events that drive transitions in the transaction state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxEvent {
    /// Lock/burn event confirmed on the originating chain
    SourceConfirmed,
    /// Attestation collection started
    QuorumStarted,
    /// Attestation threshold reached
    QuorumReached,
    /// Settlement submitted to the destination chain
    DestSubmitted,
    /// Settlement confirmed on the destination chain
    DestConfirmed,
    /// StuckMonitor flagged the transaction as overdue
    TimedOut,
    /// RecoveryEngine began an attempt
    RecoveryStarted,
    /// Recovery attempt completed the transfer
    RecoverySucceeded,
    /// Recovery attempt failed, retry budget remains
    RecoveryFailed,
    /// Retry budget exhausted, escalating
    RetriesExhausted,
    /// Observed chain data contradicts the ledger record
    MismatchDetected,
    /// Override: re-queue for automatic recovery
    OverrideRetry,
    /// Override: cancel the transfer
    OverrideCancelled,
    /// Refund workflow returned value to the sender
    OverrideRefunded,
    /// Override: force completion with operator evidence
    OverrideForceCompleted,
    /// Override: park for manual investigation
    OverrideManualReview,
}

impl TxEvent {
    /// The state this event lands in when accepted.
    ///
    /// Every event in the transition table has exactly one target state;
    /// watchers use this to treat a re-observed event as a no-op once the
    /// target has already been reached.
    pub fn canonical_target(&self) -> BridgeStatus {
        match self {
            Self::SourceConfirmed => BridgeStatus::SourceConfirmed,
            Self::QuorumStarted => BridgeStatus::SignaturesPending,
            Self::QuorumReached => BridgeStatus::SignaturesCollected,
            Self::DestSubmitted => BridgeStatus::DestSubmitted,
            Self::DestConfirmed => BridgeStatus::Completed,
            Self::TimedOut => BridgeStatus::Stuck,
            Self::RecoveryStarted => BridgeStatus::Recovering,
            Self::RecoverySucceeded => BridgeStatus::Completed,
            Self::RecoveryFailed => BridgeStatus::Stuck,
            Self::RetriesExhausted => BridgeStatus::AdminReview,
            Self::MismatchDetected => BridgeStatus::AdminReview,
            Self::OverrideRetry => BridgeStatus::Stuck,
            Self::OverrideCancelled => BridgeStatus::Cancelled,
            Self::OverrideRefunded => BridgeStatus::Refunded,
            Self::OverrideForceCompleted => BridgeStatus::Completed,
            Self::OverrideManualReview => BridgeStatus::AdminReview,
        }
    }
}

impl fmt::Display for TxEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SourceConfirmed => "source_confirmed",
            Self::QuorumStarted => "quorum_started",
            Self::QuorumReached => "quorum_reached",
            Self::DestSubmitted => "dest_submitted",
            Self::DestConfirmed => "dest_confirmed",
            Self::TimedOut => "timed_out",
            Self::RecoveryStarted => "recovery_started",
            Self::RecoverySucceeded => "recovery_succeeded",
            Self::RecoveryFailed => "recovery_failed",
            Self::RetriesExhausted => "retries_exhausted",
            Self::MismatchDetected => "mismatch_detected",
            Self::OverrideRetry => "override_retry",
            Self::OverrideCancelled => "override_cancelled",
            Self::OverrideRefunded => "override_refunded",
            Self::OverrideForceCompleted => "override_force_completed",
            Self::OverrideManualReview => "override_manual_review",
        };
        write!(f, "{}", s)
    }
}

/// Compute the next status for `(current, event)`.
///
/// Pure function over the explicit transition table. Any pair not listed
/// returns [`BridgeError::InvalidTransition`] and the caller must leave the
/// record untouched. Terminal states accept no events.
pub fn next_status(current: BridgeStatus, event: TxEvent) -> Result<BridgeStatus, BridgeError> {
    use BridgeStatus as S;
    use TxEvent as E;

    if current.is_terminal() {
        return Err(BridgeError::InvalidTransition {
            from: current,
            event,
        });
    }

    let next = match (current, event) {
        // Forward path
        (S::Initiated, E::SourceConfirmed) => S::SourceConfirmed,
        (S::SourceConfirmed, E::QuorumStarted) => S::SignaturesPending,
        (S::SignaturesPending, E::QuorumReached) => S::SignaturesCollected,
        (S::SignaturesCollected, E::DestSubmitted) => S::DestSubmitted,
        (S::DestSubmitted, E::DestConfirmed) => S::Completed,

        // Timeout detection: only from the forward path, never from a state
        // the monitoring loops already own
        (
            S::Initiated
            | S::SourceConfirmed
            | S::SignaturesPending
            | S::SignaturesCollected
            | S::DestSubmitted,
            E::TimedOut,
        ) => S::Stuck,

        // Recovery cycle
        (S::Stuck, E::RecoveryStarted) => S::Recovering,
        (S::Recovering, E::RecoverySucceeded) => S::Completed,
        (S::Recovering, E::RecoveryFailed) => S::Stuck,
        (S::Recovering | S::Stuck, E::RetriesExhausted) => S::AdminReview,

        // Data mismatch is fatal to automatic processing wherever it is seen
        (_, E::MismatchDetected) => S::AdminReview,

        // Overrides
        (S::Stuck | S::Recovering | S::AdminReview, E::OverrideRetry) => S::Stuck,
        (_, E::OverrideCancelled) => S::Cancelled,
        (_, E::OverrideForceCompleted) => S::Completed,
        (_, E::OverrideManualReview) => S::AdminReview,

        _ => {
            return Err(BridgeError::InvalidTransition {
                from: current,
                event,
            })
        }
    };

    Ok(next)
}

/// Next status when the refund workflow finishes for a cancelled transaction.
///
/// Refund is the one move out of a terminal state and is deliberately kept
/// out of [`next_status`]: only the OverrideGateway's refund workflow may
/// take it.
pub fn refund_transition(current: BridgeStatus) -> Result<BridgeStatus, BridgeError> {
    match current {
        BridgeStatus::Cancelled => Ok(BridgeStatus::Refunded),
        _ => Err(BridgeError::InvalidTransition {
            from: current,
            event: TxEvent::OverrideRefunded,
        }),
    }
}
