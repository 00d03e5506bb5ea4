//! Bridge transaction data structures
//!
//! This module defines the `BridgeTransaction` record, the central entity of
//! the engine, together with its audit types. Records are owned by the
//! `BridgeLedger` and mutated only through governed transitions; the helpers
//! here are read-only views plus constructors.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::direction::BridgeDirection;
use super::status::BridgeStatus;

/// A validator attestation authorizing a mint/release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Identity of the attesting validator
    pub validator_id: String,

    /// Opaque signature bytes, hex-encoded; verification scheme is external
    pub signature: String,

    /// When the attestation was produced
    pub signed_at: DateTime<Utc>,
}

/// Outcome of a single recovery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The attempt completed the transfer
    Succeeded,
    /// The attempt failed; the retry budget may allow another pass
    Failed,
    /// The transaction was escalated to admin review
    Escalated,
}

/// One entry in a transaction's append-only recovery audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    /// When the attempt was made
    pub timestamp: DateTime<Utc>,

    /// Strategy used, e.g. "auto_recover" or an override action name
    pub strategy: String,

    /// What happened
    pub outcome: RecoveryOutcome,

    /// Free-text detail (error message, operator reason)
    pub detail: String,
}

/// On-chain evidence supplied with a force-complete override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// Reference to the observed source-chain transaction
    pub source_tx_ref: String,

    /// Reference to the observed destination-chain transaction
    pub dest_tx_ref: String,

    /// Attestations backing the manual completion
    pub attestations: Vec<Attestation>,
}

/// Bridge transaction record
///
/// `amount` is in the token's smallest indivisible units so conservation
/// checks are exact integer comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeTransaction {
    /// Unique identifier, assigned at creation, immutable
    pub id: String,

    /// Transfer direction
    pub direction: BridgeDirection,

    /// Amount in smallest units; immutable once confirmed on the source chain
    pub amount: u128,

    /// Sender address on the originating chain
    pub sender: String,

    /// Recipient address on the settling chain
    pub recipient: String,

    /// Current lifecycle status; governed by the state machine
    pub status: BridgeStatus,

    /// Observed source-chain transaction reference, set once
    pub source_tx_ref: Option<String>,

    /// Observed destination-chain transaction reference, set once
    pub dest_tx_ref: Option<String>,

    /// Validator attestations, de-duplicated by validator id
    pub signatures: Vec<Attestation>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Refreshed on every status transition
    pub last_updated_at: DateTime<Utc>,

    /// Per-transaction deadline in minutes
    pub timeout_minutes: i64,

    /// Automatic recovery attempts made so far
    pub retry_count: u32,

    /// Automatic recovery budget
    pub max_retries: u32,

    /// When the last automatic retry ran, for backoff
    pub last_retry_at: Option<DateTime<Utc>>,

    /// Append-only audit trail of recovery attempts
    pub recovery_attempts: Vec<RecoveryAttempt>,

    /// Set only via the OverrideGateway; suspends automatic recovery
    pub admin_override: bool,

    /// Operator annotation, settable only alongside an override
    pub admin_notes: Option<String>,

    /// Prevents duplicate notifications for the same stuck episode
    pub alert_sent: bool,

    /// Most recent failure detail, for the dashboard
    pub last_error: Option<String>,
}

impl BridgeTransaction {
    /// Create a new transaction in `Initiated` status
    pub fn new(
        direction: BridgeDirection,
        amount: u128,
        sender: String,
        recipient: String,
        timeout_minutes: i64,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            direction,
            amount,
            sender,
            recipient,
            status: BridgeStatus::Initiated,
            source_tx_ref: None,
            dest_tx_ref: None,
            signatures: Vec::new(),
            created_at: now,
            last_updated_at: now,
            timeout_minutes,
            retry_count: 0,
            max_retries,
            last_retry_at: None,
            recovery_attempts: Vec::new(),
            admin_override: false,
            admin_notes: None,
            alert_sent: false,
            last_error: None,
        }
    }

    /// Minutes spent in the current status
    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_updated_at).num_minutes()
    }

    /// Minutes remaining before the transaction is considered stuck;
    /// negative once overdue
    pub fn time_remaining(&self, now: DateTime<Utc>) -> i64 {
        self.timeout_minutes - self.age_minutes(now)
    }

    /// Whether the transaction has exceeded its timeout.
    ///
    /// Terminal states are never stuck, and the side states already belong
    /// to the monitoring loops.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || self.status.is_side_state() {
            return false;
        }
        self.age_minutes(now) > self.timeout_minutes
    }

    /// Whether the transaction sits inside its exponential backoff window.
    ///
    /// The window doubles with each retry: `base_backoff * 2^retry_count`.
    pub fn in_backoff_window(&self, now: DateTime<Utc>, base_backoff_secs: u64) -> bool {
        let last_retry = match self.last_retry_at {
            Some(t) => t,
            None => return false,
        };
        let exp = self.retry_count.min(16);
        let window_secs = base_backoff_secs.saturating_mul(1u64 << exp) as i64;
        now.signed_duration_since(last_retry) < Duration::seconds(window_secs)
    }

    /// Whether automatic retries remain
    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Count of distinct attesting validators
    pub fn distinct_signers(&self) -> usize {
        let mut ids: Vec<&str> = self.signatures.iter().map(|a| a.validator_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

impl fmt::Display for BridgeTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bridge [{}] {}, Status: {}, Amount: {}, Sender: {}, Recipient: {}",
            self.id, self.direction, self.status, self.amount, self.sender, self.recipient
        )
    }
}

/// Compact view of a transaction for the dashboard and stuck list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSummary {
    /// Transaction id
    pub id: String,
    /// Transfer direction
    pub direction: BridgeDirection,
    /// Amount in smallest units
    pub amount: u128,
    /// Current status
    pub status: BridgeStatus,
    /// Minutes since the last status change
    pub age_minutes: i64,
    /// Automatic retries made
    pub retry_count: u32,
    /// Whether an override has suspended automatic recovery
    pub admin_override: bool,
    /// Most recent failure detail
    pub last_error: Option<String>,
}

impl TransactionSummary {
    /// Build a summary from a full record
    pub fn from_transaction(tx: &BridgeTransaction, now: DateTime<Utc>) -> Self {
        Self {
            id: tx.id.clone(),
            direction: tx.direction,
            amount: tx.amount,
            status: tx.status,
            age_minutes: tx.age_minutes(now),
            retry_count: tx.retry_count,
            admin_override: tx.admin_override,
            last_error: tx.last_error.clone(),
        }
    }
}
