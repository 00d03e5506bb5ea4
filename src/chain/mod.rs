//! # Chain Interface Module
//!
//! Abstraction over the two chains the bridge spans. The engine never talks
//! to a node directly; everything goes through the [`ChainClient`] trait so
//! concrete RPC adapters (and test mocks) plug in at this seam.

pub mod watcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Attestation;

pub use watcher::ChainWatcher;

/// Kind of bridge event observed on a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Tokens locked on the source chain (source-to-dest origin)
    Lock,
    /// Wrapped tokens burned on the destination chain (dest-to-source origin)
    Burn,
    /// Wrapped tokens minted on the destination chain (settlement)
    Mint,
    /// Locked tokens released on the source chain (settlement)
    Release,
}

impl EventKind {
    /// Whether this event originates a transfer (as opposed to settling one)
    pub fn is_origin(&self) -> bool {
        matches!(self, EventKind::Lock | EventKind::Burn)
    }
}

/// A confirmed bridge event read from a chain
///
/// `tx_id` is the bridge transaction id the contract embeds in the event
/// payload; it is how a watcher correlates chain activity back to the
/// ledger record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Bridge transaction id carried in the event payload
    pub tx_id: String,

    /// Chain-native reference to the transaction that emitted the event
    pub tx_ref: String,

    /// What happened
    pub kind: EventKind,

    /// Amount in smallest units
    pub amount: u128,

    /// Sender address recorded in the event
    pub sender: String,

    /// Recipient address recorded in the event
    pub recipient: String,

    /// Block the event landed in
    pub block_number: u64,
}

/// Settlement payload submitted to a chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxPayload {
    /// Mint wrapped tokens on the destination chain
    Mint {
        /// Bridge transaction id
        tx_id: String,
        /// Recipient of the minted tokens
        recipient: String,
        /// Amount in smallest units
        amount: u128,
        /// Quorum attestations authorizing the mint
        attestations: Vec<Attestation>,
    },
    /// Release locked tokens on the source chain
    Release {
        /// Bridge transaction id
        tx_id: String,
        /// Recipient of the released tokens
        recipient: String,
        /// Amount in smallest units
        amount: u128,
        /// Quorum attestations authorizing the release
        attestations: Vec<Attestation>,
    },
    /// Return locked funds to the original sender after a cancel
    Refund {
        /// Bridge transaction id
        tx_id: String,
        /// Original sender receiving the refund
        recipient: String,
        /// Amount in smallest units
        amount: u128,
    },
}

impl TxPayload {
    /// Bridge transaction id the payload settles
    pub fn tx_id(&self) -> &str {
        match self {
            TxPayload::Mint { tx_id, .. }
            | TxPayload::Release { tx_id, .. }
            | TxPayload::Refund { tx_id, .. } => tx_id,
        }
    }
}

/// Status of a submitted chain transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Not yet at the required confirmation depth
    Pending,
    /// Confirmed at the required depth
    Confirmed,
    /// Reverted or dropped
    Failed,
}

/// Client for a single chain
///
/// Implementations wrap the chain's RPC endpoint. Every call is fallible;
/// transient failures surface as `BridgeError::Rpc` or `BridgeError::Timeout`
/// so the callers' retry logic can classify them.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Human-readable chain name, used in logs and alerts
    fn name(&self) -> &str;

    /// Bridge events confirmed at `min_confirmations` depth, strictly after
    /// `since_block`
    async fn get_confirmed_events(
        &self,
        since_block: u64,
        min_confirmations: u64,
    ) -> Result<Vec<ChainEvent>>;

    /// Submit a settlement transaction; returns the chain-native reference
    async fn submit_transaction(&self, payload: TxPayload) -> Result<String>;

    /// Status of a previously submitted transaction
    async fn get_transaction_status(&self, tx_ref: &str) -> Result<TxStatus>;

    /// Height of the latest block, used as a liveness probe
    async fn latest_block(&self) -> Result<u64>;

    /// Balance of the bridge reserve on this chain, in smallest units
    async fn reserve_balance(&self) -> Result<u128>;
}
