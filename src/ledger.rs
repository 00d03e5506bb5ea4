//! # Bridge Ledger
//!
//! Durable system of record for bridge transactions. The ledger owns an
//! in-memory map backed by a write-through [`LedgerStore`]; every mutation
//! persists before it becomes visible, so a restart resumes from the last
//! persisted state.
//!
//! Concurrency is per transaction id: each record has its own lock, taken
//! for the duration of a read-modify-write, so recovery of one transaction
//! never blocks intake or settlement of another. Scans snapshot the id set
//! first and then lock one record at a time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::types::{
    next_status, refund_transition, BridgeDirection, BridgeStatus, BridgeTransaction,
    TransactionSummary, TxEvent,
};

/// Persistence backend for the ledger
///
/// The ledger writes through on every mutation and reads the full set back
/// on open. Implementations must make `persist` durable before returning.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Load every persisted transaction
    async fn load_all(&self) -> Result<Vec<BridgeTransaction>>;

    /// Persist one transaction, replacing any previous version
    async fn persist(&self, tx: &BridgeTransaction) -> Result<()>;
}

/// Volatile store for tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, BridgeTransaction>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<BridgeTransaction>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn persist(&self, tx: &BridgeTransaction) -> Result<()> {
        self.records
            .write()
            .await
            .insert(tx.id.clone(), tx.clone());
        Ok(())
    }
}

/// JSON-file store
///
/// Keeps the full transaction map in one JSON file and rewrites it on every
/// persist, via a temp file and rename so a crash mid-write never leaves a
/// torn file behind.
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<HashMap<String, BridgeTransaction>>,
}

impl JsonFileStore {
    /// Open a store at `path`, loading any existing file
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    async fn flush(&self, records: &HashMap<String, BridgeTransaction>) -> Result<()> {
        let raw = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<BridgeTransaction>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn persist(&self, tx: &BridgeTransaction) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(tx.id.clone(), tx.clone());
        self.flush(&records).await
    }
}

/// Aggregate counters for the dashboard and health report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeStats {
    /// All transactions known to the ledger
    pub total: usize,
    /// Forward-path transactions still in flight
    pub active: usize,
    /// Transactions currently stuck or recovering
    pub stuck: usize,
    /// Transactions parked for an operator
    pub admin_review: usize,
    /// Successfully settled transfers
    pub completed: usize,
    /// Cancelled transfers
    pub cancelled: usize,
    /// Refunded transfers
    pub refunded: usize,
}

/// Per-direction stuck counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectionBreakdown {
    /// Stuck transactions heading source-to-dest
    pub source_to_dest: usize,
    /// Stuck transactions heading dest-to-source
    pub dest_to_source: usize,
}

/// Operator view of the recovery backlog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryDashboard {
    /// Transactions in Stuck or Recovering
    pub total_stuck: usize,
    /// Stuck counts per direction
    pub stuck_by_direction: DirectionBreakdown,
    /// Transactions awaiting an operator decision
    pub requiring_admin_review: usize,
    /// Sum of stuck amounts in smallest units
    pub total_stuck_value: u128,
    /// Compact views of every stuck, recovering or parked transaction
    pub transactions: Vec<TransactionSummary>,
}

/// Durable transaction ledger with per-id locking
pub struct BridgeLedger {
    store: Arc<dyn LedgerStore>,
    cache: RwLock<HashMap<String, BridgeTransaction>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BridgeLedger {
    /// Open the ledger, loading all persisted transactions into the cache
    pub async fn open(store: Arc<dyn LedgerStore>) -> Result<Self> {
        let loaded = store.load_all().await?;
        let count = loaded.len();
        let cache = loaded.into_iter().map(|tx| (tx.id.clone(), tx)).collect();
        if count > 0 {
            info!(count, "Ledger loaded persisted transactions");
        }
        Ok(Self {
            store,
            cache: RwLock::new(cache),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Lock handle for one transaction id
    async fn id_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Insert a freshly created transaction
    pub async fn insert(&self, tx: BridgeTransaction) -> Result<()> {
        let lock = self.id_lock(&tx.id).await;
        let _guard = lock.lock().await;

        if self.cache.read().await.contains_key(&tx.id) {
            return Err(BridgeError::Validation(format!(
                "transaction {} already exists",
                tx.id
            )));
        }
        self.store.persist(&tx).await?;
        debug!(tx_id = %tx.id, direction = %tx.direction, amount = tx.amount, "Transaction recorded");
        let mut cache = self.cache.write().await;
        cache.insert(tx.id.clone(), tx);
        gauge!("bridge_ledger_transactions", cache.len() as f64);
        Ok(())
    }

    /// Fetch a transaction by id
    pub async fn get(&self, id: &str) -> Result<BridgeTransaction> {
        self.cache
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))
    }

    /// Apply a state-machine event, persisting the result.
    ///
    /// The transition is validated against the state machine; an event not in
    /// the table leaves the record untouched and returns
    /// `BridgeError::InvalidTransition`.
    pub async fn apply_event(&self, id: &str, event: TxEvent) -> Result<BridgeTransaction> {
        self.apply_event_with(id, event, |_| {}).await
    }

    /// Apply a state-machine event together with an extra mutation, under one
    /// lock and one persist.
    ///
    /// The mutation runs only after the transition is accepted, so a rejected
    /// event changes nothing.
    pub async fn apply_event_with<F>(
        &self,
        id: &str,
        event: TxEvent,
        mutate: F,
    ) -> Result<BridgeTransaction>
    where
        F: FnOnce(&mut BridgeTransaction),
    {
        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        let mut tx = self.get(id).await?;
        let from = tx.status;
        tx.status = next_status(from, event)?;
        tx.last_updated_at = Utc::now();
        mutate(&mut tx);
        self.store.persist(&tx).await?;

        info!(tx_id = %id, %from, to = %tx.status, %event, "Transaction transitioned");
        counter!("bridge_transitions_total", 1, "event" => event.to_string());
        if tx.status == BridgeStatus::AdminReview {
            warn!(tx_id = %id, "Transaction parked for admin review");
        }

        self.cache.write().await.insert(id.to_string(), tx.clone());
        Ok(tx)
    }

    /// Apply an event only if its target state has not already been reached.
    ///
    /// Watchers re-observe confirmed events on every poll; this makes the
    /// second and later observations no-ops instead of transition errors.
    /// Returns `None` when the record was already in the event's target state.
    pub async fn apply_event_idempotent<F>(
        &self,
        id: &str,
        event: TxEvent,
        mutate: F,
    ) -> Result<Option<BridgeTransaction>>
    where
        F: FnOnce(&mut BridgeTransaction),
    {
        {
            let cache = self.cache.read().await;
            let tx = cache
                .get(id)
                .ok_or_else(|| BridgeError::NotFound(id.to_string()))?;
            if tx.status == event.canonical_target() {
                debug!(tx_id = %id, %event, "Event already applied, skipping");
                return Ok(None);
            }
        }
        self.apply_event_with(id, event, mutate).await.map(Some)
    }

    /// Refund transition: Cancelled -> Refunded, the only path to Refunded
    pub async fn apply_refund(&self, id: &str, refund_ref: &str) -> Result<BridgeTransaction> {
        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        let mut tx = self.get(id).await?;
        let from = tx.status;
        tx.status = refund_transition(from)?;
        tx.last_updated_at = Utc::now();
        tx.last_error = None;
        tx.admin_notes = Some(format!("refunded in {}", refund_ref));
        self.store.persist(&tx).await?;

        info!(tx_id = %id, %refund_ref, "Transaction refunded");
        counter!("bridge_refunds_total", 1);
        self.cache.write().await.insert(id.to_string(), tx.clone());
        Ok(tx)
    }

    /// Mutate a record without a status transition (retry bookkeeping,
    /// alert flags, audit entries), persisting the result
    pub async fn update_with<F>(&self, id: &str, mutate: F) -> Result<BridgeTransaction>
    where
        F: FnOnce(&mut BridgeTransaction) -> Result<()>,
    {
        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        let mut tx = self.get(id).await?;
        mutate(&mut tx)?;
        self.store.persist(&tx).await?;
        self.cache.write().await.insert(id.to_string(), tx.clone());
        Ok(tx)
    }

    /// Record the observed source-chain transaction reference, set once.
    ///
    /// A second observation with the same reference is a no-op; a different
    /// reference for the same id is a mismatch.
    pub async fn record_source_ref(&self, id: &str, tx_ref: &str) -> Result<()> {
        self.record_ref(id, tx_ref, true).await
    }

    /// Record the destination-chain transaction reference, set once
    pub async fn record_dest_ref(&self, id: &str, tx_ref: &str) -> Result<()> {
        self.record_ref(id, tx_ref, false).await
    }

    async fn record_ref(&self, id: &str, tx_ref: &str, source: bool) -> Result<()> {
        self.update_with(id, |tx| {
            // A cancelled or refunded record accepts no further chain legs
            if tx.status.is_terminal() && tx.status != BridgeStatus::Completed {
                return Err(BridgeError::Validation(format!(
                    "tx {} is {}; chain reference {} rejected",
                    id, tx.status, tx_ref
                )));
            }
            let slot = if source {
                &mut tx.source_tx_ref
            } else {
                &mut tx.dest_tx_ref
            };
            match slot {
                Some(existing) if existing != tx_ref => Err(BridgeError::DataMismatch(format!(
                    "tx {} already references {}, observed {}",
                    id, existing, tx_ref
                ))),
                Some(_) => Ok(()),
                None => {
                    *slot = Some(tx_ref.to_string());
                    Ok(())
                }
            }
        })
        .await
        .map(|_| ())
    }

    /// Snapshot of every transaction
    pub async fn snapshot(&self) -> Vec<BridgeTransaction> {
        self.cache.read().await.values().cloned().collect()
    }

    /// Ids of transactions currently in `status`
    pub async fn ids_in_status(&self, status: BridgeStatus) -> Vec<String> {
        self.cache
            .read()
            .await
            .values()
            .filter(|tx| tx.status == status)
            .map(|tx| tx.id.clone())
            .collect()
    }

    /// Stuck, recovering and parked transactions
    pub async fn stuck_transactions(&self) -> Vec<BridgeTransaction> {
        self.cache
            .read()
            .await
            .values()
            .filter(|tx| tx.status.is_side_state())
            .cloned()
            .collect()
    }

    /// Aggregate counters
    pub async fn stats(&self) -> BridgeStats {
        let cache = self.cache.read().await;
        let mut stats = BridgeStats {
            total: cache.len(),
            ..Default::default()
        };
        for tx in cache.values() {
            match tx.status {
                BridgeStatus::Completed => stats.completed += 1,
                BridgeStatus::Cancelled => stats.cancelled += 1,
                BridgeStatus::Refunded => stats.refunded += 1,
                BridgeStatus::Stuck | BridgeStatus::Recovering => stats.stuck += 1,
                BridgeStatus::AdminReview => stats.admin_review += 1,
                _ => stats.active += 1,
            }
        }
        stats
    }

    /// Operator dashboard of the recovery backlog
    pub async fn recovery_dashboard(&self) -> RecoveryDashboard {
        let now = Utc::now();
        let mut dashboard = RecoveryDashboard {
            total_stuck: 0,
            stuck_by_direction: DirectionBreakdown::default(),
            requiring_admin_review: 0,
            total_stuck_value: 0,
            transactions: Vec::new(),
        };
        for tx in self.cache.read().await.values() {
            match tx.status {
                BridgeStatus::Stuck | BridgeStatus::Recovering => {
                    dashboard.total_stuck += 1;
                    dashboard.total_stuck_value =
                        dashboard.total_stuck_value.saturating_add(tx.amount);
                    match tx.direction {
                        BridgeDirection::SourceToDest => {
                            dashboard.stuck_by_direction.source_to_dest += 1
                        }
                        BridgeDirection::DestToSource => {
                            dashboard.stuck_by_direction.dest_to_source += 1
                        }
                    }
                }
                BridgeStatus::AdminReview => dashboard.requiring_admin_review += 1,
                _ => continue,
            }
            dashboard
                .transactions
                .push(TransactionSummary::from_transaction(tx, now));
        }
        dashboard
            .transactions
            .sort_by(|a, b| b.age_minutes.cmp(&a.age_minutes));
        dashboard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BridgeDirection;

    async fn test_ledger() -> BridgeLedger {
        BridgeLedger::open(Arc::new(MemoryStore::new()))
            .await
            .expect("open ledger")
    }

    fn test_tx() -> BridgeTransaction {
        BridgeTransaction::new(
            BridgeDirection::SourceToDest,
            5_000,
            "0xSender".to_string(),
            "0xRecipient".to_string(),
            60,
            3,
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let ledger = test_ledger().await;
        let tx = test_tx();
        let id = tx.id.clone();

        ledger.insert(tx).await.expect("insert");
        let fetched = ledger.get(&id).await.expect("get");
        assert_eq!(fetched.status, BridgeStatus::Initiated);

        // Duplicate ids are rejected
        let mut dup = test_tx();
        dup.id = id.clone();
        assert!(ledger.insert(dup).await.is_err());

        assert!(matches!(
            ledger.get("missing").await,
            Err(BridgeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_governed_transition() {
        let ledger = test_ledger().await;
        let tx = test_tx();
        let id = tx.id.clone();
        ledger.insert(tx).await.expect("insert");

        let updated = ledger
            .apply_event(&id, TxEvent::SourceConfirmed)
            .await
            .expect("transition");
        assert_eq!(updated.status, BridgeStatus::SourceConfirmed);

        // Skipping a stage is rejected and leaves the record untouched
        let err = ledger.apply_event(&id, TxEvent::DestConfirmed).await;
        assert!(matches!(err, Err(BridgeError::InvalidTransition { .. })));
        let current = ledger.get(&id).await.expect("get");
        assert_eq!(current.status, BridgeStatus::SourceConfirmed);
    }

    #[tokio::test]
    async fn test_idempotent_apply() {
        let ledger = test_ledger().await;
        let tx = test_tx();
        let id = tx.id.clone();
        ledger.insert(tx).await.expect("insert");

        let first = ledger
            .apply_event_idempotent(&id, TxEvent::SourceConfirmed, |_| {})
            .await
            .expect("first apply");
        assert!(first.is_some());

        // Re-observing the same event is a silent no-op
        let second = ledger
            .apply_event_idempotent(&id, TxEvent::SourceConfirmed, |_| {})
            .await
            .expect("second apply");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_set_once_references() {
        let ledger = test_ledger().await;
        let tx = test_tx();
        let id = tx.id.clone();
        ledger.insert(tx).await.expect("insert");

        ledger.record_source_ref(&id, "0xabc").await.expect("set");
        // Same reference again is fine
        ledger.record_source_ref(&id, "0xabc").await.expect("re-set");
        // A different reference is a mismatch
        assert!(matches!(
            ledger.record_source_ref(&id, "0xdef").await,
            Err(BridgeError::DataMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_record_rejects_chain_refs() {
        let ledger = test_ledger().await;
        let tx = test_tx();
        let id = tx.id.clone();
        ledger.insert(tx).await.expect("insert");
        ledger
            .apply_event(&id, TxEvent::OverrideCancelled)
            .await
            .expect("cancel");

        assert!(matches!(
            ledger.record_dest_ref(&id, "0xmint").await,
            Err(BridgeError::Validation(_))
        ));
        let unchanged = ledger.get(&id).await.expect("get");
        assert!(unchanged.dest_tx_ref.is_none());
    }

    #[tokio::test]
    async fn test_refund_path() {
        let ledger = test_ledger().await;
        let tx = test_tx();
        let id = tx.id.clone();
        ledger.insert(tx).await.expect("insert");

        // Refund requires Cancelled first
        assert!(ledger.apply_refund(&id, "0xrefund").await.is_err());

        ledger
            .apply_event(&id, TxEvent::OverrideCancelled)
            .await
            .expect("cancel");
        let refunded = ledger.apply_refund(&id, "0xrefund").await.expect("refund");
        assert_eq!(refunded.status, BridgeStatus::Refunded);
    }

    #[tokio::test]
    async fn test_durability_across_reopen() {
        let store = Arc::new(MemoryStore::new());
        let tx = test_tx();
        let id = tx.id.clone();

        {
            let ledger = BridgeLedger::open(store.clone()).await.expect("open");
            ledger.insert(tx).await.expect("insert");
            ledger
                .apply_event(&id, TxEvent::SourceConfirmed)
                .await
                .expect("transition");
        }

        // A fresh ledger over the same store resumes from persisted state
        let reopened = BridgeLedger::open(store).await.expect("reopen");
        let fetched = reopened.get(&id).await.expect("get");
        assert_eq!(fetched.status, BridgeStatus::SourceConfirmed);
    }

    #[tokio::test]
    async fn test_dashboard_and_stats() {
        let ledger = test_ledger().await;

        let stuck = {
            let mut tx = test_tx();
            tx.status = BridgeStatus::Stuck;
            tx
        };
        let review = {
            let mut tx = test_tx();
            tx.direction = BridgeDirection::DestToSource;
            tx.status = BridgeStatus::AdminReview;
            tx
        };
        let done = {
            let mut tx = test_tx();
            tx.status = BridgeStatus::Completed;
            tx
        };
        for tx in [stuck, review, done] {
            ledger.insert(tx).await.expect("insert");
        }

        let dashboard = ledger.recovery_dashboard().await;
        assert_eq!(dashboard.total_stuck, 1);
        assert_eq!(dashboard.stuck_by_direction.source_to_dest, 1);
        assert_eq!(dashboard.requiring_admin_review, 1);
        assert_eq!(dashboard.total_stuck_value, 5_000);
        assert_eq!(dashboard.transactions.len(), 2);

        let stats = ledger.stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.stuck, 1);
        assert_eq!(stats.admin_review, 1);
        assert_eq!(stats.completed, 1);
    }
}
