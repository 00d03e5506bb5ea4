//! Chain watcher
//!
//! One watcher runs per chain. It polls its [`ChainClient`] for confirmed
//! bridge events, correlates them to ledger records by the embedded
//! transaction id, and drives the corresponding state-machine transitions.
//! Watchers only confirm what they observe; deciding that a transaction is
//! stuck belongs to the stuck monitor, never to a watcher.

use std::cmp;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::watch;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::alert::{Alert, AlertCondition, AlertDispatcher, AlertScope, AlertSeverity};
use crate::config::WatcherConfig;
use crate::error::{BridgeError, Result};
use crate::ledger::BridgeLedger;
use crate::types::{BridgeTransaction, ChainRole, TxEvent};

use super::{ChainClient, ChainEvent};

/// Periodic poller for one chain
pub struct ChainWatcher {
    role: ChainRole,
    client: Arc<dyn ChainClient>,
    ledger: Arc<BridgeLedger>,
    alerts: Arc<AlertDispatcher>,
    config: WatcherConfig,
    cursor: AtomicU64,
    consecutive_failures: AtomicU32,
}

impl ChainWatcher {
    /// Create a watcher for the chain playing `role`
    pub fn new(
        role: ChainRole,
        client: Arc<dyn ChainClient>,
        ledger: Arc<BridgeLedger>,
        alerts: Arc<AlertDispatcher>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            role,
            client,
            ledger,
            alerts,
            config,
            cursor: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Chain this watcher observes
    pub fn chain_name(&self) -> &str {
        self.client.name()
    }

    /// Last block the watcher has fully processed
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Poll loop; runs until shutdown is signalled.
    ///
    /// A failed poll backs the watcher off exponentially, capped by
    /// configuration, on top of the regular poll interval. The cursor does
    /// not advance past a failed poll, so no confirmed event is skipped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(chain = self.chain_name(), role = ?self.role, "Chain watcher started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.poll_once().await {
                        Ok(processed) => {
                            self.consecutive_failures.store(0, Ordering::SeqCst);
                            if processed > 0 {
                                debug!(chain = self.chain_name(), processed, "Watcher processed events");
                            }
                        }
                        Err(e) => {
                            let failures =
                                self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                            let backoff = self.backoff_secs(failures);
                            warn!(
                                chain = self.chain_name(),
                                failures,
                                backoff_secs = backoff,
                                error = %e,
                                "Watcher poll failed, backing off"
                            );
                            counter!("bridge_watcher_poll_failures_total", 1,
                                "chain" => self.chain_name().to_string());
                            tokio::time::sleep(Duration::from_secs(backoff)).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(chain = self.chain_name(), "Chain watcher stopped");
    }

    fn backoff_secs(&self, failures: u32) -> u64 {
        let exp = failures.saturating_sub(1).min(16);
        cmp::min(
            self.config.rpc_backoff_secs.saturating_mul(1u64 << exp),
            self.config.rpc_backoff_max_secs,
        )
    }

    /// Single poll: fetch confirmed events past the cursor and process them.
    ///
    /// Event processing is idempotent, so re-observing an already applied
    /// event on the next poll is harmless.
    pub async fn poll_once(&self) -> Result<usize> {
        let since = self.cursor.load(Ordering::SeqCst);
        let events = timeout(
            Duration::from_secs(self.config.rpc_timeout_secs),
            self.client
                .get_confirmed_events(since, self.config.min_confirmations),
        )
        .await
        .map_err(|_| {
            BridgeError::Timeout(format!("{} event query timed out", self.chain_name()))
        })??;

        let mut max_block = since;
        let mut processed = 0;
        for event in events {
            max_block = cmp::max(max_block, event.block_number);
            self.process_event(event).await;
            processed += 1;
        }
        self.cursor.store(max_block, Ordering::SeqCst);
        Ok(processed)
    }

    /// Handle one confirmed event.
    ///
    /// Per-event problems are logged and never abort the poll; an event for
    /// an unknown transaction id is skipped so one bad payload cannot stall
    /// the watcher.
    async fn process_event(&self, event: ChainEvent) {
        let tx = match self.ledger.get(&event.tx_id).await {
            Ok(tx) => tx,
            Err(_) => {
                warn!(
                    chain = self.chain_name(),
                    tx_id = %event.tx_id,
                    tx_ref = %event.tx_ref,
                    "Observed event for unknown transaction, skipping"
                );
                return;
            }
        };

        let result = if event.kind.is_origin() {
            if tx.direction.origin_role() != self.role {
                debug!(tx_id = %event.tx_id, "Origin event on non-origin chain, skipping");
                return;
            }
            self.confirm_origin(&tx, &event).await
        } else {
            if tx.direction.settlement_role() != self.role {
                debug!(tx_id = %event.tx_id, "Settlement event on non-settlement chain, skipping");
                return;
            }
            self.confirm_settlement(&tx, &event).await
        };

        match result {
            Ok(()) => {}
            // A transition raced with another component (e.g. recovery
            // already moved the record on); the next poll resolves it.
            Err(BridgeError::InvalidTransition { from, event }) => {
                debug!(tx_id = %tx.id, %from, %event, "Observed event not applicable, skipping");
            }
            Err(e) => {
                warn!(tx_id = %tx.id, error = %e, "Failed to process observed event");
            }
        }
    }

    /// Divergence between an observed event and the ledger record, if any
    fn mismatch_detail(tx: &BridgeTransaction, event: &ChainEvent) -> Option<String> {
        if event.amount != tx.amount {
            Some(format!(
                "observed amount {} differs from recorded {}",
                event.amount, tx.amount
            ))
        } else if event.recipient != tx.recipient {
            Some(format!(
                "observed recipient {} differs from recorded {}",
                event.recipient, tx.recipient
            ))
        } else {
            None
        }
    }

    /// Route a mismatched observation to admin review with a critical alert.
    ///
    /// Mismatches are never auto-recovered; only an operator can resolve
    /// a record that contradicts the chain.
    async fn quarantine_mismatch(&self, tx: &BridgeTransaction, detail: String) -> Result<()> {
        warn!(tx_id = %tx.id, chain = self.chain_name(), %detail, "Chain data mismatch");
        counter!("bridge_mismatches_total", 1);
        self.ledger
            .apply_event_with(&tx.id, TxEvent::MismatchDetected, |record| {
                record.last_error = Some(detail.clone());
            })
            .await?;
        self.alerts
            .raise(Alert::new(
                AlertSeverity::Critical,
                AlertScope::Transaction(tx.id.clone()),
                AlertCondition::DataMismatch,
                format!("transaction {}: {}", tx.id, detail),
            ))
            .await;
        Ok(())
    }

    /// Confirm the origin leg (lock or burn) of a transfer.
    ///
    /// The observed amount and recipient must match the ledger record
    /// exactly before the transfer is allowed to progress.
    async fn confirm_origin(&self, tx: &BridgeTransaction, event: &ChainEvent) -> Result<()> {
        if let Some(detail) = Self::mismatch_detail(tx, event) {
            return self.quarantine_mismatch(tx, detail).await;
        }

        self.ledger.record_source_ref(&tx.id, &event.tx_ref).await?;
        self.ledger
            .apply_event_idempotent(&tx.id, TxEvent::SourceConfirmed, |_| {})
            .await?;
        counter!("bridge_origin_confirmations_total", 1,
            "chain" => self.chain_name().to_string());
        Ok(())
    }

    /// Confirm the settlement leg (mint or release) of a transfer.
    ///
    /// The settled amount and recipient are verified against the record the
    /// same way as the origin leg; a settlement that delivered the wrong
    /// value must reach an operator, not `Completed`.
    async fn confirm_settlement(&self, tx: &BridgeTransaction, event: &ChainEvent) -> Result<()> {
        if let Some(detail) = Self::mismatch_detail(tx, event) {
            return self.quarantine_mismatch(tx, detail).await;
        }

        self.ledger.record_dest_ref(&tx.id, &event.tx_ref).await?;
        self.ledger
            .apply_event_idempotent(&tx.id, TxEvent::DestConfirmed, |record| {
                record.alert_sent = false;
                record.last_error = None;
            })
            .await?;
        counter!("bridge_settlement_confirmations_total", 1,
            "chain" => self.chain_name().to_string());
        Ok(())
    }
}
