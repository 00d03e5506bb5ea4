//! Automatic recovery
//!
//! Retries stuck transactions within a bounded budget. Each pass claims a
//! stuck transaction, replays the unfinished part of its pipeline (origin
//! check, quorum, settlement submission) and records the outcome in the
//! transaction's audit trail. A transaction whose budget is spent escalates
//! to admin review instead of retrying forever; a transaction under an
//! operator override is never touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::alert::{Alert, AlertCondition, AlertDispatcher, AlertScope, AlertSeverity};
use crate::chain::{ChainClient, TxPayload, TxStatus};
use crate::config::MonitorConfig;
use crate::error::{BridgeError, Result};
use crate::ledger::BridgeLedger;
use crate::quorum::ValidatorQuorum;
use crate::types::{
    Attestation, BridgeDirection, BridgeStatus, BridgeTransaction, ChainRole, RecoveryAttempt,
    RecoveryOutcome, TxEvent,
};

/// Result of replaying a transaction's settlement pipeline
struct Settlement {
    dest_ref: String,
    attestations: Vec<Attestation>,
}

/// Periodic retry loop for stuck transactions
pub struct RecoveryEngine {
    ledger: Arc<BridgeLedger>,
    quorum: Arc<ValidatorQuorum>,
    source_client: Arc<dyn ChainClient>,
    dest_client: Arc<dyn ChainClient>,
    alerts: Arc<AlertDispatcher>,
    config: MonitorConfig,
}

impl RecoveryEngine {
    /// Create a recovery engine over the given ledger and chain clients
    pub fn new(
        ledger: Arc<BridgeLedger>,
        quorum: Arc<ValidatorQuorum>,
        source_client: Arc<dyn ChainClient>,
        dest_client: Arc<dyn ChainClient>,
        alerts: Arc<AlertDispatcher>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            ledger,
            quorum,
            source_client,
            dest_client,
            alerts,
            config,
        }
    }

    fn client_for(&self, role: ChainRole) -> &Arc<dyn ChainClient> {
        match role {
            ChainRole::Source => &self.source_client,
            ChainRole::Destination => &self.dest_client,
        }
    }

    /// Recovery loop; runs until shutdown is signalled
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.recovery_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Recovery engine started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_pass().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Recovery engine stopped");
    }

    /// Single recovery pass; returns how many recovery attempts were made.
    ///
    /// Eligibility is re-checked under the record lock after the snapshot,
    /// so a transaction resolved by another component in the meantime is
    /// simply skipped.
    pub async fn run_pass(&self) -> usize {
        let now = Utc::now();
        let ids = self.ledger.ids_in_status(BridgeStatus::Stuck).await;
        let mut attempts = 0;

        for id in ids {
            let tx = match self.ledger.get(&id).await {
                Ok(tx) => tx,
                Err(_) => continue,
            };
            if tx.status != BridgeStatus::Stuck {
                continue;
            }
            if tx.admin_override {
                debug!(tx_id = %id, "Recovery suspended by operator override");
                continue;
            }
            if !tx.retries_remaining() {
                self.escalate(&tx).await;
                continue;
            }
            if tx.in_backoff_window(now, self.config.base_backoff_secs) {
                debug!(tx_id = %id, retry_count = tx.retry_count, "Inside backoff window, waiting");
                continue;
            }
            self.attempt(&id).await;
            attempts += 1;
        }
        attempts
    }

    /// Park a transaction whose retry budget is spent
    async fn escalate(&self, tx: &BridgeTransaction) {
        let detail = format!(
            "automatic recovery exhausted after {} of {} attempts",
            tx.retry_count, tx.max_retries
        );
        let result = self
            .ledger
            .apply_event_with(&tx.id, TxEvent::RetriesExhausted, |record| {
                record.last_error = Some(detail.clone());
                record.recovery_attempts.push(RecoveryAttempt {
                    timestamp: Utc::now(),
                    strategy: "auto_recover".to_string(),
                    outcome: RecoveryOutcome::Escalated,
                    detail: detail.clone(),
                });
            })
            .await;
        if result.is_err() {
            return;
        }

        warn!(tx_id = %tx.id, "Retry budget exhausted, escalated to admin review");
        counter!("bridge_recovery_escalations_total", 1);
        self.alerts
            .raise(Alert::new(
                AlertSeverity::Critical,
                AlertScope::Transaction(tx.id.clone()),
                AlertCondition::RetriesExhausted,
                format!("transaction {}: {}", tx.id, detail),
            ))
            .await;
    }

    /// One recovery attempt for one transaction
    async fn attempt(&self, id: &str) {
        // Claiming the attempt moves the record to Recovering and spends one
        // retry; a concurrent claim loses the transition and backs out here.
        let tx = match self
            .ledger
            .apply_event_with(id, TxEvent::RecoveryStarted, |record| {
                record.retry_count += 1;
                record.last_retry_at = Some(Utc::now());
            })
            .await
        {
            Ok(tx) => tx,
            Err(_) => return,
        };

        info!(
            tx_id = %id,
            attempt = tx.retry_count,
            budget = tx.max_retries,
            direction = %tx.direction,
            "Recovery attempt started"
        );
        counter!("bridge_recovery_attempts_total", 1);

        match self.replay_settlement(&tx).await {
            Ok(settlement) => self.complete(id, settlement).await,
            Err(e) if matches!(e, BridgeError::DataMismatch(_)) => {
                warn!(tx_id = %id, error = %e, "Recovery found mismatched chain data");
                let _ = self
                    .ledger
                    .apply_event_with(id, TxEvent::MismatchDetected, |record| {
                        record.last_error = Some(e.to_string());
                        record.recovery_attempts.push(RecoveryAttempt {
                            timestamp: Utc::now(),
                            strategy: "auto_recover".to_string(),
                            outcome: RecoveryOutcome::Escalated,
                            detail: e.to_string(),
                        });
                    })
                    .await;
                self.alerts
                    .raise(Alert::new(
                        AlertSeverity::Critical,
                        AlertScope::Transaction(id.to_string()),
                        AlertCondition::DataMismatch,
                        format!("transaction {}: {}", id, e),
                    ))
                    .await;
            }
            Err(e) => {
                warn!(tx_id = %id, error = %e, "Recovery attempt failed");
                counter!("bridge_recovery_failures_total", 1);
                // The last attempt in the budget escalates right away instead
                // of parking the record Stuck for one more pass.
                let exhausted = tx.retry_count >= tx.max_retries;
                let event = if exhausted {
                    TxEvent::RetriesExhausted
                } else {
                    TxEvent::RecoveryFailed
                };
                let result = self
                    .ledger
                    .apply_event_with(id, event, |record| {
                        record.last_error = Some(e.to_string());
                        record.recovery_attempts.push(RecoveryAttempt {
                            timestamp: Utc::now(),
                            strategy: "auto_recover".to_string(),
                            outcome: RecoveryOutcome::Failed,
                            detail: e.to_string(),
                        });
                    })
                    .await;
                if exhausted && result.is_ok() {
                    warn!(tx_id = %id, "Retry budget exhausted, escalated to admin review");
                    counter!("bridge_recovery_escalations_total", 1);
                    self.alerts
                        .raise(Alert::new(
                            AlertSeverity::Critical,
                            AlertScope::Transaction(id.to_string()),
                            AlertCondition::RetriesExhausted,
                            format!(
                                "transaction {}: recovery exhausted after {} of {} attempts: {}",
                                id, tx.retry_count, tx.max_retries, e
                            ),
                        ))
                        .await;
                }
            }
        }
    }

    /// Mark a recovered transaction completed and clear its stuck alert
    async fn complete(&self, id: &str, settlement: Settlement) {
        if let Err(e) = self.ledger.record_dest_ref(id, &settlement.dest_ref).await {
            warn!(tx_id = %id, error = %e, "Could not record settlement reference");
            let _ = self
                .ledger
                .apply_event_with(id, TxEvent::RecoveryFailed, |record| {
                    record.last_error = Some(e.to_string());
                })
                .await;
            return;
        }

        let detail = format!("settled in {}", settlement.dest_ref);
        let result = self
            .ledger
            .apply_event_with(id, TxEvent::RecoverySucceeded, |record| {
                if !settlement.attestations.is_empty() {
                    record.signatures = settlement.attestations.clone();
                }
                record.last_error = None;
                record.alert_sent = false;
                record.recovery_attempts.push(RecoveryAttempt {
                    timestamp: Utc::now(),
                    strategy: "auto_recover".to_string(),
                    outcome: RecoveryOutcome::Succeeded,
                    detail: detail.clone(),
                });
            })
            .await;
        if result.is_ok() {
            info!(tx_id = %id, %detail, "Recovery succeeded");
            counter!("bridge_recovery_successes_total", 1);
            self.alerts
                .clear(
                    &AlertScope::Transaction(id.to_string()),
                    AlertCondition::TransactionStuck,
                )
                .await;
        }
    }

    /// Replay the unfinished part of the settlement pipeline.
    ///
    /// Checks any previous submission first, verifies the origin leg, then
    /// re-collects quorum if the held attestations are insufficient and
    /// re-submits the settlement transaction.
    async fn replay_settlement(&self, tx: &BridgeTransaction) -> Result<Settlement> {
        let settlement_client = self.client_for(tx.direction.settlement_role());

        // A previous submission may have landed after we gave up on it
        if let Some(dest_ref) = &tx.dest_tx_ref {
            match settlement_client.get_transaction_status(dest_ref).await? {
                TxStatus::Confirmed => {
                    return Ok(Settlement {
                        dest_ref: dest_ref.clone(),
                        attestations: Vec::new(),
                    })
                }
                TxStatus::Pending => {
                    return Err(BridgeError::Timeout(format!(
                        "settlement {} still pending confirmation",
                        dest_ref
                    )))
                }
                TxStatus::Failed => {
                    debug!(tx_id = %tx.id, %dest_ref, "Previous settlement failed, re-submitting");
                }
            }
        }

        // The origin transfer must still hold before value is re-issued
        let origin_client = self.client_for(tx.direction.origin_role());
        match &tx.source_tx_ref {
            None => {
                return Err(BridgeError::Validation(format!(
                    "transaction {} has no confirmed origin transfer to recover",
                    tx.id
                )))
            }
            Some(source_ref) => match origin_client.get_transaction_status(source_ref).await? {
                TxStatus::Confirmed => {}
                TxStatus::Pending => {
                    return Err(BridgeError::Timeout(format!(
                        "origin transfer {} no longer final",
                        source_ref
                    )))
                }
                TxStatus::Failed => {
                    return Err(BridgeError::DataMismatch(format!(
                        "origin transfer {} reverted after confirmation",
                        source_ref
                    )))
                }
            },
        }

        let attestations = if tx.distinct_signers() >= self.quorum.threshold() {
            tx.signatures.clone()
        } else {
            self.quorum.collect(tx).await?
        };

        let payload = match tx.direction {
            BridgeDirection::SourceToDest => TxPayload::Mint {
                tx_id: tx.id.clone(),
                recipient: tx.recipient.clone(),
                amount: tx.amount,
                attestations: attestations.clone(),
            },
            BridgeDirection::DestToSource => TxPayload::Release {
                tx_id: tx.id.clone(),
                recipient: tx.recipient.clone(),
                amount: tx.amount,
                attestations: attestations.clone(),
            },
        };

        // An override may have landed while quorum was collecting; the claim
        // must still hold before any value moves.
        let current = self.ledger.get(&tx.id).await?;
        if current.status != BridgeStatus::Recovering || current.admin_override {
            return Err(BridgeError::Validation(format!(
                "transaction {} pre-empted during recovery, now {}",
                tx.id, current.status
            )));
        }

        let dest_ref = settlement_client.submit_transaction(payload).await?;
        match settlement_client.get_transaction_status(&dest_ref).await? {
            TxStatus::Failed => Err(BridgeError::Rpc(format!(
                "re-submitted settlement {} reverted",
                dest_ref
            ))),
            _ => Ok(Settlement {
                dest_ref,
                attestations,
            }),
        }
    }
}
