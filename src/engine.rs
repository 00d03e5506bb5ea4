//! # Bridge Engine
//!
//! Wires the ledger, watchers, quorum, monitors and gateway into one
//! runnable service. The engine owns transfer intake and the settlement
//! pipeline that moves confirmed transfers through quorum collection and
//! destination submission; everything downstream of submission is driven by
//! the watchers and the monitoring loops.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::alert::{AlertDispatcher, AlertSink};
use crate::chain::{ChainClient, ChainWatcher, TxPayload};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::gateway::{Authority, OverrideGateway, OverrideOutcome, OverrideRequest};
use crate::ledger::{BridgeLedger, BridgeStats, LedgerStore, RecoveryDashboard};
use crate::monitor::{HealthMonitor, HealthReport, RecoveryEngine, StuckMonitor};
use crate::quorum::{AttestationProvider, ValidatorQuorum};
use crate::types::{
    BridgeDirection, BridgeStatus, BridgeTransaction, ChainRole, TransactionSummary, TxEvent,
};

/// The assembled bridge service
pub struct BridgeEngine {
    config: BridgeConfig,
    ledger: Arc<BridgeLedger>,
    quorum: Arc<ValidatorQuorum>,
    source_client: Arc<dyn ChainClient>,
    dest_client: Arc<dyn ChainClient>,
    alerts: Arc<AlertDispatcher>,
    gateway: OverrideGateway,
    source_watcher: Arc<ChainWatcher>,
    dest_watcher: Arc<ChainWatcher>,
    stuck_monitor: Arc<StuckMonitor>,
    recovery: Arc<RecoveryEngine>,
    health: Arc<HealthMonitor>,
    pause_reason: RwLock<Option<String>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BridgeEngine {
    /// Assemble an engine from its parts.
    ///
    /// Nothing runs until [`start`](Self::start) is called.
    pub async fn new(
        config: BridgeConfig,
        store: Arc<dyn LedgerStore>,
        source_client: Arc<dyn ChainClient>,
        dest_client: Arc<dyn ChainClient>,
        validators: Vec<Arc<dyn AttestationProvider>>,
        sinks: Vec<Arc<dyn AlertSink>>,
    ) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(BridgeLedger::open(store).await?);
        let alerts = Arc::new(AlertDispatcher::new(sinks));
        let quorum = Arc::new(ValidatorQuorum::new(validators, config.quorum.clone()));

        let source_watcher = Arc::new(ChainWatcher::new(
            ChainRole::Source,
            source_client.clone(),
            ledger.clone(),
            alerts.clone(),
            config.watcher.clone(),
        ));
        let dest_watcher = Arc::new(ChainWatcher::new(
            ChainRole::Destination,
            dest_client.clone(),
            ledger.clone(),
            alerts.clone(),
            config.watcher.clone(),
        ));
        let stuck_monitor = Arc::new(StuckMonitor::new(
            ledger.clone(),
            alerts.clone(),
            config.monitor.clone(),
        ));
        let recovery = Arc::new(RecoveryEngine::new(
            ledger.clone(),
            quorum.clone(),
            source_client.clone(),
            dest_client.clone(),
            alerts.clone(),
            config.monitor.clone(),
        ));
        let health = Arc::new(HealthMonitor::new(
            ledger.clone(),
            source_client.clone(),
            dest_client.clone(),
            alerts.clone(),
            config.clone(),
        ));
        let gateway = OverrideGateway::new(
            ledger.clone(),
            source_client.clone(),
            dest_client.clone(),
            alerts.clone(),
        );
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            ledger,
            quorum,
            source_client,
            dest_client,
            alerts,
            gateway,
            source_watcher,
            dest_watcher,
            stuck_monitor,
            recovery,
            health,
            pause_reason: RwLock::new(None),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the watchers, monitors and the settlement loop
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Engine already started");
            return;
        }
        info!(
            source = self.source_client.name(),
            dest = self.dest_client.name(),
            validators = self.quorum.validator_count(),
            threshold = self.quorum.threshold(),
            "Bridge engine starting"
        );

        tasks.push(tokio::spawn(
            self.source_watcher.clone().run(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.dest_watcher.clone().run(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.stuck_monitor.clone().run(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.recovery.clone().run(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.health.clone().run(self.shutdown.subscribe()),
        ));

        let engine = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                engine.config.watcher.poll_interval_secs,
            ));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Settlement pipeline started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        engine.settle_pass().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Settlement pipeline stopped");
        }));
    }

    /// Signal all loops to stop and wait for them
    pub async fn stop(&self) {
        info!("Bridge engine stopping");
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        info!("Bridge engine stopped");
    }

    /// Record a new transfer and hand it to the lifecycle.
    ///
    /// Intake validates the amount bounds and refuses while the bridge is
    /// paused; everything after the record exists is driven by observation.
    pub async fn initiate_transfer(
        &self,
        direction: BridgeDirection,
        amount: u128,
        sender: String,
        recipient: String,
    ) -> Result<BridgeTransaction> {
        if let Some(reason) = self.pause_reason.read().await.clone() {
            return Err(BridgeError::Paused(reason));
        }
        if sender.trim().is_empty() || recipient.trim().is_empty() {
            return Err(BridgeError::Validation(
                "sender and recipient are required".to_string(),
            ));
        }
        if amount < self.config.transfer.min_transfer_amount
            || amount > self.config.transfer.max_transfer_amount
        {
            return Err(BridgeError::Validation(format!(
                "amount {} outside bounds [{}, {}]",
                amount,
                self.config.transfer.min_transfer_amount,
                self.config.transfer.max_transfer_amount
            )));
        }

        let tx = BridgeTransaction::new(
            direction,
            amount,
            sender,
            recipient,
            self.config.transfer.default_timeout_minutes,
            self.config.transfer.default_max_retries,
        );
        self.ledger.insert(tx.clone()).await?;
        info!(tx_id = %tx.id, %direction, amount, "Transfer initiated");
        counter!("bridge_transfers_initiated_total", 1, "direction" => direction.to_string());
        Ok(tx)
    }

    /// Refuse new transfers until resumed; in-flight transfers continue
    pub async fn pause(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "Bridge intake paused");
        *self.pause_reason.write().await = Some(reason);
    }

    /// Re-open transfer intake
    pub async fn resume(&self) {
        info!("Bridge intake resumed");
        *self.pause_reason.write().await = None;
    }

    /// Whether intake is currently paused
    pub async fn is_paused(&self) -> bool {
        self.pause_reason.read().await.is_some()
    }

    /// One settlement pass: push every confirmed transfer as far through
    /// quorum and submission as it will go. Returns how many transactions
    /// made progress.
    pub async fn settle_pass(&self) -> usize {
        let mut advanced = 0;
        for status in [
            BridgeStatus::SourceConfirmed,
            BridgeStatus::SignaturesPending,
            BridgeStatus::SignaturesCollected,
        ] {
            for id in self.ledger.ids_in_status(status).await {
                if self.advance_settlement(&id).await {
                    advanced += 1;
                }
            }
        }
        advanced
    }

    /// Drive one transaction through as many settlement stages as possible
    async fn advance_settlement(&self, id: &str) -> bool {
        let mut progressed = false;
        loop {
            let tx = match self.ledger.get(id).await {
                Ok(tx) => tx,
                Err(_) => return progressed,
            };
            match tx.status {
                BridgeStatus::SourceConfirmed => {
                    if self
                        .ledger
                        .apply_event(id, TxEvent::QuorumStarted)
                        .await
                        .is_err()
                    {
                        return progressed;
                    }
                    progressed = true;
                }
                BridgeStatus::SignaturesPending => match self.quorum.collect(&tx).await {
                    Ok(attestations) => {
                        let result = self
                            .ledger
                            .apply_event_with(id, TxEvent::QuorumReached, |record| {
                                record.signatures = attestations;
                                record.last_error = None;
                            })
                            .await;
                        if result.is_err() {
                            return progressed;
                        }
                        progressed = true;
                    }
                    Err(e) => {
                        // Leave the record in SignaturesPending; the next
                        // pass retries and the stuck monitor bounds the wait
                        warn!(tx_id = %id, error = %e, "Quorum collection failed");
                        let _ = self
                            .ledger
                            .update_with(id, |record| {
                                record.last_error = Some(e.to_string());
                                Ok(())
                            })
                            .await;
                        return progressed;
                    }
                },
                BridgeStatus::SignaturesCollected => {
                    return self.submit_settlement(&tx).await || progressed;
                }
                _ => return progressed,
            }
        }
    }

    /// Submit the mint or release for a transfer holding quorum
    async fn submit_settlement(&self, tx: &BridgeTransaction) -> bool {
        let client = match tx.direction.settlement_role() {
            ChainRole::Source => &self.source_client,
            ChainRole::Destination => &self.dest_client,
        };
        let payload = match tx.direction {
            BridgeDirection::SourceToDest => TxPayload::Mint {
                tx_id: tx.id.clone(),
                recipient: tx.recipient.clone(),
                amount: tx.amount,
                attestations: tx.signatures.clone(),
            },
            BridgeDirection::DestToSource => TxPayload::Release {
                tx_id: tx.id.clone(),
                recipient: tx.recipient.clone(),
                amount: tx.amount,
                attestations: tx.signatures.clone(),
            },
        };

        // A cancel accepted since the scan snapshot must win; nothing is
        // submitted unless the record still holds quorum untouched.
        match self.ledger.get(&tx.id).await {
            Ok(current)
                if current.status == BridgeStatus::SignaturesCollected
                    && !current.admin_override => {}
            Ok(current) => {
                debug!(tx_id = %tx.id, status = %current.status, "Settlement pre-empted, not submitting");
                return false;
            }
            Err(_) => return false,
        }

        match client.submit_transaction(payload).await {
            Ok(dest_ref) => {
                if let Err(e) = self.ledger.record_dest_ref(&tx.id, &dest_ref).await {
                    warn!(tx_id = %tx.id, error = %e, "Could not record settlement reference");
                    return false;
                }
                let applied = self
                    .ledger
                    .apply_event(&tx.id, TxEvent::DestSubmitted)
                    .await;
                if applied.is_ok() {
                    debug!(tx_id = %tx.id, %dest_ref, "Settlement submitted");
                    counter!("bridge_settlements_submitted_total", 1);
                }
                applied.is_ok()
            }
            Err(e) => {
                warn!(tx_id = %tx.id, error = %e, "Settlement submission failed");
                let _ = self
                    .ledger
                    .update_with(&tx.id, |record| {
                        record.last_error = Some(e.to_string());
                        Ok(())
                    })
                    .await;
                false
            }
        }
    }

    /// Execute an operator override
    pub async fn execute_override(
        &self,
        request: OverrideRequest,
        authority: Authority,
    ) -> Result<OverrideOutcome> {
        self.gateway.execute(request, authority).await
    }

    /// Authority granted to a bearer token, if any
    pub fn authority_for_token(&self, token: &str) -> Option<Authority> {
        if self.config.auth.admin_tokens.iter().any(|t| t == token) {
            Some(Authority::Admin)
        } else if self
            .config
            .auth
            .supervisor_tokens
            .iter()
            .any(|t| t == token)
        {
            Some(Authority::Supervisor)
        } else {
            None
        }
    }

    /// Fetch one transaction
    pub async fn transaction(&self, id: &str) -> Result<BridgeTransaction> {
        self.ledger.get(id).await
    }

    /// Compact views of the stuck, recovering and parked transactions
    pub async fn stuck_transactions(&self) -> Vec<TransactionSummary> {
        let now = chrono::Utc::now();
        self.ledger
            .stuck_transactions()
            .await
            .iter()
            .map(|tx| TransactionSummary::from_transaction(tx, now))
            .collect()
    }

    /// Operator recovery dashboard
    pub async fn dashboard(&self) -> RecoveryDashboard {
        self.ledger.recovery_dashboard().await
    }

    /// Ledger counters
    pub async fn stats(&self) -> BridgeStats {
        self.ledger.stats().await
    }

    /// Most recent health report, running the checks now if none exists yet
    pub async fn health_report(&self) -> HealthReport {
        match self.health.latest_report().await {
            Some(report) => report,
            None => self.health.check_once().await,
        }
    }

    /// Shared ledger handle
    pub fn ledger(&self) -> &Arc<BridgeLedger> {
        &self.ledger
    }

    /// Watcher observing the source chain
    pub fn source_watcher(&self) -> &Arc<ChainWatcher> {
        &self.source_watcher
    }

    /// Watcher observing the destination chain
    pub fn dest_watcher(&self) -> &Arc<ChainWatcher> {
        &self.dest_watcher
    }

    /// The stuck-transaction scanner
    pub fn stuck_monitor(&self) -> &Arc<StuckMonitor> {
        &self.stuck_monitor
    }

    /// The automatic recovery loop
    pub fn recovery_engine(&self) -> &Arc<RecoveryEngine> {
        &self.recovery
    }

    /// Shared alert dispatcher handle
    pub fn alerts(&self) -> &Arc<AlertDispatcher> {
        &self.alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex as TokioMutex;

    use crate::alert::LogSink;
    use crate::chain::{ChainEvent, TxStatus};
    use crate::ledger::MemoryStore;
    use crate::types::Attestation;

    struct MockChain {
        name: String,
        submitted: TokioMutex<Vec<String>>,
    }

    impl MockChain {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                submitted: TokioMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        fn name(&self) -> &str {
            &self.name
        }

        async fn get_confirmed_events(
            &self,
            _since_block: u64,
            _min_confirmations: u64,
        ) -> Result<Vec<ChainEvent>> {
            Ok(Vec::new())
        }

        async fn submit_transaction(&self, payload: TxPayload) -> Result<String> {
            let dest_ref = format!("0x{}_{}", self.name, payload.tx_id());
            self.submitted.lock().await.push(dest_ref.clone());
            Ok(dest_ref)
        }

        async fn get_transaction_status(&self, _tx_ref: &str) -> Result<TxStatus> {
            Ok(TxStatus::Confirmed)
        }

        async fn latest_block(&self) -> Result<u64> {
            Ok(1)
        }

        async fn reserve_balance(&self) -> Result<u128> {
            Ok(1_000_000)
        }
    }

    struct MockValidator(String);

    #[async_trait]
    impl AttestationProvider for MockValidator {
        fn validator_id(&self) -> &str {
            &self.0
        }

        async fn request_attestation(&self, _tx: &BridgeTransaction) -> Result<Attestation> {
            Ok(Attestation {
                validator_id: self.0.clone(),
                signature: format!("sig_{}", self.0),
                signed_at: Utc::now(),
            })
        }
    }

    async fn test_engine() -> Arc<BridgeEngine> {
        let mut config = BridgeConfig::default();
        config.transfer.min_transfer_amount = 10;
        config.transfer.max_transfer_amount = 100_000;
        config.quorum.threshold = 2;
        let engine = BridgeEngine::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MockChain::new("sourcechain")),
            Arc::new(MockChain::new("destchain")),
            vec![
                Arc::new(MockValidator("v1".to_string())),
                Arc::new(MockValidator("v2".to_string())),
                Arc::new(MockValidator("v3".to_string())),
            ],
            vec![Arc::new(LogSink)],
        )
        .await
        .expect("engine");
        Arc::new(engine)
    }

    #[tokio::test]
    async fn test_intake_validation() {
        let engine = test_engine().await;

        let tx = engine
            .initiate_transfer(
                BridgeDirection::SourceToDest,
                500,
                "0xS".to_string(),
                "0xR".to_string(),
            )
            .await
            .expect("intake");
        assert_eq!(tx.status, BridgeStatus::Initiated);

        // Below the floor
        assert!(matches!(
            engine
                .initiate_transfer(
                    BridgeDirection::SourceToDest,
                    1,
                    "0xS".to_string(),
                    "0xR".to_string()
                )
                .await,
            Err(BridgeError::Validation(_))
        ));

        // Missing recipient
        assert!(engine
            .initiate_transfer(
                BridgeDirection::SourceToDest,
                500,
                "0xS".to_string(),
                String::new()
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_pause_blocks_intake_only() {
        let engine = test_engine().await;
        engine.pause("maintenance window").await;
        assert!(engine.is_paused().await);

        let err = engine
            .initiate_transfer(
                BridgeDirection::SourceToDest,
                500,
                "0xS".to_string(),
                "0xR".to_string(),
            )
            .await;
        assert!(matches!(err, Err(BridgeError::Paused(_))));

        engine.resume().await;
        assert!(engine
            .initiate_transfer(
                BridgeDirection::SourceToDest,
                500,
                "0xS".to_string(),
                "0xR".to_string()
            )
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_settlement_pipeline() {
        let engine = test_engine().await;
        let tx = engine
            .initiate_transfer(
                BridgeDirection::SourceToDest,
                500,
                "0xS".to_string(),
                "0xR".to_string(),
            )
            .await
            .expect("intake");

        // Simulate the source watcher confirming the lock
        engine
            .ledger()
            .record_source_ref(&tx.id, "0xlock")
            .await
            .expect("source ref");
        engine
            .ledger()
            .apply_event(&tx.id, TxEvent::SourceConfirmed)
            .await
            .expect("confirm");

        assert_eq!(engine.settle_pass().await, 1);

        let settled = engine.transaction(&tx.id).await.expect("get");
        assert_eq!(settled.status, BridgeStatus::DestSubmitted);
        assert!(settled.dest_tx_ref.is_some());
        assert_eq!(settled.distinct_signers(), 2);
    }

    struct CancellingValidator {
        id: String,
        ledger: std::sync::OnceLock<Arc<BridgeLedger>>,
    }

    #[async_trait]
    impl AttestationProvider for CancellingValidator {
        fn validator_id(&self) -> &str {
            &self.id
        }

        async fn request_attestation(&self, tx: &BridgeTransaction) -> Result<Attestation> {
            // An operator cancel lands mid-collection
            if let Some(ledger) = self.ledger.get() {
                let _ = ledger.apply_event(&tx.id, TxEvent::OverrideCancelled).await;
            }
            Ok(Attestation {
                validator_id: self.id.clone(),
                signature: format!("sig_{}", self.id),
                signed_at: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn test_cancel_during_quorum_blocks_settlement() {
        let canceller = Arc::new(CancellingValidator {
            id: "v1".to_string(),
            ledger: std::sync::OnceLock::new(),
        });
        let mut config = BridgeConfig::default();
        config.transfer.min_transfer_amount = 10;
        config.transfer.max_transfer_amount = 100_000;
        config.quorum.threshold = 2;
        let dest = Arc::new(MockChain::new("destchain"));
        let engine = Arc::new(
            BridgeEngine::new(
                config,
                Arc::new(MemoryStore::new()),
                Arc::new(MockChain::new("sourcechain")),
                dest.clone(),
                vec![canceller.clone(), Arc::new(MockValidator("v2".to_string()))],
                vec![Arc::new(LogSink)],
            )
            .await
            .expect("engine"),
        );
        let _ = canceller.ledger.set(engine.ledger().clone());

        let tx = engine
            .initiate_transfer(
                BridgeDirection::SourceToDest,
                500,
                "0xS".to_string(),
                "0xR".to_string(),
            )
            .await
            .expect("intake");
        engine
            .ledger()
            .record_source_ref(&tx.id, "0xlock")
            .await
            .expect("source ref");
        engine
            .ledger()
            .apply_event(&tx.id, TxEvent::SourceConfirmed)
            .await
            .expect("confirm");

        engine.settle_pass().await;

        // The cancel wins: no mint reaches the destination chain
        let cancelled = engine.transaction(&tx.id).await.expect("get");
        assert_eq!(cancelled.status, BridgeStatus::Cancelled);
        assert!(cancelled.dest_tx_ref.is_none());
        assert!(dest.submitted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_token_authority_mapping() {
        let mut config = BridgeConfig::default();
        config.auth.supervisor_tokens = vec!["sup-token".to_string()];
        config.auth.admin_tokens = vec!["adm-token".to_string()];
        let engine = BridgeEngine::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MockChain::new("sourcechain")),
            Arc::new(MockChain::new("destchain")),
            vec![
                Arc::new(MockValidator("v1".to_string())),
                Arc::new(MockValidator("v2".to_string())),
                Arc::new(MockValidator("v3".to_string())),
            ],
            vec![Arc::new(LogSink)],
        )
        .await
        .expect("engine");

        assert_eq!(
            engine.authority_for_token("sup-token"),
            Some(Authority::Supervisor)
        );
        assert_eq!(
            engine.authority_for_token("adm-token"),
            Some(Authority::Admin)
        );
        assert_eq!(engine.authority_for_token("nope"), None);
    }
}
