//! # Override Gateway
//!
//! The only path for human intervention. Operators act through a closed set
//! of override actions, each gated by an authority level and validated
//! against the state machine like any other transition. Every accepted
//! override lands in the transaction's audit trail with the operator's
//! identity and reason.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::alert::{Alert, AlertCondition, AlertDispatcher, AlertScope, AlertSeverity};
use crate::chain::{ChainClient, TxPayload};
use crate::error::{BridgeError, Result};
use crate::ledger::BridgeLedger;
use crate::types::{
    BridgeStatus, BridgeTransaction, ChainRole, Evidence, RecoveryAttempt, RecoveryOutcome,
    TxEvent,
};

/// Authority level of the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authority {
    /// Day-to-day operations: retry, cancel, park for review
    Supervisor,
    /// Everything a supervisor can do, plus force-complete
    Admin,
}

/// Operator override actions
///
/// The set is closed on purpose: an operator can only do what the state
/// machine already allows, never write an arbitrary status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OverrideAction {
    /// Reset the retry budget and hand the transaction back to automatic
    /// recovery
    Retry,
    /// Cancel the transfer and refund the sender if funds were locked
    Cancel,
    /// Mark the transfer completed on the strength of supplied on-chain
    /// evidence
    ForceComplete {
        /// Proof that both legs actually settled
        evidence: Evidence,
    },
    /// Park the transaction and suspend automatic recovery
    ManualReview,
}

impl OverrideAction {
    /// Short name for logs and audit entries
    pub fn name(&self) -> &'static str {
        match self {
            OverrideAction::Retry => "retry",
            OverrideAction::Cancel => "cancel",
            OverrideAction::ForceComplete { .. } => "force_complete",
            OverrideAction::ManualReview => "manual_review",
        }
    }

    /// Minimum authority required for this action
    pub fn required_authority(&self) -> Authority {
        match self {
            OverrideAction::ForceComplete { .. } => Authority::Admin,
            _ => Authority::Supervisor,
        }
    }
}

/// One override request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRequest {
    /// Target transaction id
    pub tx_id: String,

    /// What to do
    #[serde(flatten)]
    pub action: OverrideAction,

    /// Who is asking
    pub operator: String,

    /// Why; mandatory for the audit trail
    pub reason: String,
}

/// Result of an accepted override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideOutcome {
    /// The transaction after the override
    pub transaction: BridgeTransaction,

    /// Refund transaction reference, when a cancel triggered one
    pub refund_ref: Option<String>,
}

/// Gatekeeper for operator overrides
pub struct OverrideGateway {
    ledger: Arc<BridgeLedger>,
    source_client: Arc<dyn ChainClient>,
    dest_client: Arc<dyn ChainClient>,
    alerts: Arc<AlertDispatcher>,
}

impl OverrideGateway {
    /// Create a gateway over the ledger and both chain clients
    pub fn new(
        ledger: Arc<BridgeLedger>,
        source_client: Arc<dyn ChainClient>,
        dest_client: Arc<dyn ChainClient>,
        alerts: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            ledger,
            source_client,
            dest_client,
            alerts,
        }
    }

    fn client_for(&self, role: ChainRole) -> &Arc<dyn ChainClient> {
        match role {
            ChainRole::Source => &self.source_client,
            ChainRole::Destination => &self.dest_client,
        }
    }

    /// Execute an override on behalf of a caller with `authority`
    pub async fn execute(
        &self,
        request: OverrideRequest,
        authority: Authority,
    ) -> Result<OverrideOutcome> {
        if request.reason.trim().is_empty() {
            return Err(BridgeError::Validation(
                "an override requires a reason".to_string(),
            ));
        }
        let required = request.action.required_authority();
        if authority < required {
            warn!(
                tx_id = %request.tx_id,
                operator = %request.operator,
                action = request.action.name(),
                "Override denied for insufficient authority"
            );
            return Err(BridgeError::PermissionDenied(format!(
                "{} requires {:?} authority",
                request.action.name(),
                required
            )));
        }

        info!(
            tx_id = %request.tx_id,
            operator = %request.operator,
            action = request.action.name(),
            reason = %request.reason,
            "Override requested"
        );
        counter!("bridge_overrides_total", 1, "action" => request.action.name());

        match &request.action {
            OverrideAction::Retry => self.retry(&request).await,
            OverrideAction::Cancel => self.cancel(&request).await,
            OverrideAction::ForceComplete { evidence } => {
                self.force_complete(&request, evidence.clone()).await
            }
            OverrideAction::ManualReview => self.manual_review(&request).await,
        }
    }

    fn audit_entry(request: &OverrideRequest, outcome: RecoveryOutcome) -> RecoveryAttempt {
        RecoveryAttempt {
            timestamp: Utc::now(),
            strategy: format!("override_{}", request.action.name()),
            outcome,
            detail: format!("{} by {}", request.reason, request.operator),
        }
    }

    fn annotate(record: &mut BridgeTransaction, request: &OverrideRequest) {
        record.admin_notes = Some(format!(
            "{} by {}: {}",
            request.action.name(),
            request.operator,
            request.reason
        ));
    }

    /// Reset the retry budget and re-enable automatic recovery
    async fn retry(&self, request: &OverrideRequest) -> Result<OverrideOutcome> {
        let transaction = self
            .ledger
            .apply_event_with(&request.tx_id, TxEvent::OverrideRetry, |record| {
                record.retry_count = 0;
                record.last_retry_at = None;
                record.admin_override = false;
                Self::annotate(record, request);
                record
                    .recovery_attempts
                    .push(Self::audit_entry(request, RecoveryOutcome::Succeeded));
            })
            .await?;
        Ok(OverrideOutcome {
            transaction,
            refund_ref: None,
        })
    }

    /// Cancel the transfer; refund the sender when the origin leg settled.
    ///
    /// Cancellation is refused once the settlement leg has been submitted:
    /// at that point the transfer may complete on chain and cancelling would
    /// double-spend the reserve.
    async fn cancel(&self, request: &OverrideRequest) -> Result<OverrideOutcome> {
        let current = self.ledger.get(&request.tx_id).await?;
        // A submitted settlement may still land; cancelling past that point
        // would pay out twice. The dest_tx_ref check also catches records
        // that timed out after submission.
        if matches!(
            current.status,
            BridgeStatus::DestSubmitted | BridgeStatus::Completed
        ) || current.dest_tx_ref.is_some()
        {
            return Err(BridgeError::CancelNotPermitted(format!(
                "transaction {} already reached {}",
                current.id, current.status
            )));
        }

        // Re-cancelling an already cancelled record retries only the refund
        let cancelled = if current.status == BridgeStatus::Cancelled {
            current
        } else {
            let cancelled = self
                .ledger
                .apply_event_with(&request.tx_id, TxEvent::OverrideCancelled, |record| {
                    record.admin_override = true;
                    Self::annotate(record, request);
                    record
                        .recovery_attempts
                        .push(Self::audit_entry(request, RecoveryOutcome::Succeeded));
                })
                .await?;
            self.clear_transaction_alerts(&request.tx_id).await;
            cancelled
        };

        // Funds locked on the origin chain go back to the sender
        if cancelled.source_tx_ref.is_none() {
            return Ok(OverrideOutcome {
                transaction: cancelled,
                refund_ref: None,
            });
        }

        let origin = self.client_for(cancelled.direction.origin_role());
        let refund = origin
            .submit_transaction(TxPayload::Refund {
                tx_id: cancelled.id.clone(),
                recipient: cancelled.sender.clone(),
                amount: cancelled.amount,
            })
            .await;
        let refund_ref = match refund {
            Ok(refund_ref) => refund_ref,
            // The record stays Cancelled; a later cancel retries the refund
            Err(e) => {
                warn!(tx_id = %cancelled.id, error = %e, "Refund submission failed");
                let _ = self
                    .ledger
                    .update_with(&cancelled.id, |record| {
                        record.last_error = Some(format!("refund failed: {}", e));
                        Ok(())
                    })
                    .await;
                return Err(e);
            }
        };
        let transaction = self.ledger.apply_refund(&cancelled.id, &refund_ref).await?;
        info!(tx_id = %transaction.id, %refund_ref, "Cancelled transfer refunded");

        Ok(OverrideOutcome {
            transaction,
            refund_ref: Some(refund_ref),
        })
    }

    /// Complete a transfer on the strength of operator-supplied evidence
    async fn force_complete(
        &self,
        request: &OverrideRequest,
        evidence: Evidence,
    ) -> Result<OverrideOutcome> {
        if evidence.source_tx_ref.trim().is_empty()
            || evidence.dest_tx_ref.trim().is_empty()
            || evidence.attestations.is_empty()
        {
            return Err(BridgeError::EvidenceRequired(
                "force_complete needs both chain references and at least one attestation"
                    .to_string(),
            ));
        }

        let transaction = self
            .ledger
            .apply_event_with(&request.tx_id, TxEvent::OverrideForceCompleted, |record| {
                record
                    .source_tx_ref
                    .get_or_insert_with(|| evidence.source_tx_ref.clone());
                record
                    .dest_tx_ref
                    .get_or_insert_with(|| evidence.dest_tx_ref.clone());
                for attestation in &evidence.attestations {
                    record.signatures.push(attestation.clone());
                }
                record.admin_override = true;
                record.last_error = None;
                record.alert_sent = false;
                Self::annotate(record, request);
                record
                    .recovery_attempts
                    .push(Self::audit_entry(request, RecoveryOutcome::Succeeded));
            })
            .await?;
        self.clear_transaction_alerts(&request.tx_id).await;
        Ok(OverrideOutcome {
            transaction,
            refund_ref: None,
        })
    }

    /// Park the transaction for review and suspend automatic recovery
    async fn manual_review(&self, request: &OverrideRequest) -> Result<OverrideOutcome> {
        let transaction = self
            .ledger
            .apply_event_with(&request.tx_id, TxEvent::OverrideManualReview, |record| {
                record.admin_override = true;
                Self::annotate(record, request);
                record
                    .recovery_attempts
                    .push(Self::audit_entry(request, RecoveryOutcome::Escalated));
            })
            .await?;
        self.alerts
            .raise(Alert::new(
                AlertSeverity::Warning,
                AlertScope::Transaction(request.tx_id.clone()),
                AlertCondition::ManualReview,
                format!(
                    "transaction {} parked by {}: {}",
                    request.tx_id, request.operator, request.reason
                ),
            ))
            .await;
        Ok(OverrideOutcome {
            transaction,
            refund_ref: None,
        })
    }

    async fn clear_transaction_alerts(&self, id: &str) {
        let scope = AlertScope::Transaction(id.to_string());
        for condition in [
            AlertCondition::TransactionStuck,
            AlertCondition::RetriesExhausted,
            AlertCondition::DataMismatch,
            AlertCondition::ManualReview,
        ] {
            self.alerts.clear(&scope, condition).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::chain::{ChainEvent, TxStatus};
    use crate::ledger::MemoryStore;
    use crate::types::{Attestation, BridgeDirection};

    struct MockChain {
        name: String,
        refunds: AtomicUsize,
    }

    impl MockChain {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                refunds: AtomicUsize::new(0),
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
            if matches!(payload, TxPayload::Refund { .. }) {
                self.refunds.fetch_add(1, Ordering::SeqCst);
            }
            Ok(format!("0x{}_settled", self.name))
        }

        async fn get_transaction_status(&self, _tx_ref: &str) -> Result<TxStatus> {
            Ok(TxStatus::Confirmed)
        }

        async fn latest_block(&self) -> Result<u64> {
            Ok(10)
        }

        async fn reserve_balance(&self) -> Result<u128> {
            Ok(1_000_000)
        }
    }

    struct Harness {
        ledger: Arc<BridgeLedger>,
        source: Arc<MockChain>,
        gateway: OverrideGateway,
    }

    async fn setup() -> Harness {
        let ledger = Arc::new(
            BridgeLedger::open(Arc::new(MemoryStore::new()))
                .await
                .expect("open ledger"),
        );
        let source = Arc::new(MockChain::new("sourcechain"));
        let dest = Arc::new(MockChain::new("destchain"));
        let gateway = OverrideGateway::new(
            ledger.clone(),
            source.clone(),
            dest,
            Arc::new(AlertDispatcher::log_only()),
        );
        Harness {
            ledger,
            source,
            gateway,
        }
    }

    async fn insert_tx(ledger: &BridgeLedger, status: BridgeStatus) -> String {
        let mut tx = BridgeTransaction::new(
            BridgeDirection::SourceToDest,
            4_000,
            "0xSender".to_string(),
            "0xRecipient".to_string(),
            60,
            3,
        );
        tx.status = status;
        if status != BridgeStatus::Initiated {
            tx.source_tx_ref = Some("0xlock".to_string());
        }
        let id = tx.id.clone();
        ledger.insert(tx).await.expect("insert");
        id
    }

    fn request(id: &str, action: OverrideAction) -> OverrideRequest {
        OverrideRequest {
            tx_id: id.to_string(),
            action,
            operator: "ops@bridge".to_string(),
            reason: "test intervention".to_string(),
        }
    }

    fn evidence() -> Evidence {
        Evidence {
            source_tx_ref: "0xlock".to_string(),
            dest_tx_ref: "0xmint".to_string(),
            attestations: vec![Attestation {
                validator_id: "v1".to_string(),
                signature: "sig_v1".to_string(),
                signed_at: Utc::now(),
            }],
        }
    }

    #[tokio::test]
    async fn test_retry_resets_budget() {
        let h = setup().await;
        let id = insert_tx(&h.ledger, BridgeStatus::AdminReview).await;
        h.ledger
            .update_with(&id, |record| {
                record.retry_count = 3;
                record.admin_override = true;
                Ok(())
            })
            .await
            .expect("seed");

        let outcome = h
            .gateway
            .execute(request(&id, OverrideAction::Retry), Authority::Supervisor)
            .await
            .expect("retry");
        assert_eq!(outcome.transaction.status, BridgeStatus::Stuck);
        assert_eq!(outcome.transaction.retry_count, 0);
        assert!(!outcome.transaction.admin_override);
        assert_eq!(outcome.transaction.recovery_attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_refunds_locked_funds() {
        let h = setup().await;
        let id = insert_tx(&h.ledger, BridgeStatus::Stuck).await;

        let outcome = h
            .gateway
            .execute(request(&id, OverrideAction::Cancel), Authority::Supervisor)
            .await
            .expect("cancel");
        assert_eq!(outcome.transaction.status, BridgeStatus::Refunded);
        assert!(outcome.refund_ref.is_some());
        assert_eq!(h.source.refunds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_without_locked_funds_skips_refund() {
        let h = setup().await;
        let id = insert_tx(&h.ledger, BridgeStatus::Initiated).await;

        let outcome = h
            .gateway
            .execute(request(&id, OverrideAction::Cancel), Authority::Supervisor)
            .await
            .expect("cancel");
        assert_eq!(outcome.transaction.status, BridgeStatus::Cancelled);
        assert!(outcome.refund_ref.is_none());
        assert_eq!(h.source.refunds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_refused_after_submission() {
        let h = setup().await;
        let id = insert_tx(&h.ledger, BridgeStatus::DestSubmitted).await;

        let err = h
            .gateway
            .execute(request(&id, OverrideAction::Cancel), Authority::Admin)
            .await;
        assert!(matches!(err, Err(BridgeError::CancelNotPermitted(_))));
        let unchanged = h.ledger.get(&id).await.expect("get");
        assert_eq!(unchanged.status, BridgeStatus::DestSubmitted);
    }

    #[tokio::test]
    async fn test_force_complete_requires_admin() {
        let h = setup().await;
        let id = insert_tx(&h.ledger, BridgeStatus::AdminReview).await;

        let action = OverrideAction::ForceComplete {
            evidence: evidence(),
        };
        let err = h
            .gateway
            .execute(request(&id, action.clone()), Authority::Supervisor)
            .await;
        assert!(matches!(err, Err(BridgeError::PermissionDenied(_))));

        let outcome = h
            .gateway
            .execute(request(&id, action), Authority::Admin)
            .await
            .expect("force complete");
        assert_eq!(outcome.transaction.status, BridgeStatus::Completed);
        assert_eq!(outcome.transaction.dest_tx_ref.as_deref(), Some("0xmint"));
    }

    #[tokio::test]
    async fn test_force_complete_requires_evidence() {
        let h = setup().await;
        let id = insert_tx(&h.ledger, BridgeStatus::AdminReview).await;

        let action = OverrideAction::ForceComplete {
            evidence: Evidence {
                source_tx_ref: String::new(),
                dest_tx_ref: "0xmint".to_string(),
                attestations: Vec::new(),
            },
        };
        let err = h.gateway.execute(request(&id, action), Authority::Admin).await;
        assert!(matches!(err, Err(BridgeError::EvidenceRequired(_))));
    }

    #[tokio::test]
    async fn test_manual_review_suspends_recovery() {
        let h = setup().await;
        let id = insert_tx(&h.ledger, BridgeStatus::Stuck).await;

        let outcome = h
            .gateway
            .execute(
                request(&id, OverrideAction::ManualReview),
                Authority::Supervisor,
            )
            .await
            .expect("manual review");
        assert_eq!(outcome.transaction.status, BridgeStatus::AdminReview);
        assert!(outcome.transaction.admin_override);
    }

    #[tokio::test]
    async fn test_reason_is_mandatory() {
        let h = setup().await;
        let id = insert_tx(&h.ledger, BridgeStatus::Stuck).await;

        let mut req = request(&id, OverrideAction::Retry);
        req.reason = "  ".to_string();
        let err = h.gateway.execute(req, Authority::Admin).await;
        assert!(matches!(err, Err(BridgeError::Validation(_))));
    }

    #[tokio::test]
    async fn test_terminal_transactions_immutable() {
        let h = setup().await;
        let id = insert_tx(&h.ledger, BridgeStatus::Completed).await;

        let err = h
            .gateway
            .execute(request(&id, OverrideAction::ManualReview), Authority::Admin)
            .await;
        assert!(matches!(err, Err(BridgeError::InvalidTransition { .. })));
    }
}
