//! # Alert Dispatch
//!
//! Alert types and the de-duplicating dispatcher. Alerts are keyed by
//! (scope, condition): while a key is active, repeated raises are dropped,
//! and the key must be cleared before the same alert can fire again. Sink
//! failures are logged and never block the raising component.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational
    Info,
    /// Needs attention soon
    Warning,
    /// Needs attention now
    Critical,
}

/// What the alert is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum AlertScope {
    /// A single bridge transaction
    Transaction(String),
    /// One of the two chains
    Chain(String),
    /// The bridge as a whole
    System,
}

/// The condition that fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    /// A transaction exceeded its timeout
    TransactionStuck,
    /// Automatic recovery exhausted its retry budget
    RetriesExhausted,
    /// Observed chain data contradicts the ledger
    DataMismatch,
    /// An operator parked the transaction for review
    ManualReview,
    /// Too many transactions stuck at once
    StuckBacklog,
    /// A chain stopped answering RPC calls
    ChainUnreachable,
    /// Bridge reserves fell below the liquidity floor
    LowLiquidity,
}

/// A single alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Severity level
    pub severity: AlertSeverity,

    /// What the alert is about
    pub scope: AlertScope,

    /// The condition that fired
    pub condition: AlertCondition,

    /// Human-readable detail
    pub message: String,

    /// When the alert was raised
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Build an alert timestamped now
    pub fn new(
        severity: AlertSeverity,
        scope: AlertScope,
        condition: AlertCondition,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            scope,
            condition,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Delivery channel for alerts
#[async_trait]
pub trait AlertSink: Send + Sync + 'static {
    /// Channel name, used in logs
    fn name(&self) -> &str;

    /// Deliver one alert
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Sink that writes alerts to the log
///
/// Always configured as the channel of last resort so alerts are never
/// silently lost when external channels are down.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        match alert.severity {
            AlertSeverity::Info => {
                info!(scope = ?alert.scope, condition = ?alert.condition, "ALERT: {}", alert.message)
            }
            AlertSeverity::Warning => {
                warn!(scope = ?alert.scope, condition = ?alert.condition, "ALERT: {}", alert.message)
            }
            AlertSeverity::Critical => {
                error!(scope = ?alert.scope, condition = ?alert.condition, "ALERT: {}", alert.message)
            }
        }
        Ok(())
    }
}

/// Fan-out dispatcher with per-key de-duplication
pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
    active: Mutex<HashSet<(AlertScope, AlertCondition)>>,
}

impl AlertDispatcher {
    /// Create a dispatcher over the given sinks
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self {
            sinks,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Dispatcher with only the log sink
    pub fn log_only() -> Self {
        Self::new(vec![Arc::new(LogSink)])
    }

    /// Raise an alert unless its (scope, condition) key is already active.
    ///
    /// Returns whether the alert was actually dispatched.
    pub async fn raise(&self, alert: Alert) -> bool {
        let key = (alert.scope.clone(), alert.condition);
        {
            let mut active = self.active.lock().await;
            if !active.insert(key) {
                debug!(scope = ?alert.scope, condition = ?alert.condition, "Alert suppressed, already active");
                return false;
            }
        }

        counter!("bridge_alerts_total", 1);
        for sink in &self.sinks {
            if let Err(e) = sink.send(&alert).await {
                error!(sink = sink.name(), error = %e, "Alert delivery failed");
            }
        }
        true
    }

    /// Clear an active key so the condition can alert again if it recurs
    pub async fn clear(&self, scope: &AlertScope, condition: AlertCondition) {
        let mut active = self.active.lock().await;
        if active.remove(&(scope.clone(), condition)) {
            debug!(?scope, ?condition, "Alert condition cleared");
        }
    }

    /// Whether an alert key is currently active
    pub async fn is_active(&self, scope: &AlertScope, condition: AlertCondition) -> bool {
        self.active
            .lock()
            .await
            .contains(&(scope.clone(), condition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send(&self, _alert: &Alert) -> Result<()> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn stuck_alert(id: &str) -> Alert {
        Alert::new(
            AlertSeverity::Warning,
            AlertScope::Transaction(id.to_string()),
            AlertCondition::TransactionStuck,
            format!("transaction {} stuck", id),
        )
    }

    #[tokio::test]
    async fn test_deduplication() {
        let sink = Arc::new(CountingSink {
            delivered: AtomicUsize::new(0),
        });
        let dispatcher = AlertDispatcher::new(vec![sink.clone()]);

        assert!(dispatcher.raise(stuck_alert("tx1")).await);
        assert!(!dispatcher.raise(stuck_alert("tx1")).await);
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);

        // A different transaction is a different key
        assert!(dispatcher.raise(stuck_alert("tx2")).await);
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_rearms() {
        let sink = Arc::new(CountingSink {
            delivered: AtomicUsize::new(0),
        });
        let dispatcher = AlertDispatcher::new(vec![sink.clone()]);

        assert!(dispatcher.raise(stuck_alert("tx1")).await);
        let scope = AlertScope::Transaction("tx1".to_string());
        dispatcher
            .clear(&scope, AlertCondition::TransactionStuck)
            .await;
        assert!(!dispatcher.is_active(&scope, AlertCondition::TransactionStuck).await);

        assert!(dispatcher.raise(stuck_alert("tx1")).await);
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_conditions_independent() {
        let dispatcher = AlertDispatcher::log_only();
        let scope = AlertScope::Transaction("tx1".to_string());

        assert!(dispatcher.raise(stuck_alert("tx1")).await);
        // Same scope, different condition still fires
        assert!(
            dispatcher
                .raise(Alert::new(
                    AlertSeverity::Critical,
                    scope.clone(),
                    AlertCondition::RetriesExhausted,
                    "retry budget spent",
                ))
                .await
        );
    }
}
