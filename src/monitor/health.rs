//! System health monitoring
//!
//! Periodic checks on the system-level signals a single transaction cannot
//! tell you about: the size of the stuck backlog, whether both chains still
//! answer, and whether the bridge reserves can cover the settlement volume
//! in flight. Findings are published as a report for the API and raised as
//! system alerts through the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::gauge;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::alert::{Alert, AlertCondition, AlertDispatcher, AlertScope, AlertSeverity};
use crate::chain::ChainClient;
use crate::config::BridgeConfig;
use crate::ledger::{BridgeLedger, BridgeStats};
use crate::types::ChainRole;

/// Probe result for one chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainHealth {
    /// Chain name
    pub name: String,
    /// Whether the chain answered within the probe timeout
    pub reachable: bool,
    /// Latest block height, when reachable
    pub latest_block: Option<u64>,
    /// Bridge reserve balance in smallest units, when reachable
    pub reserve: Option<u128>,
}

/// Snapshot of overall bridge health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// True when no issue was found
    pub healthy: bool,
    /// When the checks ran
    pub generated_at: DateTime<Utc>,
    /// Ledger counters at check time
    pub stats: BridgeStats,
    /// Per-chain probe results
    pub chains: Vec<ChainHealth>,
    /// Problems found by this check
    pub issues: Vec<String>,
    /// Suggested operator actions
    pub recommendations: Vec<String>,
}

/// Periodic system-level health checker
pub struct HealthMonitor {
    ledger: Arc<BridgeLedger>,
    source_client: Arc<dyn ChainClient>,
    dest_client: Arc<dyn ChainClient>,
    alerts: Arc<AlertDispatcher>,
    config: BridgeConfig,
    latest: RwLock<Option<HealthReport>>,
}

impl HealthMonitor {
    /// Create a health monitor over the ledger and both chain clients
    pub fn new(
        ledger: Arc<BridgeLedger>,
        source_client: Arc<dyn ChainClient>,
        dest_client: Arc<dyn ChainClient>,
        alerts: Arc<AlertDispatcher>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            ledger,
            source_client,
            dest_client,
            alerts,
            config,
            latest: RwLock::new(None),
        }
    }

    /// Most recent report, if a check has run
    pub async fn latest_report(&self) -> Option<HealthReport> {
        self.latest.read().await.clone()
    }

    /// Check loop; runs until shutdown is signalled
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.monitor.health_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Health monitor started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.check_once().await;
                    if !report.healthy {
                        warn!(issues = report.issues.len(), "Health check found issues");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Health monitor stopped");
    }

    /// Run all checks once and publish the report
    pub async fn check_once(&self) -> HealthReport {
        let stats = self.ledger.stats().await;
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        self.check_backlog(&stats, &mut issues).await;

        let mut chains = Vec::new();
        for (role, client) in [
            (ChainRole::Source, &self.source_client),
            (ChainRole::Destination, &self.dest_client),
        ] {
            let health = self
                .check_chain(role, client, &mut issues, &mut recommendations)
                .await;
            chains.push(health);
        }

        if stats.admin_review > 0 {
            recommendations.push(format!(
                "{} transaction(s) awaiting operator review",
                stats.admin_review
            ));
        }

        gauge!("bridge_health_issues", issues.len() as f64);
        let report = HealthReport {
            healthy: issues.is_empty(),
            generated_at: Utc::now(),
            stats,
            chains,
            issues,
            recommendations,
        };
        *self.latest.write().await = Some(report.clone());
        report
    }

    /// Alert when the stuck backlog exceeds the configured ceiling.
    ///
    /// A backlog exactly at the ceiling is still tolerated; the alert fires
    /// only once the count goes beyond it.
    async fn check_backlog(&self, stats: &BridgeStats, issues: &mut Vec<String>) {
        let ceiling = self.config.alerts.max_stuck_transactions;
        let backlog = stats.stuck + stats.admin_review;
        if backlog > ceiling {
            let message = format!(
                "{} transactions stuck or awaiting review, ceiling is {}",
                backlog, ceiling
            );
            issues.push(message.clone());
            self.alerts
                .raise(Alert::new(
                    AlertSeverity::Critical,
                    AlertScope::System,
                    AlertCondition::StuckBacklog,
                    message,
                ))
                .await;
        } else {
            self.alerts
                .clear(&AlertScope::System, AlertCondition::StuckBacklog)
                .await;
        }
    }

    /// Probe one chain for connectivity and reserve coverage
    async fn check_chain(
        &self,
        role: ChainRole,
        client: &Arc<dyn ChainClient>,
        issues: &mut Vec<String>,
        recommendations: &mut Vec<String>,
    ) -> ChainHealth {
        let name = client.name().to_string();
        let scope = AlertScope::Chain(name.clone());
        let probe_timeout = Duration::from_secs(self.config.watcher.rpc_timeout_secs);

        let latest_block = match timeout(probe_timeout, client.latest_block()).await {
            Ok(Ok(block)) => Some(block),
            Ok(Err(e)) => {
                debug!(chain = %name, error = %e, "Block height probe failed");
                None
            }
            Err(_) => None,
        };

        if latest_block.is_none() {
            issues.push(format!("chain {} is unreachable", name));
            self.alerts
                .raise(Alert::new(
                    AlertSeverity::Critical,
                    scope.clone(),
                    AlertCondition::ChainUnreachable,
                    format!("chain {} stopped answering RPC calls", name),
                ))
                .await;
            return ChainHealth {
                name,
                reachable: false,
                latest_block: None,
                reserve: None,
            };
        }
        self.alerts
            .clear(&scope, AlertCondition::ChainUnreachable)
            .await;

        let reserve = match timeout(probe_timeout, client.reserve_balance()).await {
            Ok(Ok(balance)) => Some(balance),
            _ => None,
        };

        if let Some(reserve) = reserve {
            let pending = self.pending_settlement_value(role).await;
            let floor =
                (pending as f64 * self.config.alerts.critical_liquidity_ratio) as u128;
            if pending > 0 && reserve < floor {
                let message = format!(
                    "reserve on {} is {}, below the floor of {} for {} in flight",
                    name, reserve, floor, pending
                );
                issues.push(message.clone());
                recommendations.push(format!("top up the bridge reserve on {}", name));
                self.alerts
                    .raise(Alert::new(
                        AlertSeverity::Critical,
                        scope.clone(),
                        AlertCondition::LowLiquidity,
                        message,
                    ))
                    .await;
            } else {
                self.alerts
                    .clear(&scope, AlertCondition::LowLiquidity)
                    .await;
            }
        }

        ChainHealth {
            name,
            reachable: true,
            latest_block,
            reserve,
        }
    }

    /// Value of unsettled transfers that will settle on the chain in `role`
    async fn pending_settlement_value(&self, role: ChainRole) -> u128 {
        self.ledger
            .snapshot()
            .await
            .iter()
            .filter(|tx| {
                !tx.status.is_terminal() && tx.direction.settlement_role() == role
            })
            .fold(0u128, |acc, tx| acc.saturating_add(tx.amount))
    }
}
