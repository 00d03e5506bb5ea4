//! Configuration module for the bridge engine
//!
//! This module defines the configuration structures used across the engine:
//! monitoring intervals, retry policy, quorum settings, alert thresholds and
//! API authority tokens. Intervals are configuration, not hard-coded control
//! flow, so every periodic task reads its period from here.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Main configuration structure for the bridge engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    /// Transfer intake and timeout policy
    pub transfer: TransferConfig,

    /// Chain watcher settings
    pub watcher: WatcherConfig,

    /// Validator quorum settings
    pub quorum: QuorumConfig,

    /// Monitoring task intervals and retry policy
    pub monitor: MonitorConfig,

    /// Alerting thresholds
    pub alerts: AlertConfig,

    /// API authority tokens
    pub auth: AuthConfig,
}

impl BridgeConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| BridgeError::Storage(format!("failed to read config: {}", e)))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.transfer.min_transfer_amount > self.transfer.max_transfer_amount {
            return Err(BridgeError::Validation(
                "min_transfer_amount exceeds max_transfer_amount".to_string(),
            ));
        }
        if self.quorum.threshold == 0 {
            return Err(BridgeError::Validation(
                "quorum threshold must be at least 1".to_string(),
            ));
        }
        if self.alerts.critical_liquidity_ratio <= 0.0 || self.alerts.critical_liquidity_ratio > 1.0
        {
            return Err(BridgeError::Validation(
                "critical_liquidity_ratio must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Transfer intake and timeout policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Minimum transfer amount in smallest units
    pub min_transfer_amount: u128,

    /// Maximum transfer amount in smallest units
    pub max_transfer_amount: u128,

    /// Default per-transaction deadline in minutes
    pub default_timeout_minutes: i64,

    /// Default automatic recovery budget
    pub default_max_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            min_transfer_amount: 1,
            max_transfer_amount: u128::MAX,
            default_timeout_minutes: 60,
            default_max_retries: 3,
        }
    }
}

/// Chain watcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Poll interval in seconds
    pub poll_interval_secs: u64,

    /// Confirmation depth before an event is treated as final
    pub min_confirmations: u64,

    /// Timeout for individual RPC calls in seconds
    pub rpc_timeout_secs: u64,

    /// Initial backoff after an RPC failure, in seconds
    pub rpc_backoff_secs: u64,

    /// Cap applied to the RPC failure backoff, in seconds
    pub rpc_backoff_max_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            min_confirmations: 12,
            rpc_timeout_secs: 15,
            rpc_backoff_secs: 5,
            rpc_backoff_max_secs: 300,
        }
    }
}

/// Validator quorum settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuorumConfig {
    /// Distinct attestations required to authorize settlement
    pub threshold: usize,

    /// Overall deadline for a collection round, in seconds
    pub collection_timeout_secs: u64,

    /// Timeout for a single validator request, in seconds
    pub request_timeout_secs: u64,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            collection_timeout_secs: 120,
            request_timeout_secs: 30,
        }
    }
}

/// Monitoring task intervals and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// StuckMonitor scan interval in seconds
    pub stuck_scan_interval_secs: u64,

    /// RecoveryEngine pass interval in seconds
    pub recovery_interval_secs: u64,

    /// HealthMonitor interval in seconds
    pub health_interval_secs: u64,

    /// Base of the exponential retry backoff, in seconds
    pub base_backoff_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stuck_scan_interval_secs: 30,
            recovery_interval_secs: 60,
            health_interval_secs: 120,
            base_backoff_secs: 60,
        }
    }
}

/// Alerting thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Backlog ceiling; a stuck count beyond it raises a critical system alert
    pub max_stuck_transactions: usize,

    /// Liquidity ratio floor; below this a critical alert is raised
    pub critical_liquidity_ratio: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_stuck_transactions: 5,
            critical_liquidity_ratio: 0.2,
        }
    }
}

/// API authority tokens
///
/// Static bearer tokens mapped to the two authority levels. Token issuance
/// and rotation belong to the platform; the engine only checks membership.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Tokens granted Supervisor authority
    pub supervisor_tokens: Vec<String>,

    /// Tokens granted Admin authority
    pub admin_tokens: Vec<String>,
}
