//! # Monitoring Module
//!
//! The three periodic loops that keep the bridge honest: the stuck monitor
//! detects transactions that exceeded their deadline, the recovery engine
//! retries them within a bounded budget, and the health monitor watches the
//! system-level signals (backlog, connectivity, liquidity).

pub mod health;
pub mod recovery;
pub mod stuck;

pub use health::{ChainHealth, HealthMonitor, HealthReport};
pub use recovery::RecoveryEngine;
pub use stuck::StuckMonitor;
