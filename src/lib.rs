//! # Bridge Engine
//!
//! Transaction lifecycle and recovery engine for a two-chain token bridge.
//!
//! A transfer locks (or burns) tokens on one chain and mints (or releases)
//! them on the other. This crate owns everything between those two events:
//! the durable ledger and its state machine, the watchers that confirm
//! chain activity, validator quorum collection, stuck detection, bounded
//! automatic recovery, operator overrides and system health monitoring.
//!
//! ## Main modules
//!
//! - [`types`]: transaction record, direction, status and the state machine
//! - [`ledger`]: durable system of record with per-transaction locking
//! - [`chain`]: chain client seam and the per-chain watchers
//! - [`quorum`]: k-of-n validator attestation collection
//! - [`monitor`]: stuck detection, automatic recovery, health checks
//! - [`gateway`]: operator overrides with authority levels
//! - [`engine`]: assembles the above into a runnable service
//! - [`api`]: warp routes for intake, overrides and the dashboards
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bridge_engine::alert::LogSink;
//! use bridge_engine::config::BridgeConfig;
//! use bridge_engine::engine::BridgeEngine;
//! use bridge_engine::ledger::JsonFileStore;
//!
//! # async fn run(
//! #     source: Arc<dyn bridge_engine::chain::ChainClient>,
//! #     dest: Arc<dyn bridge_engine::chain::ChainClient>,
//! #     validators: Vec<Arc<dyn bridge_engine::quorum::AttestationProvider>>,
//! # ) -> bridge_engine::error::Result<()> {
//! let config = BridgeConfig::default();
//! let store = Arc::new(JsonFileStore::open("bridge_ledger.json").await?);
//! let engine = Arc::new(
//!     BridgeEngine::new(config, store, source, dest, validators, vec![Arc::new(LogSink)])
//!         .await?,
//! );
//! engine.start().await;
//! warp::serve(bridge_engine::api::routes(engine)).run(([0, 0, 0, 0], 8080)).await;
//! # Ok(())
//! # }
//! ```

pub mod alert;
pub mod api;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod monitor;
pub mod quorum;
pub mod types;

pub use alert::{Alert, AlertCondition, AlertDispatcher, AlertScope, AlertSeverity, AlertSink};
pub use chain::{ChainClient, ChainEvent, ChainWatcher, EventKind, TxPayload, TxStatus};
pub use config::BridgeConfig;
pub use engine::BridgeEngine;
pub use error::{BridgeError, Result};
pub use gateway::{Authority, OverrideAction, OverrideGateway, OverrideRequest};
pub use ledger::{BridgeLedger, BridgeStats, JsonFileStore, LedgerStore, MemoryStore};
pub use monitor::{HealthMonitor, HealthReport, RecoveryEngine, StuckMonitor};
pub use quorum::{AttestationProvider, ValidatorQuorum};
pub use types::{
    BridgeDirection, BridgeStatus, BridgeTransaction, ChainRole, TransactionSummary, TxEvent,
};
