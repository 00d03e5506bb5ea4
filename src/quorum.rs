//! # Validator Quorum
//!
//! Collects attestations from the validator set before any mint or release
//! is submitted. Collection is k-of-n: the round completes as soon as the
//! threshold of distinct validators has signed, without waiting for the
//! stragglers, and fails cleanly when the deadline passes first.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use metrics::counter;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::QuorumConfig;
use crate::error::{BridgeError, Result};
use crate::types::{Attestation, BridgeTransaction};

/// A single validator that can attest to a transfer
///
/// Implementations wrap whatever channel reaches the validator (RPC, p2p,
/// an in-process signer). The quorum only cares that a call either yields
/// an attestation or fails.
#[async_trait]
pub trait AttestationProvider: Send + Sync + 'static {
    /// Identity this provider signs as
    fn validator_id(&self) -> &str;

    /// Request an attestation for the given transaction
    async fn request_attestation(&self, tx: &BridgeTransaction) -> Result<Attestation>;
}

/// K-of-n attestation collector over a fixed validator set
pub struct ValidatorQuorum {
    validators: Vec<Arc<dyn AttestationProvider>>,
    config: QuorumConfig,
}

impl ValidatorQuorum {
    /// Create a quorum over the given validator set
    pub fn new(validators: Vec<Arc<dyn AttestationProvider>>, config: QuorumConfig) -> Self {
        Self { validators, config }
    }

    /// Number of validators in the set
    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    /// Attestations required to authorize settlement
    pub fn threshold(&self) -> usize {
        self.config.threshold
    }

    /// Collect attestations for `tx` until the threshold or the deadline is
    /// reached.
    ///
    /// Attestations are de-duplicated by validator id; a validator answering
    /// twice counts once. Individual validator failures are logged and
    /// skipped. Returns `QuorumTimeout` when the collection deadline elapses
    /// first and `QuorumInsufficient` when every validator has answered but
    /// the threshold was not met.
    pub async fn collect(&self, tx: &BridgeTransaction) -> Result<Vec<Attestation>> {
        let threshold = self.config.threshold;
        if self.validators.len() < threshold {
            return Err(BridgeError::QuorumInsufficient {
                collected: 0,
                required: threshold,
            });
        }

        let request_timeout = Duration::from_secs(self.config.request_timeout_secs);
        let deadline = tokio::time::sleep(Duration::from_secs(self.config.collection_timeout_secs));
        tokio::pin!(deadline);

        let mut pending: FuturesUnordered<_> = self
            .validators
            .iter()
            .map(|validator| {
                let validator = validator.clone();
                async move {
                    let id = validator.validator_id().to_string();
                    let result = timeout(request_timeout, validator.request_attestation(tx)).await;
                    (id, result)
                }
            })
            .collect();

        let mut collected: Vec<Attestation> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    counter!("bridge_quorum_timeouts_total", 1);
                    return Err(BridgeError::QuorumTimeout {
                        collected: collected.len(),
                        required: threshold,
                    });
                }
                next = pending.next() => match next {
                    Some((id, Ok(Ok(attestation)))) => {
                        if attestation.validator_id != id {
                            warn!(tx_id = %tx.id, validator = %id, signer = %attestation.validator_id,
                                "Attestation signed by unexpected validator, discarding");
                            continue;
                        }
                        if !seen.insert(attestation.validator_id.clone()) {
                            debug!(tx_id = %tx.id, validator = %id, "Duplicate attestation ignored");
                            continue;
                        }
                        collected.push(attestation);
                        if collected.len() >= threshold {
                            debug!(tx_id = %tx.id, collected = collected.len(), "Quorum reached");
                            counter!("bridge_quorum_reached_total", 1);
                            return Ok(collected);
                        }
                    }
                    Some((id, Ok(Err(e)))) => {
                        warn!(tx_id = %tx.id, validator = %id, error = %e, "Validator attestation failed");
                    }
                    Some((id, Err(_))) => {
                        warn!(tx_id = %tx.id, validator = %id, "Validator attestation timed out");
                    }
                    None => {
                        counter!("bridge_quorum_insufficient_total", 1);
                        return Err(BridgeError::QuorumInsufficient {
                            collected: collected.len(),
                            required: threshold,
                        });
                    }
                }
            }
        }
    }
}
