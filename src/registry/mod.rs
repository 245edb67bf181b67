//! Oracle pool registry
//!
//! Owns the pool of simulated oracle identities and the inverse mapping from
//! selection index to the oracles holding it. Registration asks the ledger
//! for each oracle's index assignment; the assignment is immutable afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::ledger::{LedgerClient, LedgerError};
use crate::models::OracleIdentity;

/// A single oracle could not obtain its indices. Retryable by re-invoking
/// registration for that oracle only.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("registration timed out")]
    Timeout,
    #[error("oracle already registered")]
    AlreadyRegistered,
    #[error("ledger returned a malformed index assignment: {0}")]
    BadIndexReply(String),
}

#[derive(Default)]
struct RegistryInner {
    oracles: Vec<OracleIdentity>,
    by_index: HashMap<u8, HashSet<String>>,
}

pub struct OracleRegistry {
    ledger: Arc<dyn LedgerClient>,
    registration_timeout: Duration,
    inner: RwLock<RegistryInner>,
}

impl OracleRegistry {
    pub fn new(ledger: Arc<dyn LedgerClient>, registration_timeout: Duration) -> Self {
        Self {
            ledger,
            registration_timeout,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register one oracle: submit the registration transaction, read back the
    /// assigned indices, and insert the identity into all three index buckets.
    /// The whole round-trip is bounded by the registration timeout.
    pub async fn register(&self, address: &str) -> Result<OracleIdentity, RegistrationError> {
        {
            let inner = self.inner.read().await;
            if inner.oracles.iter().any(|o| o.address == address) {
                return Err(RegistrationError::AlreadyRegistered);
            }
        }

        let indices = timeout(self.registration_timeout, self.request_indices(address))
            .await
            .map_err(|_| RegistrationError::Timeout)??;

        let identity = OracleIdentity {
            address: address.to_string(),
            indices,
        };

        let mut inner = self.inner.write().await;
        for index in identity.indices {
            inner
                .by_index
                .entry(index)
                .or_default()
                .insert(identity.address.clone());
        }
        inner.oracles.push(identity.clone());

        info!(oracle = address, indices = ?indices, "oracle registered");
        Ok(identity)
    }

    async fn request_indices(&self, address: &str) -> Result<[u8; 3], RegistrationError> {
        self.ledger
            .submit_transaction("registerOracle", json!({}), address)
            .await?;

        let reply = self.ledger.call("getMyIndexes", json!({}), address).await?;
        let values = reply
            .as_array()
            .ok_or_else(|| RegistrationError::BadIndexReply(reply.to_string()))?;

        let parsed: Vec<u8> = values
            .iter()
            .filter_map(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok()))
            .filter_map(|v| u8::try_from(v).ok())
            .collect();

        <[u8; 3]>::try_from(parsed)
            .map_err(|_| RegistrationError::BadIndexReply(reply.to_string()))
    }

    /// Register every address independently. One oracle's failure never aborts
    /// the rest; failures are collected and returned alongside the count of
    /// successful registrations.
    pub async fn register_pool(
        &self,
        addresses: &[String],
    ) -> (usize, Vec<(String, RegistrationError)>) {
        let mut registered = 0;
        let mut failures = Vec::new();

        for address in addresses {
            match self.register(address).await {
                Ok(_) => registered += 1,
                Err(err) => {
                    warn!(oracle = %address, error = %err, "oracle registration failed");
                    failures.push((address.clone(), err));
                }
            }
        }

        info!(registered, failed = failures.len(), "oracle pool registration complete");
        (registered, failures)
    }

    /// Oracles holding the given selection index. An empty set is an expected
    /// outcome under random assignment, not an error.
    pub async fn eligible_for(&self, index: u8) -> HashSet<String> {
        self.inner
            .read()
            .await
            .by_index
            .get(&index)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of the registered pool, for diagnostics and tests.
    pub async fn oracles(&self) -> Vec<OracleIdentity> {
        self.inner.read().await.oracles.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.oracles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.oracles.is_empty()
    }
}
