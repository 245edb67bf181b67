//! Oracle response submission
//!
//! For each request event, queries the registry for the oracles holding the
//! selected index and submits one status response per eligible oracle. The
//! submissions fan out concurrently and are fire-and-forget: one oracle's
//! rejected transaction is logged and never blocks or retries the others.

use std::sync::Arc;

use futures_util::future::join_all;
use rand::seq::SliceRandom;
use serde_json::json;
use tracing::{info, warn};

use crate::ledger::{LedgerClient, LedgerError, OracleRequestEvent};
use crate::models::{FlightStatus, RequestKey};
use crate::registry::OracleRegistry;

/// A single oracle's response transaction failed. Logged, no retry, no
/// propagation; at most one attempt per (request, oracle) pair.
#[derive(Debug, thiserror::Error)]
#[error("oracle {oracle} failed to respond to {key}: {source}")]
pub struct SubmissionError {
    pub oracle: String,
    pub key: RequestKey,
    #[source]
    pub source: LedgerError,
}

/// Chooses the status code a simulated oracle reports.
pub trait StatusPolicy: Send + Sync {
    fn choose(&self, key: &RequestKey) -> FlightStatus;
}

/// Default simulation policy: an independent pseudo-random code per oracle,
/// so quorum outcomes vary run to run.
pub struct RandomStatusPolicy;

impl StatusPolicy for RandomStatusPolicy {
    fn choose(&self, _key: &RequestKey) -> FlightStatus {
        *FlightStatus::ALL
            .choose(&mut rand::thread_rng())
            .unwrap_or(&FlightStatus::Unknown)
    }
}

/// Every oracle reports the same code. Used by tests and demo runs that need
/// a deterministic quorum.
pub struct FixedStatusPolicy(pub FlightStatus);

impl StatusPolicy for FixedStatusPolicy {
    fn choose(&self, _key: &RequestKey) -> FlightStatus {
        self.0
    }
}

/// Per-request summary of the fan-out, for logging and tests.
#[derive(Debug, Default)]
pub struct SubmissionOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct ResponseSubmitter {
    ledger: Arc<dyn LedgerClient>,
    registry: Arc<OracleRegistry>,
    policy: Arc<dyn StatusPolicy>,
}

impl ResponseSubmitter {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        registry: Arc<OracleRegistry>,
        policy: Arc<dyn StatusPolicy>,
    ) -> Self {
        Self {
            ledger,
            registry,
            policy,
        }
    }

    /// Submit one response per oracle eligible for the request's selected
    /// index. An empty eligible set is a valid outcome of random assignment,
    /// not an error.
    pub async fn respond_to(&self, event: &OracleRequestEvent) -> SubmissionOutcome {
        let eligible = self.registry.eligible_for(event.index).await;
        if eligible.is_empty() {
            info!(
                request = %event.key,
                index = event.index,
                "no oracle in the pool holds this index; nothing to submit"
            );
            return SubmissionOutcome::default();
        }

        let submissions = eligible
            .into_iter()
            .map(|oracle| self.submit_one(oracle, event));
        let results = join_all(submissions).await;

        let mut outcome = SubmissionOutcome {
            attempted: results.len(),
            ..SubmissionOutcome::default()
        };
        for result in results {
            match result {
                Ok(()) => outcome.succeeded += 1,
                Err(err) => {
                    outcome.failed += 1;
                    warn!(error = %err, "oracle did not respond");
                }
            }
        }

        info!(
            request = %event.key,
            index = event.index,
            attempted = outcome.attempted,
            succeeded = outcome.succeeded,
            "oracle responses submitted"
        );
        outcome
    }

    async fn submit_one(
        &self,
        oracle: String,
        event: &OracleRequestEvent,
    ) -> Result<(), SubmissionError> {
        let status = self.policy.choose(&event.key);
        let args = json!({
            "index": event.index,
            "airline": event.key.airline,
            "flight": event.key.flight,
            "timestamp": event.key.timestamp,
            "statusCode": status.code(),
        });

        self.ledger
            .submit_transaction("submitOracleResponse", args, &oracle)
            .await
            .map(|_| ())
            .map_err(|source| SubmissionError {
                oracle,
                key: event.key.clone(),
                source,
            })
    }
}
