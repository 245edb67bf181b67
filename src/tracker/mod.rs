//! Per-request lifecycle tracking
//!
//! One record per outstanding flight-status request, keyed by
//! (airline, flight, timestamp). Records move `Open -> Resolved` when the
//! contract reports quorum, or `Open -> Expired` after the timeout sweep;
//! both states are terminal. Terminal records stick around for a retention
//! window so the query side can inspect recent history, then get evicted.
//!
//! The dispatcher is the single writer; the query layer reads concurrently,
//! so all state sits behind one `RwLock`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::models::{FlightStatus, RequestKey};

/// Lifecycle state of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Open,
    Resolved,
    Expired,
}

/// One tracked request and the responses observed for it.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub key: RequestKey,
    pub selected_index: u8,
    pub responses: HashMap<String, FlightStatus>,
    pub created_at: DateTime<Utc>,
    pub state: RequestState,
    /// Set when the record leaves Open; drives retention eviction.
    pub terminal_at: Option<DateTime<Utc>>,
}

/// An event referenced a request the tracker cannot apply it to. Discarded by
/// callers, never fatal.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrackerStateError {
    #[error("no record for request {0}")]
    UnknownRequest(RequestKey),
    #[error("request {0} is already terminal")]
    Terminal(RequestKey),
}

/// Counters exposed to the query/diagnostics layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub open: usize,
    pub resolved: usize,
    pub expired: usize,
    pub discarded_reports: u64,
    pub evicted: u64,
}

#[derive(Default)]
struct TrackerInner {
    records: HashMap<RequestKey, RequestRecord>,
    discarded_reports: u64,
    evicted: u64,
}

pub struct RequestTracker {
    request_timeout: Duration,
    retention_window: Duration,
    inner: RwLock<TrackerInner>,
}

impl RequestTracker {
    pub fn new(request_timeout: Duration, retention_window: Duration) -> Self {
        Self {
            request_timeout,
            retention_window,
            inner: RwLock::new(TrackerInner::default()),
        }
    }

    /// Open a record for a newly observed request. Duplicate delivery of the
    /// same request event is a no-op refresh: the existing record, its
    /// responses and its `created_at` are left untouched. Returns whether a
    /// record was created.
    pub async fn on_request_observed(
        &self,
        key: RequestKey,
        selected_index: u8,
        now: DateTime<Utc>,
    ) -> bool {
        let mut inner = self.inner.write().await;
        if inner.records.contains_key(&key) {
            debug!(request = %key, "duplicate request event ignored");
            return false;
        }

        inner.records.insert(
            key.clone(),
            RequestRecord {
                key: key.clone(),
                selected_index,
                responses: HashMap::new(),
                created_at: now,
                state: RequestState::Open,
                terminal_at: None,
            },
        );
        info!(request = %key, index = selected_index, "request opened");
        true
    }

    /// Record one oracle's response. Last write wins if an oracle reports
    /// twice for the same key. Reports against missing or terminal records
    /// are rejected and counted; the caller decides how loudly to log.
    pub async fn on_report_observed(
        &self,
        key: &RequestKey,
        oracle: &str,
        status: FlightStatus,
    ) -> Result<(), TrackerStateError> {
        let mut inner = self.inner.write().await;
        match inner.records.get_mut(key) {
            Some(record) if record.state == RequestState::Open => {
                record.responses.insert(oracle.to_string(), status);
                Ok(())
            }
            Some(record) => {
                let err = TrackerStateError::Terminal(record.key.clone());
                inner.discarded_reports += 1;
                Err(err)
            }
            None => {
                inner.discarded_reports += 1;
                Err(TrackerStateError::UnknownRequest(key.clone()))
            }
        }
    }

    /// Apply a quorum resolution observed on the ledger.
    pub async fn on_resolution_observed(
        &self,
        key: &RequestKey,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerStateError> {
        let mut inner = self.inner.write().await;
        match inner.records.get_mut(key) {
            Some(record) if record.state == RequestState::Open => {
                record.state = RequestState::Resolved;
                record.terminal_at = Some(now);
                info!(request = %key, responses = record.responses.len(), "request resolved");
                Ok(())
            }
            Some(record) => Err(TrackerStateError::Terminal(record.key.clone())),
            None => Err(TrackerStateError::UnknownRequest(key.clone())),
        }
    }

    /// Expire every Open record older than the request timeout. Idempotent:
    /// a second sweep at the same instant changes nothing. Returns the keys
    /// that expired in this pass.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<RequestKey> {
        let cutoff = chrono_duration(self.request_timeout);
        let mut expired = Vec::new();

        let mut inner = self.inner.write().await;
        for record in inner.records.values_mut() {
            if record.state == RequestState::Open && now - record.created_at > cutoff {
                record.state = RequestState::Expired;
                record.terminal_at = Some(now);
                expired.push(record.key.clone());
            }
        }

        for key in &expired {
            info!(request = %key, "request expired without resolution");
        }
        expired
    }

    /// Evict terminal records past the retention window, oldest first.
    pub async fn evict_terminal(&self, now: DateTime<Utc>) -> usize {
        let cutoff = chrono_duration(self.retention_window);

        let mut inner = self.inner.write().await;
        let mut stale: Vec<(DateTime<Utc>, RequestKey)> = inner
            .records
            .values()
            .filter_map(|record| {
                let terminal_at = record.terminal_at?;
                (now - terminal_at > cutoff).then(|| (terminal_at, record.key.clone()))
            })
            .collect();
        stale.sort();

        let evicted = stale.len();
        for (_, key) in stale {
            inner.records.remove(&key);
        }
        inner.evicted += evicted as u64;

        if evicted > 0 {
            debug!(evicted, "terminal records evicted");
        }
        evicted
    }

    pub async fn get(&self, key: &RequestKey) -> Option<RequestRecord> {
        self.inner.read().await.records.get(key).cloned()
    }

    pub async fn stats(&self) -> TrackerStats {
        let inner = self.inner.read().await;
        let mut stats = TrackerStats {
            discarded_reports: inner.discarded_reports,
            evicted: inner.evicted,
            ..TrackerStats::default()
        };
        for record in inner.records.values() {
            match record.state {
                RequestState::Open => stats.open += 1,
                RequestState::Resolved => stats.resolved += 1,
                RequestState::Expired => stats.expired += 1,
            }
        }
        stats
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::max_value())
}
