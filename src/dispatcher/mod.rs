//! Ledger event dispatch
//!
//! One long-lived consume loop per event topic, each isolated: a decode or
//! routing failure drops that event, logs it and keeps the loop alive. The
//! only fatal condition in the whole service is failing to establish the
//! initial subscriptions.
//!
//! The transport orders events per block but gives no per-key guarantee, so a
//! report that arrives before its request is held in a grace buffer and
//! replayed once the request lands; reports still unmatched after the grace
//! window are dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::ledger::{
    decode_report, decode_request, decode_resolution, EventStream, EventTopic, LedgerClient,
    LedgerError, OracleReportEvent, RawEvent,
};
use crate::submitter::ResponseSubmitter;
use crate::tracker::{RequestTracker, TrackerStateError};

/// Initial subscription establishment failed; aborts startup.
#[derive(Debug, thiserror::Error)]
#[error("could not subscribe to {topic}: {source}")]
pub struct StartError {
    pub topic: &'static str,
    #[source]
    pub source: LedgerError,
}

/// Latest observed request's selected index, surfaced by the query API for
/// diagnostics.
pub type LatestIndex = Arc<RwLock<Option<u8>>>;

struct PendingReport {
    event: OracleReportEvent,
    buffered_at: DateTime<Utc>,
}

pub struct EventDispatcher {
    ledger: Arc<dyn LedgerClient>,
    tracker: Arc<RequestTracker>,
    submitter: Arc<ResponseSubmitter>,
    latest_index: LatestIndex,
    pending: Mutex<Vec<PendingReport>>,
    report_grace: Duration,
    sweep_interval: Duration,
    from_block: u64,
    shutdown: watch::Receiver<bool>,
}

impl EventDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        tracker: Arc<RequestTracker>,
        submitter: Arc<ResponseSubmitter>,
        latest_index: LatestIndex,
        report_grace: Duration,
        sweep_interval: Duration,
        from_block: u64,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ledger,
            tracker,
            submitter,
            latest_index,
            pending: Mutex::new(Vec::new()),
            report_grace,
            sweep_interval,
            from_block,
            shutdown,
        }
    }

    /// Establish every subscription, then run the per-topic loops and the
    /// expiry sweeper until shutdown. Returns `StartError` only when a
    /// subscription cannot be established.
    pub async fn run(self: Arc<Self>) -> Result<(), StartError> {
        let request_stream = self.subscribe(EventTopic::OracleRequest).await?;
        let report_stream = self.subscribe(EventTopic::OracleReport).await?;
        let resolution_stream = self.subscribe(EventTopic::FlightStatusInfo).await?;

        let mut notification_streams = Vec::new();
        for topic in EventTopic::NOTIFICATIONS {
            notification_streams.push((topic, self.subscribe(topic).await?));
        }

        info!(from_block = self.from_block, "all ledger subscriptions established");

        let mut tasks = Vec::new();

        let dispatcher = self.clone();
        tasks.push(tokio::spawn(async move {
            dispatcher
                .consume(request_stream, |d, raw| async move { d.handle_request(raw).await })
                .await;
        }));

        let dispatcher = self.clone();
        tasks.push(tokio::spawn(async move {
            dispatcher
                .consume(report_stream, |d, raw| async move { d.handle_report(raw).await })
                .await;
        }));

        let dispatcher = self.clone();
        tasks.push(tokio::spawn(async move {
            dispatcher
                .consume(resolution_stream, |d, raw| async move {
                    d.handle_resolution(raw).await
                })
                .await;
        }));

        for (topic, stream) in notification_streams {
            let dispatcher = self.clone();
            tasks.push(tokio::spawn(async move {
                dispatcher
                    .consume(stream, move |_, raw| async move {
                        info!(topic = topic.as_str(), block = raw.block, "ledger notification");
                    })
                    .await;
            }));
        }

        let dispatcher = self.clone();
        tasks.push(tokio::spawn(async move { dispatcher.sweeper().await }));

        for task in tasks {
            if let Err(err) = task.await {
                error!(error = %err, "dispatcher task aborted");
            }
        }
        info!("event dispatcher stopped");
        Ok(())
    }

    async fn subscribe(&self, topic: EventTopic) -> Result<EventStream, StartError> {
        self.ledger
            .subscribe(topic, self.from_block)
            .await
            .map_err(|source| StartError {
                topic: topic.as_str(),
                source,
            })
    }

    /// Drain one topic's stream until shutdown or the producer goes away.
    /// Each event is handled in isolation; the handler cannot kill the loop.
    async fn consume<F, Fut>(self: Arc<Self>, mut stream: EventStream, handler: F)
    where
        F: Fn(Arc<Self>, RawEvent) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                event = stream.recv() => {
                    match event {
                        Some(raw) => handler(self.clone(), raw).await,
                        None => {
                            warn!("event stream closed by producer");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Decode and apply an `OracleRequest` event, then fan out responses for
    /// the newly opened request.
    pub async fn handle_request(&self, raw: RawEvent) {
        let event = match decode_request(&raw.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(block = raw.block, error = %err, "dropping malformed request event");
                return;
            }
        };

        *self.latest_index.write().await = Some(event.index);

        let created = self
            .tracker
            .on_request_observed(event.key.clone(), event.index, Utc::now())
            .await;
        if !created {
            // Duplicate delivery: the record was refreshed as a no-op and the
            // pool has already responded once.
            return;
        }

        self.flush_pending(Utc::now()).await;
        self.submitter.respond_to(&event).await;
    }

    /// Decode and apply an `OracleReport` event. Reports ahead of their
    /// request wait in the grace buffer; reports against terminal records are
    /// discarded (the tracker counts them).
    pub async fn handle_report(&self, raw: RawEvent) {
        let event = match decode_report(&raw.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(block = raw.block, error = %err, "dropping malformed report event");
                return;
            }
        };

        match self
            .tracker
            .on_report_observed(&event.key, &event.oracle, event.status)
            .await
        {
            Ok(()) => {}
            Err(TrackerStateError::UnknownRequest(_)) => {
                debug!(request = %event.key, oracle = %event.oracle, "buffering early report");
                self.pending.lock().await.push(PendingReport {
                    event,
                    buffered_at: Utc::now(),
                });
            }
            Err(err @ TrackerStateError::Terminal(_)) => {
                debug!(error = %err, "late report discarded");
            }
        }
    }

    /// Decode and apply a `FlightStatusInfo` resolution event.
    pub async fn handle_resolution(&self, raw: RawEvent) {
        let event = match decode_resolution(&raw.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(block = raw.block, error = %err, "dropping malformed resolution event");
                return;
            }
        };

        if let Err(err) = self
            .tracker
            .on_resolution_observed(&event.key, Utc::now())
            .await
        {
            debug!(error = %err, "resolution without matching open request");
        }
    }

    /// Replay buffered early reports whose request has since arrived; drop the
    /// ones past the grace window.
    pub async fn flush_pending(&self, now: DateTime<Utc>) {
        let grace = chrono::Duration::from_std(self.report_grace)
            .unwrap_or_else(|_| chrono::Duration::max_value());

        let mut pending = self.pending.lock().await;
        let buffered = std::mem::take(&mut *pending);
        for report in buffered {
            if self.tracker.get(&report.event.key).await.is_some() {
                // Request has landed; apply. Terminal records count the
                // discard themselves.
                let _ = self
                    .tracker
                    .on_report_observed(&report.event.key, &report.event.oracle, report.event.status)
                    .await;
            } else if now - report.buffered_at > grace {
                warn!(
                    request = %report.event.key,
                    oracle = %report.event.oracle,
                    "dropping report with no matching request after grace window"
                );
            } else {
                pending.push(report);
            }
        }
    }

    /// Periodic expiry sweep, retention eviction and grace-buffer flush.
    async fn sweeper(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = sleep(self.sweep_interval) => {
                    let now = Utc::now();
                    self.tracker.sweep_expired(now).await;
                    self.tracker.evict_terminal(now).await;
                    self.flush_pending(now).await;
                }
            }
        }
    }
}
