//! Integration scenarios: pool registration, index-gated fan-out and the
//! full event-to-response flow against the in-memory ledger double.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{watch, RwLock};

use common::MockLedger;
use flight_oracle_server::dispatcher::EventDispatcher;
use flight_oracle_server::ledger::{EventTopic, LedgerClient, OracleRequestEvent, RawEvent};
use flight_oracle_server::models::{FlightStatus, RequestKey};
use flight_oracle_server::registry::OracleRegistry;
use flight_oracle_server::submitter::{FixedStatusPolicy, ResponseSubmitter};
use flight_oracle_server::tracker::{RequestState, RequestTracker};

const INDEX_SPACE: u8 = 10;

struct Harness {
    ledger: MockLedger,
    registry: Arc<OracleRegistry>,
    tracker: Arc<RequestTracker>,
    dispatcher: Arc<EventDispatcher>,
    shutdown: watch::Sender<bool>,
}

async fn harness(pool_size: usize) -> Harness {
    let ledger = MockLedger::new(INDEX_SPACE, pool_size);
    let ledger_arc: Arc<dyn LedgerClient> = Arc::new(ledger.clone());

    let registry = Arc::new(OracleRegistry::new(ledger_arc.clone(), Duration::from_secs(5)));
    let (_, failures) = registry.register_pool(&ledger.account_list()).await;
    assert!(failures.is_empty());

    let tracker = Arc::new(RequestTracker::new(
        Duration::from_secs(60),
        Duration::from_secs(600),
    ));
    let submitter = Arc::new(ResponseSubmitter::new(
        ledger_arc.clone(),
        registry.clone(),
        Arc::new(FixedStatusPolicy(FlightStatus::LateAirline)),
    ));

    let (shutdown, shutdown_rx) = watch::channel(false);
    let dispatcher = Arc::new(EventDispatcher::new(
        ledger_arc,
        tracker.clone(),
        submitter,
        Arc::new(RwLock::new(None)),
        Duration::from_secs(10),
        Duration::from_millis(100),
        0,
        shutdown_rx,
    ));

    Harness {
        ledger,
        registry,
        tracker,
        dispatcher,
        shutdown,
    }
}

fn request_payload(index: u8, airline: &str, flight: &str, timestamp: u64) -> serde_json::Value {
    json!({
        "index": index,
        "airline": airline,
        "flight": flight,
        "timestamp": timestamp,
    })
}

fn raw(topic: EventTopic, payload: serde_json::Value) -> RawEvent {
    RawEvent {
        topic,
        block: 0,
        payload,
    }
}

#[tokio::test]
async fn registry_mapping_is_the_exact_inverse_of_assignments() {
    let h = harness(20).await;
    let oracles = h.registry.oracles().await;
    assert_eq!(oracles.len(), 20);

    for oracle in &oracles {
        assert_eq!(oracle.indices.len(), 3);
    }

    for index in 0..INDEX_SPACE {
        let expected: HashSet<String> = oracles
            .iter()
            .filter(|o| o.indices.contains(&index))
            .map(|o| o.address.clone())
            .collect();
        assert_eq!(h.registry.eligible_for(index).await, expected);
    }
}

#[tokio::test]
async fn unheld_index_yields_an_empty_set_not_an_error() {
    // One oracle holds [0, 1, 2]; index 7 is held by nobody.
    let h = harness(1).await;
    assert!(h.registry.eligible_for(7).await.is_empty());
    assert!(h.registry.eligible_for(0).await.len() == 1);
}

#[tokio::test]
async fn one_failed_registration_does_not_abort_the_pool() {
    let ledger = MockLedger::new(INDEX_SPACE, 3);
    let refused = ledger.account_list()[1].clone();
    ledger.fail_registration_for(&refused);

    let ledger_arc: Arc<dyn LedgerClient> = Arc::new(ledger.clone());
    let registry = OracleRegistry::new(ledger_arc, Duration::from_secs(5));

    let (registered, failures) = registry.register_pool(&ledger.account_list()).await;
    assert_eq!(registered, 2);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, refused);
    assert_eq!(registry.len().await, 2);
}

#[tokio::test]
async fn request_fans_out_to_exactly_the_eligible_oracles() {
    let h = harness(20).await;
    let eligible = h.registry.eligible_for(4).await;
    assert!(!eligible.is_empty());

    h.dispatcher
        .handle_request(raw(
            EventTopic::OracleRequest,
            request_payload(4, "0xa1", "AS2345", 1000),
        ))
        .await;

    let responders: HashSet<String> = h.ledger.responders().into_iter().collect();
    assert_eq!(responders, eligible);
    // One submission per member, no duplicates.
    assert_eq!(h.ledger.responders().len(), eligible.len());

    // Every submission carries the fixed policy's status code.
    for tx in h.ledger.transactions() {
        if tx.method == "submitOracleResponse" {
            assert_eq!(tx.args.pointer("/statusCode").unwrap().as_u64(), Some(20));
            assert_eq!(tx.args.pointer("/index").unwrap().as_u64(), Some(4));
        }
    }

    let record = h
        .tracker
        .get(&RequestKey::new("0xa1", "AS2345", 1000))
        .await
        .unwrap();
    assert_eq!(record.state, RequestState::Open);
    assert_eq!(record.selected_index, 4);
}

#[tokio::test]
async fn empty_eligible_set_submits_nothing_but_still_tracks() {
    let h = harness(1).await;

    h.dispatcher
        .handle_request(raw(
            EventTopic::OracleRequest,
            request_payload(7, "0xa1", "UA01", 500),
        ))
        .await;

    assert!(h.ledger.responders().is_empty());
    assert!(h.tracker.get(&RequestKey::new("0xa1", "UA01", 500)).await.is_some());
}

#[tokio::test]
async fn one_rejected_submission_does_not_block_the_rest() {
    let h = harness(20).await;
    let eligible = h.registry.eligible_for(4).await;
    let unlucky = eligible.iter().next().unwrap().clone();
    h.ledger.fail_submission_for(&unlucky);

    h.dispatcher
        .handle_request(raw(
            EventTopic::OracleRequest,
            request_payload(4, "0xa1", "AS2345", 1000),
        ))
        .await;

    let responders: HashSet<String> = h.ledger.responders().into_iter().collect();
    assert_eq!(responders.len(), eligible.len() - 1);
    assert!(!responders.contains(&unlucky));
}

#[tokio::test]
async fn duplicate_request_event_fans_out_only_once() {
    let h = harness(20).await;
    let payload = request_payload(4, "0xa1", "AS2345", 1000);

    h.dispatcher
        .handle_request(raw(EventTopic::OracleRequest, payload.clone()))
        .await;
    let first_count = h.ledger.responders().len();

    h.dispatcher
        .handle_request(raw(EventTopic::OracleRequest, payload))
        .await;
    assert_eq!(h.ledger.responders().len(), first_count);
}

#[tokio::test]
async fn early_report_is_replayed_once_the_request_arrives() {
    let h = harness(20).await;
    let key = RequestKey::new("0xa1", "AS2345", 1000);

    h.dispatcher
        .handle_report(raw(
            EventTopic::OracleReport,
            json!({
                "airline": "0xa1",
                "flight": "AS2345",
                "timestamp": 1000,
                "oracle": "0xearly",
                "statusCode": 20,
            }),
        ))
        .await;
    assert!(h.tracker.get(&key).await.is_none());

    h.dispatcher
        .handle_request(raw(
            EventTopic::OracleRequest,
            request_payload(4, "0xa1", "AS2345", 1000),
        ))
        .await;

    let record = h.tracker.get(&key).await.unwrap();
    assert_eq!(record.responses.get("0xearly"), Some(&FlightStatus::LateAirline));
}

#[tokio::test]
async fn unmatched_report_is_dropped_after_the_grace_window() {
    let h = harness(20).await;
    let key = RequestKey::new("0xa1", "AS2345", 1000);

    h.dispatcher
        .handle_report(raw(
            EventTopic::OracleReport,
            json!({
                "airline": "0xa1",
                "flight": "AS2345",
                "timestamp": 1000,
                "oracle": "0xearly",
                "statusCode": 20,
            }),
        ))
        .await;

    // Flush well past the 10s grace window; the buffered report is gone.
    h.dispatcher
        .flush_pending(Utc::now() + chrono::Duration::seconds(30))
        .await;

    h.dispatcher
        .handle_request(raw(
            EventTopic::OracleRequest,
            request_payload(4, "0xa1", "AS2345", 1000),
        ))
        .await;
    assert!(h.tracker.get(&key).await.unwrap().responses.is_empty());
}

#[tokio::test]
async fn full_event_flow_through_subscriptions_and_shutdown() {
    let h = harness(20).await;
    let key = RequestKey::new("0xa1", "AS2345", 1000);

    let run = tokio::spawn(Arc::clone(&h.dispatcher).run());
    // Let the dispatcher establish its subscriptions before emitting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.ledger
        .emit(EventTopic::OracleRequest, request_payload(4, "0xa1", "AS2345", 1000))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let eligible = h.registry.eligible_for(4).await;
    let responders: HashSet<String> = h.ledger.responders().into_iter().collect();
    assert_eq!(responders, eligible);
    assert_eq!(h.tracker.get(&key).await.unwrap().state, RequestState::Open);

    h.ledger
        .emit(
            EventTopic::OracleReport,
            json!({
                "airline": "0xa1",
                "flight": "AS2345",
                "timestamp": 1000,
                "oracle": "0xoracle00",
                "statusCode": 20,
            }),
        )
        .await;
    h.ledger
        .emit(
            EventTopic::FlightStatusInfo,
            json!({
                "airline": "0xa1",
                "flight": "AS2345",
                "timestamp": 1000,
                "statusCode": 20,
            }),
        )
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let record = h.tracker.get(&key).await.unwrap();
    assert_eq!(record.state, RequestState::Resolved);
    assert_eq!(record.responses.get("0xoracle00"), Some(&FlightStatus::LateAirline));

    // Graceful shutdown: intake stops and the run task drains cleanly.
    h.shutdown.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), run).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
}

#[tokio::test]
async fn malformed_events_are_dropped_without_killing_the_loop() {
    let h = harness(20).await;

    let run = tokio::spawn(Arc::clone(&h.dispatcher).run());
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Garbage first; a valid request after it must still be processed.
    h.ledger
        .emit(EventTopic::OracleRequest, json!({ "nonsense": true }))
        .await;
    h.ledger
        .emit(EventTopic::OracleRequest, request_payload(4, "0xa1", "AS2345", 1000))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(h
        .tracker
        .get(&RequestKey::new("0xa1", "AS2345", 1000))
        .await
        .is_some());

    h.shutdown.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), run).await;
}

#[tokio::test]
async fn failed_subscription_establishment_is_fatal() {
    let ledger = MockLedger::new(INDEX_SPACE, 1).failing_subscriptions();
    let ledger_arc: Arc<dyn LedgerClient> = Arc::new(ledger.clone());

    let registry = Arc::new(OracleRegistry::new(ledger_arc.clone(), Duration::from_secs(5)));
    let tracker = Arc::new(RequestTracker::new(
        Duration::from_secs(60),
        Duration::from_secs(600),
    ));
    let submitter = Arc::new(ResponseSubmitter::new(
        ledger_arc.clone(),
        registry.clone(),
        Arc::new(FixedStatusPolicy(FlightStatus::OnTime)),
    ));
    let (_shutdown, shutdown_rx) = watch::channel(false);

    let dispatcher = Arc::new(EventDispatcher::new(
        ledger_arc,
        tracker,
        submitter,
        Arc::new(RwLock::new(None)),
        Duration::from_secs(10),
        Duration::from_secs(15),
        0,
        shutdown_rx,
    ));

    let err = dispatcher.run().await.unwrap_err();
    assert_eq!(err.topic, "OracleRequest");
}

// Keeps the typed-event API honest for downstream users of the library.
#[test]
fn request_event_exposes_key_and_index() {
    let event = OracleRequestEvent {
        index: 4,
        key: RequestKey::new("0xa1", "AS2345", 1000),
    };
    assert_eq!(event.key.to_string(), "0xa1/AS2345@1000");
}
