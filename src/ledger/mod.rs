//! Ledger client boundary and typed contract events
//!
//! Everything the service knows about the outside world arrives through the
//! [`LedgerClient`] trait: transaction submission, read-only calls and lazy
//! per-topic event streams. The JSON-RPC implementation lives in [`rpc`];
//! tests substitute their own.

pub mod rpc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::models::{FlightStatus, RequestKey};

/// Contract event topics the service subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    /// A passenger asked for a flight status; carries the selected index.
    OracleRequest,
    /// A single oracle's submitted response was accepted by the contract.
    OracleReport,
    /// The contract reached quorum and finalized a status.
    FlightStatusInfo,
    /// Bookkeeping notifications; logged only.
    RegisterAirline,
    AirlinesFunded,
    InsurancePurchased,
    CreditInsurees,
    WithdrawCompleted,
}

impl EventTopic {
    /// Event name as emitted by the application contract.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTopic::OracleRequest => "OracleRequest",
            EventTopic::OracleReport => "OracleReport",
            EventTopic::FlightStatusInfo => "FlightStatusInfo",
            EventTopic::RegisterAirline => "RegisterAirline",
            EventTopic::AirlinesFunded => "AirlinesFunded",
            EventTopic::InsurancePurchased => "InsurancePurchased",
            EventTopic::CreditInsurees => "CreditInsurees",
            EventTopic::WithdrawCompleted => "WithdrawCompleted",
        }
    }

    /// Topics that are informational only and never routed to the tracker.
    pub const NOTIFICATIONS: [EventTopic; 5] = [
        EventTopic::RegisterAirline,
        EventTopic::AirlinesFunded,
        EventTopic::InsurancePurchased,
        EventTopic::CreditInsurees,
        EventTopic::WithdrawCompleted,
    ];
}

/// Undecoded event as delivered by the ledger.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub topic: EventTopic,
    pub block: u64,
    pub payload: Value,
}

/// Receipt for an accepted transaction.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block: u64,
}

/// Lazy, infinite sequence of events for one topic. Not restartable; a new
/// subscription with an explicit `from_block` is required after it is dropped.
pub struct EventStream {
    rx: mpsc::Receiver<RawEvent>,
}

impl EventStream {
    pub fn new(rx: mpsc::Receiver<RawEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the producer side is gone.
    pub async fn recv(&mut self) -> Option<RawEvent> {
        self.rx.recv().await
    }
}

/// Transport-level ledger failure.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("ledger rpc error: {0}")]
    Rpc(String),
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// The service's only I/O boundary.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a state-changing contract call on behalf of `from`.
    async fn submit_transaction(
        &self,
        method: &str,
        args: Value,
        from: &str,
    ) -> Result<TxReceipt, LedgerError>;

    /// Read-only contract call on behalf of `from`.
    async fn call(&self, method: &str, args: Value, from: &str) -> Result<Value, LedgerError>;

    /// Subscribe to one event topic starting at `from_block`.
    async fn subscribe(&self, topic: EventTopic, from_block: u64)
        -> Result<EventStream, LedgerError>;

    /// Accounts held by the ledger node; the oracle pool is carved out of
    /// these past the reserved prefix.
    async fn accounts(&self) -> Result<Vec<String>, LedgerError>;
}

/// Malformed event payload; the event is dropped and the stream continues.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("event payload missing field `{0}`")]
    MissingField(&'static str),
    #[error("unknown flight status code {0}")]
    UnknownStatusCode(u64),
    #[error("selection index {0} out of range")]
    BadIndex(u64),
}

/// Typed `OracleRequest` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleRequestEvent {
    pub index: u8,
    pub key: RequestKey,
}

/// Typed `OracleReport` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleReportEvent {
    pub key: RequestKey,
    pub oracle: String,
    pub status: FlightStatus,
}

/// Typed `FlightStatusInfo` (resolution) event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightStatusEvent {
    pub key: RequestKey,
    pub status: FlightStatus,
}

// Payload field lookups tolerate both camelCase and snake_case, since ledger
// nodes differ in how they render return values.
fn field<'a>(payload: &'a Value, camel: &str, snake: &str) -> Option<&'a Value> {
    payload
        .pointer(&format!("/{camel}"))
        .or_else(|| payload.pointer(&format!("/{snake}")))
        .or_else(|| payload.pointer(&format!("/returnValues/{camel}")))
}

fn str_field(payload: &Value, camel: &str, snake: &'static str) -> Result<String, DecodeError> {
    field(payload, camel, snake)
        .and_then(|v| v.as_str())
        .map(ToString::to_string)
        .ok_or(DecodeError::MissingField(snake))
}

fn u64_field(payload: &Value, camel: &str, snake: &'static str) -> Result<u64, DecodeError> {
    field(payload, camel, snake)
        .and_then(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok()))
        .ok_or(DecodeError::MissingField(snake))
}

fn key_fields(payload: &Value) -> Result<RequestKey, DecodeError> {
    Ok(RequestKey {
        airline: str_field(payload, "airline", "airline")?,
        flight: str_field(payload, "flight", "flight")?,
        timestamp: u64_field(payload, "timestamp", "timestamp")?,
    })
}

fn status_field(payload: &Value) -> Result<FlightStatus, DecodeError> {
    let code = u64_field(payload, "statusCode", "status_code")?;
    u8::try_from(code)
        .ok()
        .and_then(FlightStatus::from_code)
        .ok_or(DecodeError::UnknownStatusCode(code))
}

pub fn decode_request(payload: &Value) -> Result<OracleRequestEvent, DecodeError> {
    let index = u64_field(payload, "index", "index")?;
    Ok(OracleRequestEvent {
        // Indices live in a small space; anything wider is malformed.
        index: u8::try_from(index).map_err(|_| DecodeError::BadIndex(index))?,
        key: key_fields(payload)?,
    })
}

pub fn decode_report(payload: &Value) -> Result<OracleReportEvent, DecodeError> {
    Ok(OracleReportEvent {
        key: key_fields(payload)?,
        oracle: str_field(payload, "oracle", "oracle")?,
        status: status_field(payload)?,
    })
}

pub fn decode_resolution(payload: &Value) -> Result<FlightStatusEvent, DecodeError> {
    Ok(FlightStatusEvent {
        key: key_fields(payload)?,
        status: status_field(payload)?,
    })
}
