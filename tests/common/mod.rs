//! In-memory ledger double for integration tests
//!
//! Assigns selection indices deterministically (three consecutive values per
//! registration, wrapping around the index space) so tests can predict the
//! registry layout, records every submitted transaction, and lets tests push
//! events into subscriptions by hand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use flight_oracle_server::ledger::{
    EventStream, EventTopic, LedgerClient, LedgerError, RawEvent, TxReceipt,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTx {
    pub method: String,
    pub from: String,
    pub args: Value,
}

#[derive(Default)]
struct MockState {
    registrations: u64,
    assigned: HashMap<String, [u8; 3]>,
    transactions: Vec<RecordedTx>,
    subscribers: HashMap<&'static str, Vec<mpsc::Sender<RawEvent>>>,
    fail_registration_for: Vec<String>,
    fail_submission_for: Vec<String>,
}

#[derive(Clone)]
pub struct MockLedger {
    index_space: u8,
    accounts: Vec<String>,
    fail_subscribe: bool,
    state: Arc<Mutex<MockState>>,
}

impl MockLedger {
    pub fn new(index_space: u8, accounts: usize) -> Self {
        Self {
            index_space,
            accounts: (0..accounts).map(|i| format!("0xoracle{i:02}")).collect(),
            fail_subscribe: false,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn failing_subscriptions(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    pub fn fail_registration_for(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_registration_for
            .push(address.to_string());
    }

    pub fn fail_submission_for(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_submission_for
            .push(address.to_string());
    }

    pub fn account_list(&self) -> Vec<String> {
        self.accounts.clone()
    }

    /// Oracles that successfully submitted a response transaction.
    pub fn responders(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|tx| tx.method == "submitOracleResponse")
            .map(|tx| tx.from.clone())
            .collect()
    }

    pub fn transactions(&self) -> Vec<RecordedTx> {
        self.state.lock().unwrap().transactions.clone()
    }

    /// Push an event into every live subscription for the topic.
    pub async fn emit(&self, topic: EventTopic, payload: Value) {
        let senders: Vec<mpsc::Sender<RawEvent>> = {
            let state = self.state.lock().unwrap();
            state
                .subscribers
                .get(topic.as_str())
                .cloned()
                .unwrap_or_default()
        };
        for sender in senders {
            let _ = sender
                .send(RawEvent {
                    topic,
                    block: 0,
                    payload: payload.clone(),
                })
                .await;
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn submit_transaction(
        &self,
        method: &str,
        args: Value,
        from: &str,
    ) -> Result<TxReceipt, LedgerError> {
        let mut state = self.state.lock().unwrap();

        if method == "registerOracle" {
            if state.fail_registration_for.iter().any(|a| a == from) {
                return Err(LedgerError::Rejected("registration refused".to_string()));
            }
            let base = state.registrations * 3;
            state.registrations += 1;
            let space = u64::from(self.index_space);
            state.assigned.insert(
                from.to_string(),
                [
                    (base % space) as u8,
                    ((base + 1) % space) as u8,
                    ((base + 2) % space) as u8,
                ],
            );
        }

        if method == "submitOracleResponse" && state.fail_submission_for.iter().any(|a| a == from) {
            return Err(LedgerError::Rejected("gas too low".to_string()));
        }

        state.transactions.push(RecordedTx {
            method: method.to_string(),
            from: from.to_string(),
            args,
        });

        Ok(TxReceipt {
            tx_hash: format!("0xtx{:04}", state.transactions.len()),
            block: 1,
        })
    }

    async fn call(&self, method: &str, _args: Value, from: &str) -> Result<Value, LedgerError> {
        let state = self.state.lock().unwrap();
        match method {
            "getMyIndexes" => state
                .assigned
                .get(from)
                .map(|indices| json!(indices))
                .ok_or_else(|| LedgerError::Rpc("oracle not registered".to_string())),
            other => Err(LedgerError::Rpc(format!("unknown method {other}"))),
        }
    }

    async fn subscribe(
        &self,
        topic: EventTopic,
        _from_block: u64,
    ) -> Result<EventStream, LedgerError> {
        if self.fail_subscribe {
            return Err(LedgerError::Rpc("node unreachable".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        self.state
            .lock()
            .unwrap()
            .subscribers
            .entry(topic.as_str())
            .or_default()
            .push(tx);
        Ok(EventStream::new(rx))
    }

    async fn accounts(&self) -> Result<Vec<String>, LedgerError> {
        Ok(self.accounts.clone())
    }
}
