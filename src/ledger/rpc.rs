//! JSON-RPC ledger client
//!
//! Talks to the ledger node's application-level JSON-RPC surface. Event
//! subscriptions are emulated by a per-topic polling task that advances a
//! block cursor and feeds a channel; the node itself only exposes ranged
//! event queries.

use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use super::{EventStream, EventTopic, LedgerClient, LedgerError, RawEvent, TxReceipt};
use async_trait::async_trait;

const POLL_INTERVAL_SECONDS: u64 = 5;
/// Blocks fetched per poll cycle, to keep requests and replay predictable.
const MAX_BLOCK_RANGE: u64 = 200;
/// Buffered events per subscription before the poller backpressures.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct JsonRpcLedger {
    rpc_url: String,
    contract_id: String,
    http: Client,
}

impl JsonRpcLedger {
    pub fn new(rpc_url: String, contract_id: String) -> Self {
        Self {
            rpc_url,
            contract_id,
            http: Client::new(),
        }
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let response = self
            .http
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": "flight-oracle-server",
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        if let Some(message) = response.pointer("/error/message").and_then(|v| v.as_str()) {
            return Err(LedgerError::Rpc(message.to_string()));
        }

        Ok(response
            .pointer("/result")
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn latest_block(&self) -> Result<u64, LedgerError> {
        let result = self.rpc_call("app_blockNumber", json!({})).await?;
        result
            .as_u64()
            .ok_or_else(|| LedgerError::Rpc("missing block number in RPC response".to_string()))
    }

    async fn fetch_events(
        &self,
        topic: EventTopic,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Value>, LedgerError> {
        let result = self
            .rpc_call(
                "app_getEvents",
                json!({
                    "contract": self.contract_id,
                    "event": topic.as_str(),
                    "fromBlock": from_block,
                    "toBlock": to_block,
                }),
            )
            .await?;

        Ok(result
            .pointer("/events")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default())
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    async fn submit_transaction(
        &self,
        method: &str,
        args: Value,
        from: &str,
    ) -> Result<TxReceipt, LedgerError> {
        let result = self
            .rpc_call(
                "app_submitTransaction",
                json!({
                    "contract": self.contract_id,
                    "method": method,
                    "args": args,
                    "from": from,
                }),
            )
            .await?;

        let tx_hash = result
            .pointer("/txHash")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LedgerError::Rejected(format!("{method}: no receipt returned")))?
            .to_string();
        let block = result.pointer("/block").and_then(|v| v.as_u64()).unwrap_or(0);

        Ok(TxReceipt { tx_hash, block })
    }

    async fn call(&self, method: &str, args: Value, from: &str) -> Result<Value, LedgerError> {
        self.rpc_call(
            "app_call",
            json!({
                "contract": self.contract_id,
                "method": method,
                "args": args,
                "from": from,
            }),
        )
        .await
    }

    async fn subscribe(
        &self,
        topic: EventTopic,
        from_block: u64,
    ) -> Result<EventStream, LedgerError> {
        // Probe the node up front so a dead endpoint fails subscription
        // establishment instead of silently polling nothing.
        let latest = self.latest_block().await?;
        debug!(topic = topic.as_str(), from_block, latest, "subscription established");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let client = self.clone();

        tokio::spawn(async move {
            let mut cursor = from_block;
            loop {
                match client.latest_block().await {
                    Ok(latest) => {
                        if cursor <= latest {
                            let to_block = latest.min(cursor + MAX_BLOCK_RANGE);
                            match client.fetch_events(topic, cursor, to_block).await {
                                Ok(events) => {
                                    for payload in events {
                                        let block = payload
                                            .pointer("/blockNumber")
                                            .and_then(|v| v.as_u64())
                                            .unwrap_or(to_block);
                                        let event = RawEvent { topic, block, payload };
                                        if tx.send(event).await.is_err() {
                                            // Subscriber dropped the stream.
                                            return;
                                        }
                                    }
                                    cursor = to_block + 1;
                                }
                                Err(err) => {
                                    warn!(topic = topic.as_str(), error = %err, "event fetch failed");
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(topic = topic.as_str(), error = %err, "block height poll failed");
                    }
                }

                if tx.is_closed() {
                    return;
                }
                sleep(Duration::from_secs(POLL_INTERVAL_SECONDS)).await;
            }
        });

        Ok(EventStream::new(rx))
    }

    async fn accounts(&self) -> Result<Vec<String>, LedgerError> {
        let result = self.rpc_call("app_accounts", json!({})).await?;
        result
            .as_array()
            .map(|accounts| {
                accounts
                    .iter()
                    .filter_map(|v| v.as_str().map(ToString::to_string))
                    .collect()
            })
            .ok_or_else(|| LedgerError::Rpc("missing accounts in RPC response".to_string()))
    }
}
