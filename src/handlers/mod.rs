//! Read-only query API handlers
//!
//! Response shapes are fixed by the dapp UI that consumes them; nothing here
//! surfaces internal errors beyond an absent resolution index.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::models::known_flights;

pub async fn api_root() -> Json<Value> {
    Json(json!({
        "message": "An API for use with your Dapp!"
    }))
}

/// Static flight reference data for the insurance UI.
pub async fn list_flights() -> Json<Value> {
    Json(json!({
        "result": known_flights()
    }))
}

/// Latest observed request's selected index, `null` until the first request
/// event is seen.
pub async fn event_index(State(app_state): State<AppState>) -> Json<Value> {
    let index = *app_state.latest_index.read().await;
    Json(json!({
        "result": index
    }))
}

/// Pool and tracker counters for diagnostics.
pub async fn stats(State(app_state): State<AppState>) -> Json<Value> {
    let stats = app_state.tracker.stats().await;
    let pool_size = app_state.registry.len().await;
    Json(json!({
        "result": {
            "oracles": pool_size,
            "openRequests": stats.open,
            "resolvedRequests": stats.resolved,
            "expiredRequests": stats.expired,
            "discardedReports": stats.discarded_reports,
            "evictedRecords": stats.evicted,
        }
    }))
}
