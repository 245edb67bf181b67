//! Route definitions for the oracle server query API

use axum::{routing::get, Router};

use crate::app_state::AppState;
use crate::handlers::*;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api", get(api_root))
        .route("/flights", get(list_flights))
        .route("/eventIndex", get(event_index))
        .route("/stats", get(stats))
}
