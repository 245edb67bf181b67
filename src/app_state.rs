//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::dispatcher::LatestIndex;
use crate::registry::OracleRegistry;
use crate::tracker::RequestTracker;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<RequestTracker>,
    pub registry: Arc<OracleRegistry>,
    pub latest_index: LatestIndex,
}

impl AppState {
    pub fn new(
        tracker: Arc<RequestTracker>,
        registry: Arc<OracleRegistry>,
        latest_index: LatestIndex,
    ) -> Self {
        Self {
            tracker,
            registry,
            latest_index,
        }
    }
}

impl FromRef<AppState> for Arc<RequestTracker> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.tracker.clone()
    }
}

impl FromRef<AppState> for Arc<OracleRegistry> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.registry.clone()
    }
}

impl FromRef<AppState> for LatestIndex {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.latest_index.clone()
    }
}
